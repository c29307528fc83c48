pub mod encoder;
pub mod keys;

use std::path::{Path, PathBuf};

use stereo_stream_common::frame::{Frame, PixelFormat};

use crate::device::Resolution;

pub use encoder::{check_ffmpeg_available, FfmpegWriter};

/// Motion-JPEG, the only codec the streamer records with.
pub const MJPG: [u8; 4] = *b"MJPG";

/// Everything needed to open a video file.
#[derive(Debug, Clone)]
pub struct RecordingSpec {
    pub path: PathBuf,
    pub fourcc: [u8; 4],
    pub fps: f64,
    pub resolution: Resolution,
    pub pixel_format: PixelFormat,
}

/// Destination for recorded frames.
pub trait VideoSink: Send {
    fn write(&mut self, frame: &Frame) -> Result<(), EncoderError>;

    /// Flush and close the file. Later calls are no-ops.
    fn release(&mut self) -> Result<(), EncoderError>;

    fn path(&self) -> &Path;

    fn frame_count(&self) -> u64;
}

#[derive(Debug, thiserror::Error)]
pub enum EncoderError {
    #[error("failed to spawn ffmpeg: {0}")]
    Spawn(String),
    #[error("failed to write frame to ffmpeg stdin: {0}")]
    Write(String),
    #[error("failed to wait for ffmpeg: {0}")]
    Wait(String),
    #[error("ffmpeg exited with non-zero status: {0}")]
    FfmpegFailed(String),
    #[error("unsupported fourcc {0:?}")]
    Codec(String),
    #[error("frame is {got_width}x{got_height} {got_format:?}, writer expects {width}x{height} {format:?}")]
    FrameMismatch {
        got_width: u32,
        got_height: u32,
        got_format: PixelFormat,
        width: u32,
        height: u32,
        format: PixelFormat,
    },
    #[error("writer already released")]
    Released,
}
