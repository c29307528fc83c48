use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use stereo_stream_common::frame::{Frame, PixelFormat};
use tracing::{debug, error, info, warn};

use super::{EncoderError, RecordingSpec, VideoSink, MJPG};
use crate::device::Resolution;

/// Video writer backed by an ffmpeg subprocess.
///
/// Raw frames go to ffmpeg's stdin and come out as Motion-JPEG in an AVI
/// container. Every frame must match the size and pixel format the writer was
/// opened with.
pub struct FfmpegWriter {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    output_path: PathBuf,
    resolution: Resolution,
    pixel_format: PixelFormat,
    frame_count: u64,
}

impl FfmpegWriter {
    pub fn open(spec: &RecordingSpec) -> Result<Self, EncoderError> {
        if spec.fourcc != MJPG {
            return Err(EncoderError::Codec(String::from_utf8_lossy(&spec.fourcc).into_owned()));
        }

        let size = format!("{}x{}", spec.resolution.width, spec.resolution.height);
        let fps_str = spec.fps.to_string();

        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-loglevel", "error"])
            .args(["-f", "rawvideo"])
            .args(["-pix_fmt", spec.pixel_format.ffmpeg_name()])
            .args(["-s", &size])
            .args(["-r", &fps_str])
            .args(["-i", "pipe:0"])
            .args(["-c:v", "mjpeg", "-vtag", "MJPG", "-q:v", "3"])
            .arg("-y")
            .arg(&spec.path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| EncoderError::Spawn(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EncoderError::Spawn("could not get stdin handle".into()))?;

        debug!(
            fps = spec.fps,
            size,
            pix_fmt = spec.pixel_format.ffmpeg_name(),
            output = spec.path.display().to_string(),
            "ffmpeg writer started"
        );

        Ok(Self {
            child: Some(child),
            stdin: Some(stdin),
            output_path: spec.path.clone(),
            resolution: spec.resolution,
            pixel_format: spec.pixel_format,
            frame_count: 0,
        })
    }
}

impl VideoSink for FfmpegWriter {
    fn write(&mut self, frame: &Frame) -> Result<(), EncoderError> {
        let stdin = self.stdin.as_mut().ok_or(EncoderError::Released)?;
        if frame.width != self.resolution.width
            || frame.height != self.resolution.height
            || frame.format != self.pixel_format
        {
            return Err(EncoderError::FrameMismatch {
                got_width: frame.width,
                got_height: frame.height,
                got_format: frame.format,
                width: self.resolution.width,
                height: self.resolution.height,
                format: self.pixel_format,
            });
        }
        stdin
            .write_all(frame.data())
            .map_err(|e| EncoderError::Write(e.to_string()))?;
        self.frame_count += 1;
        debug!(frame_count = self.frame_count, seq = frame.seq, "wrote frame to video");
        Ok(())
    }

    fn release(&mut self) -> Result<(), EncoderError> {
        // Close stdin so ffmpeg knows there are no more frames.
        drop(self.stdin.take());
        let Some(child) = self.child.take() else {
            return Ok(());
        };

        let output = child
            .wait_with_output()
            .map_err(|e| EncoderError::Wait(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(stderr = %stderr, "ffmpeg exited with error");
            return Err(EncoderError::FfmpegFailed(stderr.into_owned()));
        }

        info!(
            frame_count = self.frame_count,
            output = self.output_path.display().to_string(),
            "video file finalized"
        );
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.output_path
    }

    fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

impl Drop for FfmpegWriter {
    fn drop(&mut self) {
        if self.child.is_some() {
            if let Err(e) = self.release() {
                warn!(error = %e, "failed to finalize video on drop");
            }
        }
    }
}

/// Check whether ffmpeg is available on PATH. Logs a warning if not found.
pub fn check_ffmpeg_available() -> bool {
    match Command::new("ffmpeg").arg("-version").output() {
        Ok(out) if out.status.success() => {
            debug!("ffmpeg is available");
            true
        }
        Ok(_) => {
            warn!("ffmpeg returned non-zero for -version; recording may fail");
            false
        }
        Err(e) => {
            warn!(
                error = %e,
                "ffmpeg not found on PATH; recording will fail. \
                 Install ffmpeg with MJPEG support."
            );
            false
        }
    }
}
