//! Latest-frame streaming for stereo cameras.
//!
//! [`FrameStreamer`] opens a [`StereoCamera`], keeps its most recent image in
//! a [`FrameSlot`] fed by a background polling thread, and optionally records
//! frames to an MJPEG `.avi` and archives labelled detection images.

pub mod archive;
pub mod device;
pub mod fps;
pub mod recorder;
pub mod slot;
pub mod stream;

pub use archive::{ArchiveError, DetectionArchive};
pub use device::{ErrorCode, StereoCamera, View};
pub use slot::FrameSlot;
pub use stereo_stream_common::frame::{Frame, PixelFormat};
pub use stream::{FrameStreamer, PollFault, StreamError, StreamOptions};
