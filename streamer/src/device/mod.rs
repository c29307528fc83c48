pub mod http;
pub mod synthetic;

use std::fmt;

use stereo_stream_common::config::CameraConfig;
use stereo_stream_common::frame::{Frame, FrameError};

pub use http::HttpCamera;
pub use synthetic::SyntheticCamera;

/// Status codes returned by `open` and `grab`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Success,
    Failure,
    CameraNotDetected,
    CameraNotInitialized,
    InvalidResolution,
    LowUsbBandwidth,
    CorruptedFrame,
    Timeout,
    EndOfStream,
}

impl ErrorCode {
    pub fn is_success(self) -> bool {
        self == ErrorCode::Success
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::Success => "SUCCESS",
            ErrorCode::Failure => "FAILURE",
            ErrorCode::CameraNotDetected => "CAMERA NOT DETECTED",
            ErrorCode::CameraNotInitialized => "CAMERA NOT INITIALIZED",
            ErrorCode::InvalidResolution => "INVALID RESOLUTION",
            ErrorCode::LowUsbBandwidth => "LOW USB BANDWIDTH",
            ErrorCode::CorruptedFrame => "CORRUPTED FRAME",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::EndOfStream => "END OF STREAM",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Parameters applied once when the device is opened.
#[derive(Debug, Clone)]
pub struct InitParameters {
    pub camera_fps: u32,
    /// Requested resolution. The device may negotiate a different one.
    pub resolution: Resolution,
}

impl Default for InitParameters {
    fn default() -> Self {
        Self {
            camera_fps: 60,
            resolution: Resolution::new(1280, 720),
        }
    }
}

/// Per-grab parameters. None of the backends take any yet.
#[derive(Debug, Clone, Default)]
pub struct RuntimeParameters {}

/// Which sensor of the stereo pair to retrieve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum View {
    #[default]
    Left,
    Right,
}

impl std::str::FromStr for View {
    type Err = DeviceConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left" => Ok(View::Left),
            "right" => Ok(View::Right),
            other => Err(DeviceConfigError::UnknownView(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraInformation {
    pub firmware_version: String,
    pub serial_number: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("no grabbed image to retrieve")]
    NotGrabbed,
    #[error("camera is closed")]
    Closed,
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl DeviceError {
    /// Whether the next grab may succeed where this retrieve failed.
    pub fn is_transient(&self) -> bool {
        matches!(self, DeviceError::NotGrabbed | DeviceError::Decode(_))
    }
}

/// Camera settings that do not name a usable backend.
#[derive(Debug, thiserror::Error)]
pub enum DeviceConfigError {
    #[error("unknown camera source {0:?}, expected \"synthetic\" or \"http\"")]
    UnknownSource(String),
    #[error("camera.url is required for the http source")]
    MissingUrl,
    #[error("unknown view {0:?}, expected \"left\" or \"right\"")]
    UnknownView(String),
}

/// A stereo camera as seen through its vendor SDK.
///
/// `grab` captures a new image pair inside the device; `retrieve_image` copies
/// the most recently grabbed image of one view out as a [`Frame`].
pub trait StereoCamera: Send {
    fn open(&mut self, params: &InitParameters) -> ErrorCode;

    /// Blocks until a new image pair is available or the device gives up.
    fn grab(&mut self, runtime: &RuntimeParameters) -> ErrorCode;

    fn retrieve_image(&mut self, view: View) -> Result<Frame, DeviceError>;

    /// Resolution negotiated at open.
    fn resolution(&self) -> Resolution;

    /// Acquisition rate reported by the device, 0 when unknown.
    fn camera_fps(&self) -> f64;

    fn camera_information(&self) -> CameraInformation;

    fn is_opened(&self) -> bool;

    /// Release the device. Calling it on a closed device does nothing.
    fn close(&mut self);

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "camera"
    }
}

/// Build the backend named by `camera.source`.
///
/// The requested `camera.fps` reaches the backend later, through
/// [`InitParameters`] at open.
pub fn from_config(config: &CameraConfig) -> Result<Box<dyn StereoCamera>, DeviceConfigError> {
    match config.source.as_str() {
        "synthetic" => {
            let mut cam = SyntheticCamera::new(config.synthetic_fps);
            if !config.report_fps {
                cam = cam.without_reported_fps();
            }
            Ok(Box::new(cam))
        }
        "http" => {
            let url = config.url.clone().ok_or(DeviceConfigError::MissingUrl)?;
            Ok(Box::new(HttpCamera::new(url)))
        }
        other => Err(DeviceConfigError::UnknownSource(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_display() {
        assert_eq!(ErrorCode::CameraNotDetected.to_string(), "CAMERA NOT DETECTED");
        assert!(ErrorCode::Success.is_success());
        assert!(!ErrorCode::Timeout.is_success());
    }

    #[test]
    fn view_parses() {
        assert_eq!("left".parse::<View>().unwrap(), View::Left);
        assert_eq!("right".parse::<View>().unwrap(), View::Right);
        let err = "depth".parse::<View>().unwrap_err();
        assert!(matches!(err, DeviceConfigError::UnknownView(ref v) if v == "depth"));
    }

    #[test]
    fn decode_failures_are_transient() {
        assert!(DeviceError::Decode("truncated jpeg".into()).is_transient());
        assert!(DeviceError::NotGrabbed.is_transient());
        assert!(!DeviceError::Closed.is_transient());
    }

    #[test]
    fn builds_backend_from_config() {
        let config = CameraConfig::default();
        let cam = from_config(&config).unwrap();
        assert_eq!(cam.name(), "synthetic");
        assert!(!cam.is_opened());

        let http = CameraConfig {
            source: "http".into(),
            url: None,
            ..CameraConfig::default()
        };
        assert!(matches!(from_config(&http), Err(DeviceConfigError::MissingUrl)));

        let usb = CameraConfig {
            source: "usb".into(),
            ..CameraConfig::default()
        };
        let err = from_config(&usb).err().unwrap();
        assert!(matches!(err, DeviceConfigError::UnknownSource(ref s) if s == "usb"));
        assert!(err.to_string().contains("usb"));
    }

    #[test]
    fn synthetic_rate_is_capped_by_requested_fps() {
        let config = CameraConfig {
            synthetic_fps: 30.0,
            ..CameraConfig::default()
        };
        let mut cam = from_config(&config).unwrap();
        let params = InitParameters {
            camera_fps: 15,
            resolution: Resolution::new(8, 4),
        };
        assert_eq!(cam.open(&params), ErrorCode::Success);
        assert_eq!(cam.camera_fps(), 15.0);

        let hidden = CameraConfig {
            report_fps: false,
            ..CameraConfig::default()
        };
        assert_eq!(from_config(&hidden).unwrap().camera_fps(), 0.0);
    }
}
