use std::thread;
use std::time::{Duration, Instant};

use stereo_stream_common::frame::{Frame, PixelFormat};
use tracing::debug;

use super::{
    CameraInformation, DeviceError, ErrorCode, InitParameters, Resolution, RuntimeParameters,
    StereoCamera, View,
};

/// Horizontal shift of the right view, in pixels.
const DISPARITY: u32 = 8;

/// Software camera producing a moving BGRA test pattern.
///
/// Grabs are paced the way a real sensor blocks until its next exposure is
/// ready. `max_fps` is the fastest the pattern runs; the rate requested at
/// open lowers it, never raises it.
pub struct SyntheticCamera {
    max_fps: f64,
    fps: f64,
    reports_fps: bool,
    resolution: Resolution,
    opened: bool,
    tick: u64,
    grabbed: Option<u64>,
    next_deadline: Option<Instant>,
}

impl SyntheticCamera {
    pub fn new(max_fps: f64) -> Self {
        Self {
            max_fps,
            fps: max_fps,
            reports_fps: true,
            resolution: Resolution::new(0, 0),
            opened: false,
            tick: 0,
            grabbed: None,
            next_deadline: None,
        }
    }

    /// Make `camera_fps` return 0, like a device that cannot report its rate.
    pub fn without_reported_fps(mut self) -> Self {
        self.reports_fps = false;
        self
    }

    fn period(&self) -> Duration {
        if self.fps > 0.0 {
            Duration::from_secs_f64(1.0 / self.fps)
        } else {
            Duration::ZERO
        }
    }

    fn render(&self, tick: u64, view: View) -> Vec<u8> {
        let Resolution { width, height } = self.resolution;
        let shift = match view {
            View::Left => 0,
            View::Right => DISPARITY,
        };
        let phase = tick as u32;
        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        for y in 0..height {
            for x in 0..width {
                let sx = x.wrapping_add(shift);
                let b = (sx.wrapping_add(phase)) as u8;
                let g = (y.wrapping_add(phase)) as u8;
                let r = (sx ^ y) as u8;
                data.extend_from_slice(&[b, g, r, 255]);
            }
        }
        data
    }
}

impl StereoCamera for SyntheticCamera {
    fn open(&mut self, params: &InitParameters) -> ErrorCode {
        let Resolution { width, height } = params.resolution;
        if width == 0 || height == 0 {
            return ErrorCode::InvalidResolution;
        }
        self.fps = match params.camera_fps {
            0 => self.max_fps,
            requested => self.max_fps.min(f64::from(requested)),
        };
        self.resolution = params.resolution;
        self.opened = true;
        self.next_deadline = None;
        debug!(width, height, fps = self.fps, "synthetic camera opened");
        ErrorCode::Success
    }

    fn grab(&mut self, _runtime: &RuntimeParameters) -> ErrorCode {
        if !self.opened {
            return ErrorCode::CameraNotInitialized;
        }
        let period = self.period();
        let now = Instant::now();
        match self.next_deadline {
            Some(deadline) if now < deadline => {
                thread::sleep(deadline - now);
                self.next_deadline = Some(deadline + period);
            }
            _ => self.next_deadline = Some(now + period),
        }
        self.tick += 1;
        self.grabbed = Some(self.tick);
        ErrorCode::Success
    }

    fn retrieve_image(&mut self, view: View) -> Result<Frame, DeviceError> {
        if !self.opened {
            return Err(DeviceError::Closed);
        }
        let tick = self.grabbed.ok_or(DeviceError::NotGrabbed)?;
        let Resolution { width, height } = self.resolution;
        let frame = Frame::now(self.render(tick, view), width, height, PixelFormat::Bgra8, tick)?;
        Ok(frame)
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn camera_fps(&self) -> f64 {
        if self.reports_fps {
            self.fps
        } else {
            0.0
        }
    }

    fn camera_information(&self) -> CameraInformation {
        CameraInformation {
            firmware_version: "synthetic-1".into(),
            serial_number: "0".into(),
        }
    }

    fn is_opened(&self) -> bool {
        self.opened
    }

    fn close(&mut self) {
        if self.opened {
            debug!(ticks = self.tick, "synthetic camera closed");
        }
        self.opened = false;
        self.grabbed = None;
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}
