use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::device::{RuntimeParameters, StereoCamera};

/// Grabs timed when the device cannot report its own rate.
pub const BURST_FRAMES: u32 = 120;

/// Frames per second for `frames` captured over `elapsed`. Zero if no time passed.
pub fn fps_from_burst(frames: u32, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    f64::from(frames) / secs
}

/// Time `frames` synchronous grabs and derive a rate from the wall clock.
///
/// Every grab counts, whatever status it reports. `now` is the clock, so
/// callers can substitute a simulated one.
pub fn estimate_fps(
    camera: &mut dyn StereoCamera,
    runtime: &RuntimeParameters,
    frames: u32,
    mut now: impl FnMut() -> Instant,
) -> f64 {
    let start = now();
    let mut failed = 0u32;
    for _ in 0..frames {
        if !camera.grab(runtime).is_success() {
            failed += 1;
        }
    }
    let elapsed = now().saturating_duration_since(start);
    debug!(frames, failed, elapsed_ms = elapsed.as_millis() as u64, "fps burst finished");
    fps_from_burst(frames, elapsed)
}

/// The device-reported rate when it has one, otherwise a burst estimate.
pub fn resolve_fps(
    camera: &mut dyn StereoCamera,
    runtime: &RuntimeParameters,
    now: impl FnMut() -> Instant,
) -> f64 {
    let reported = camera.camera_fps();
    if reported > 0.0 {
        return reported;
    }
    let fps = estimate_fps(camera, runtime, BURST_FRAMES, now);
    info!(fps, "estimated frames per second");
    fps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{
        CameraInformation, DeviceError, ErrorCode, InitParameters, Resolution, View,
    };
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use stereo_stream_common::frame::Frame;

    /// Each grab advances a shared simulated clock by a fixed step.
    struct SteppingCamera {
        clock: Arc<AtomicU64>,
        step: Duration,
        grabs: u32,
        reported: f64,
    }

    impl StereoCamera for SteppingCamera {
        fn open(&mut self, _params: &InitParameters) -> ErrorCode {
            ErrorCode::Success
        }
        fn grab(&mut self, _runtime: &RuntimeParameters) -> ErrorCode {
            self.clock.fetch_add(self.step.as_nanos() as u64, Ordering::SeqCst);
            self.grabs += 1;
            if self.grabs % 2 == 0 {
                ErrorCode::Success
            } else {
                ErrorCode::CorruptedFrame
            }
        }
        fn retrieve_image(&mut self, _view: View) -> Result<Frame, DeviceError> {
            Err(DeviceError::NotGrabbed)
        }
        fn resolution(&self) -> Resolution {
            Resolution::new(1, 1)
        }
        fn camera_fps(&self) -> f64 {
            self.reported
        }
        fn camera_information(&self) -> CameraInformation {
            CameraInformation {
                firmware_version: String::new(),
                serial_number: String::new(),
            }
        }
        fn is_opened(&self) -> bool {
            true
        }
        fn close(&mut self) {}
    }

    fn stepping(total: Duration, reported: f64) -> (SteppingCamera, Arc<AtomicU64>) {
        let clock = Arc::new(AtomicU64::new(0));
        let cam = SteppingCamera {
            clock: Arc::clone(&clock),
            step: total / BURST_FRAMES,
            grabs: 0,
            reported,
        };
        (cam, clock)
    }

    #[test]
    fn burst_rate() {
        assert!((fps_from_burst(120, Duration::from_secs(2)) - 60.0).abs() < 1e-9);
        assert_eq!(fps_from_burst(120, Duration::ZERO), 0.0);
    }

    #[test]
    fn estimate_uses_simulated_duration() {
        let d = Duration::from_millis(4_800);
        let (mut cam, clock) = stepping(d, 0.0);
        let base = Instant::now();
        let now = || base + Duration::from_nanos(clock.load(Ordering::SeqCst));
        let fps = resolve_fps(&mut cam, &RuntimeParameters::default(), now);
        assert_eq!(cam.grabs, BURST_FRAMES);
        assert!((fps - 120.0 / d.as_secs_f64()).abs() < 1e-6, "fps = {fps}");
    }

    #[test]
    fn reported_rate_skips_burst() {
        let (mut cam, clock) = stepping(Duration::from_secs(1), 15.0);
        let base = Instant::now();
        let now = || base + Duration::from_nanos(clock.load(Ordering::SeqCst));
        let fps = resolve_fps(&mut cam, &RuntimeParameters::default(), now);
        assert_eq!(fps, 15.0);
        assert_eq!(cam.grabs, 0);
    }
}
