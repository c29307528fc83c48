use std::any::Any;
use std::fmt::Display;
use std::ops::{Deref, DerefMut};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use stereo_stream_common::config::Config;
use stereo_stream_common::frame::Frame;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use crate::archive::{ArchiveError, DetectionArchive};
use crate::device::{
    CameraInformation, DeviceConfigError, DeviceError, ErrorCode, InitParameters, Resolution, RuntimeParameters,
    StereoCamera, View,
};
use crate::fps::resolve_fps;
use crate::recorder::{keys, EncoderError, FfmpegWriter, RecordingSpec, VideoSink, MJPG};
use crate::slot::FrameSlot;

/// How to open and run a stream.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Requested resolution; the device has the final word.
    pub width: u32,
    pub height: u32,
    /// Acquisition rate requested at open.
    pub camera_fps: u32,
    pub view: View,
    pub image_dir: PathBuf,
    pub movie_dir: PathBuf,
    pub prefix: String,
    pub save_to_file: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            camera_fps: 60,
            view: View::Left,
            image_dir: PathBuf::from("output_image"),
            movie_dir: PathBuf::from("output_movie"),
            prefix: "output".into(),
            save_to_file: false,
        }
    }
}

impl StreamOptions {
    pub fn from_config(config: &Config) -> Result<Self, StreamError> {
        let view = config.camera.view.parse()?;
        Ok(Self {
            width: config.camera.width,
            height: config.camera.height,
            camera_fps: config.camera.fps,
            view,
            image_dir: config.output.image_dir.clone(),
            movie_dir: config.output.movie_dir.clone(),
            prefix: config.output.prefix.clone(),
            save_to_file: config.output.save_to_file,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("couldn't open stereo camera: {0}")]
    Open(ErrorCode),
    #[error("couldn't grab first frame: {0}")]
    InitialGrab(ErrorCode),
    #[error("couldn't retrieve first frame: {0}")]
    Retrieve(#[from] DeviceError),
    #[error("failed to create movie directory {0}: {1}")]
    CreateDir(String, std::io::Error),
    #[error("failed to spawn polling thread: {0}")]
    Spawn(std::io::Error),
    #[error("recording was not enabled when the stream started")]
    NotRecording,
    #[error("invalid camera settings: {0}")]
    Device(#[from] DeviceConfigError),
    #[error(transparent)]
    Encoder(#[from] EncoderError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

/// What stopped the polling task when it did not stop on request.
#[derive(Debug, Clone)]
pub struct PollFault {
    pub message: String,
    pub at_ms: i64,
}

/// Closes the camera when dropped, however the owner exits.
struct CameraGuard(Box<dyn StereoCamera>);

impl Deref for CameraGuard {
    type Target = dyn StereoCamera;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl DerefMut for CameraGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.0
    }
}

impl Drop for CameraGuard {
    fn drop(&mut self) {
        if self.0.is_opened() {
            debug!(camera = self.0.name(), "closing camera");
        }
        self.0.close();
    }
}

/// Keeps the latest frame of a stereo camera available to any reader.
///
/// `start` opens the camera, captures one frame synchronously, then hands the
/// camera to a polling thread that republishes every successfully grabbed
/// frame. Readers call [`read`](Self::read) and get whatever frame is current.
/// Recording and detection archiving are driven by the caller.
pub struct FrameStreamer {
    slot: Arc<FrameSlot>,
    running: Arc<AtomicBool>,
    fault: Arc<Mutex<Option<PollFault>>>,
    poller: Option<JoinHandle<()>>,
    writer: Option<Box<dyn VideoSink>>,
    archive: DetectionArchive,
    resolution: Resolution,
    info: CameraInformation,
    recording_fps: Option<f64>,
}

impl FrameStreamer {
    /// Start streaming, recording to an ffmpeg-backed AVI when
    /// `options.save_to_file` is set.
    pub fn start(
        camera: Box<dyn StereoCamera>,
        options: &StreamOptions,
    ) -> Result<Self, StreamError> {
        Self::start_with_sink(camera, options, |spec| {
            Ok(Box::new(FfmpegWriter::open(spec)?) as Box<dyn VideoSink>)
        })
    }

    /// Like [`start`](Self::start), with the video sink built by `open_sink`.
    pub fn start_with_sink<F>(
        camera: Box<dyn StereoCamera>,
        options: &StreamOptions,
        open_sink: F,
    ) -> Result<Self, StreamError>
    where
        F: FnOnce(&RecordingSpec) -> Result<Box<dyn VideoSink>, EncoderError>,
    {
        let mut camera = camera;
        let init = InitParameters {
            camera_fps: options.camera_fps,
            resolution: Resolution::new(options.width, options.height),
        };
        info!(camera = camera.name(), fps = init.camera_fps, "opening camera");
        let status = camera.open(&init);
        if !status.is_success() {
            error!(%status, "camera failed to open");
            return Err(StreamError::Open(status));
        }
        // From here on the camera is closed on every exit path.
        let mut camera = CameraGuard(camera);

        let info = camera.camera_information();
        let reported = camera.resolution();
        info!(
            width = reported.width,
            height = reported.height,
            camera_fps = camera.camera_fps(),
            firmware = info.firmware_version,
            serial = info.serial_number,
            "camera information"
        );

        let runtime = RuntimeParameters::default();
        let status = camera.grab(&runtime);
        if !status.is_success() {
            error!(%status, "first grab failed");
            return Err(StreamError::InitialGrab(status));
        }
        let initial = camera.retrieve_image(options.view)?;
        let resolution = camera.resolution();
        info!(
            width = resolution.width,
            height = resolution.height,
            "started video stream"
        );

        let mut writer = None;
        let mut recording_fps = None;
        if options.save_to_file {
            std::fs::create_dir_all(&options.movie_dir).map_err(|e| {
                StreamError::CreateDir(options.movie_dir.display().to_string(), e)
            })?;
            let fps = resolve_fps(&mut *camera, &runtime, Instant::now);
            let spec = RecordingSpec {
                path: keys::movie_path(&options.movie_dir, &options.prefix),
                fourcc: MJPG,
                fps,
                resolution,
                pixel_format: initial.format,
            };
            info!(path = %spec.path.display(), fps, "recording enabled");
            writer = Some(open_sink(&spec)?);
            recording_fps = Some(fps);
        }

        let slot = Arc::new(FrameSlot::new(initial));
        let running = Arc::new(AtomicBool::new(true));
        let fault = Arc::new(Mutex::new(None));

        let poller = {
            let slot = Arc::clone(&slot);
            let running = Arc::clone(&running);
            let fault = Arc::clone(&fault);
            let view = options.view;
            thread::Builder::new()
                .name("frame-poller".into())
                .spawn(move || poll(camera, view, &running, &slot, &fault))
        };
        let poller = match poller {
            Ok(handle) => handle,
            Err(e) => {
                // The closure, and with it the camera, was dropped.
                running.store(false, Ordering::Release);
                if let Some(mut w) = writer {
                    if let Err(re) = w.release() {
                        warn!(error = %re, "failed to release video writer");
                    }
                }
                return Err(StreamError::Spawn(e));
            }
        };

        Ok(Self {
            slot,
            running,
            fault,
            poller: Some(poller),
            writer,
            archive: DetectionArchive::new(options.image_dir.clone()),
            resolution,
            info,
            recording_fps,
        })
    }

    /// The most recent frame. Never blocks on the polling thread; the frame
    /// may be replaced right after it is returned.
    pub fn read(&self) -> Arc<Frame> {
        self.slot.load()
    }

    /// Watch the current frame from async code.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Frame>> {
        self.slot.subscribe()
    }

    /// Append one frame to the movie opened at start.
    pub fn save(&mut self, frame: &Frame) -> Result<(), StreamError> {
        let writer = self.writer.as_mut().ok_or(StreamError::NotRecording)?;
        writer.write(frame)?;
        Ok(())
    }

    /// Archive `image` as `<image_dir>/<label>/<stem>_<n><ext>`, where stem and
    /// extension come from the base name of `path`.
    pub fn save_detection_image(
        &mut self,
        label: impl Display,
        image: &Frame,
        path: &Path,
    ) -> Result<PathBuf, StreamError> {
        Ok(self.archive.save(label, image, path)?)
    }

    /// Negotiated resolution as (width, height).
    pub fn size(&self) -> (u32, u32) {
        (self.resolution.width, self.resolution.height)
    }

    pub fn camera_information(&self) -> &CameraInformation {
        &self.info
    }

    /// Rate the movie is being recorded at, if recording.
    pub fn recording_fps(&self) -> Option<f64> {
        self.recording_fps
    }

    pub fn movie_path(&self) -> Option<&Path> {
        self.writer.as_ref().map(|w| w.path())
    }

    pub fn frames_recorded(&self) -> u64 {
        self.writer.as_ref().map_or(0, |w| w.frame_count())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Frames published by the polling thread, the initial one excluded.
    pub fn frames_polled(&self) -> u64 {
        self.slot.published().saturating_sub(1)
    }

    /// Set when the polling thread died on its own.
    pub fn fault(&self) -> Option<PollFault> {
        self.fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stop polling, close the camera and finalize the movie.
    ///
    /// The polling thread is joined before anything is released, so the camera
    /// is never closed under an in-flight grab. Safe to call more than once.
    pub fn stop(&mut self) -> Result<(), StreamError> {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.poller.take() {
            if handle.join().is_err() {
                warn!("polling thread panicked outside the poll loop");
            }
            info!(frames = self.frames_polled(), "video stream stopped");
        }
        if let Some(mut writer) = self.writer.take() {
            writer.release()?;
        }
        Ok(())
    }
}

impl Drop for FrameStreamer {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "failed to stop stream cleanly");
        }
    }
}

/// Body of the polling thread. Owns the camera and closes it on exit.
fn poll(
    mut camera: CameraGuard,
    view: View,
    running: &AtomicBool,
    slot: &FrameSlot,
    fault: &Mutex<Option<PollFault>>,
) {
    let runtime = RuntimeParameters::default();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        run_poll(&mut *camera, view, &runtime, running, slot)
    }));

    let message = match outcome {
        Ok(Ok(stats)) => {
            debug!(published = stats.published, missed = stats.missed, "poll loop exited");
            None
        }
        Ok(Err(e)) => Some(e.to_string()),
        Err(payload) => Some(panic_message(payload.as_ref())),
    };

    // The fault is visible and the flag cleared before the handle closes.
    if let Some(message) = message {
        error!(error = message, "polling failed, stream is now stale");
        *fault.lock().unwrap_or_else(PoisonError::into_inner) = Some(PollFault {
            message,
            at_ms: chrono::Utc::now().timestamp_millis(),
        });
        running.store(false, Ordering::Release);
    }

    drop(camera);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct PollStats {
    published: u64,
    missed: u64,
}

/// Grab until `running` clears. Failed grabs and undecodable or missing
/// images keep the previous frame; a closed handle ends the loop.
fn run_poll(
    camera: &mut dyn StereoCamera,
    view: View,
    runtime: &RuntimeParameters,
    running: &AtomicBool,
    slot: &FrameSlot,
) -> Result<PollStats, DeviceError> {
    let mut stats = PollStats::default();
    while running.load(Ordering::Acquire) {
        let status = camera.grab(runtime);
        if status.is_success() {
            match camera.retrieve_image(view) {
                Ok(frame) => {
                    trace!(seq = frame.seq, "frame published");
                    slot.publish(frame);
                    stats.published += 1;
                }
                Err(e) if e.is_transient() => {
                    stats.missed += 1;
                    warn!(
                        error = %e,
                        missed = stats.missed,
                        "retrieve failed, keeping previous frame"
                    );
                }
                Err(e) => return Err(e),
            }
        } else {
            stats.missed += 1;
            trace!(%status, missed = stats.missed, "grab missed");
        }
    }
    Ok(stats)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic in polling thread".into()
    }
}
