use std::path::{Path, PathBuf};
use std::time::Duration;

use stereo_stream::device;
use stereo_stream::recorder::check_ffmpeg_available;
use stereo_stream::{FrameStreamer, StreamError, StreamOptions};
use stereo_stream_common::config::Config;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Base name handed to the archive for snapshots; the archive numbers them.
const SNAPSHOT_NAME: &str = "frame.jpg";

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        source = config.camera.source,
        view = config.camera.view,
        save_to_file = config.output.save_to_file,
        snapshot_interval_secs = config.archive.snapshot_interval_secs,
        "starting stereo-stream capture"
    );

    if config.output.save_to_file {
        check_ffmpeg_available();
    }

    let options = match StreamOptions::from_config(&config) {
        Ok(o) => o,
        Err(e) => {
            error!(error = %e, "invalid stream options");
            std::process::exit(1);
        }
    };

    // Camera backends block, so open and start off the async workers.
    let camera_config = config.camera.clone();
    let started = tokio::task::spawn_blocking(move || {
        let camera = device::from_config(&camera_config).map_err(StreamError::from)?;
        FrameStreamer::start(camera, &options)
    })
    .await;

    let mut streamer = match started {
        Ok(Ok(s)) => s,
        Ok(Err(e)) => {
            error!(error = %e, "failed to start stream");
            std::process::exit(1);
        }
        Err(e) => {
            error!(error = %e, "stream startup task failed");
            std::process::exit(1);
        }
    };

    let (width, height) = streamer.size();
    info!(width, height, "stream running");

    run(&mut streamer, &config).await;

    info!(
        polled = streamer.frames_polled(),
        recorded = streamer.frames_recorded(),
        "shutting down"
    );
    match tokio::task::spawn_blocking(move || streamer.stop()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "failed to stop stream cleanly"),
        Err(e) => error!(error = %e, "stream shutdown task failed"),
    }
}

/// Drive recording and snapshots until Ctrl-C or the stream dies.
async fn run(streamer: &mut FrameStreamer, config: &Config) {
    let record_period = streamer
        .recording_fps()
        .filter(|fps| *fps > 0.0)
        .map(|fps| Duration::from_secs_f64(1.0 / fps));
    let mut record_tick = interval(record_period.unwrap_or(Duration::from_secs(1)));
    record_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let snapshots = config.archive.snapshot_interval_secs > 0;
    let mut snapshot_tick =
        interval(Duration::from_secs(config.archive.snapshot_interval_secs.max(1)));
    snapshot_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut health_tick = interval(Duration::from_secs(1));
    let mut frames = streamer.subscribe();
    let mut live: u64 = 0;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupt received");
                break;
            }
            _ = record_tick.tick(), if record_period.is_some() => {
                let frame = streamer.read();
                if let Err(e) = tokio::task::block_in_place(|| streamer.save(&frame)) {
                    warn!(error = %e, seq = frame.seq, "failed to record frame");
                }
            }
            _ = snapshot_tick.tick(), if snapshots => {
                let frame = streamer.read();
                let label = &config.archive.snapshot_label;
                match tokio::task::block_in_place(|| {
                    streamer.save_detection_image(label, &frame, Path::new(SNAPSHOT_NAME))
                }) {
                    Ok(path) => info!(path = %path.display(), seq = frame.seq, "snapshot archived"),
                    Err(e) => warn!(error = %e, "failed to archive snapshot"),
                }
            }
            changed = frames.changed() => {
                if changed.is_err() {
                    break;
                }
                live += 1;
                if live % 100 == 0 {
                    debug!(live, seq = frames.borrow_and_update().seq, "frames received");
                }
            }
            _ = health_tick.tick() => {
                if let Some(fault) = streamer.fault() {
                    error!(error = fault.message, at_ms = fault.at_ms, "camera polling stopped");
                    break;
                }
            }
        }
    }
}
