use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    /// Backend to open: "synthetic" or "http".
    #[serde(default = "default_source")]
    pub source: String,
    /// Single-frame endpoint, only read by the "http" source.
    #[serde(default)]
    pub url: Option<String>,
    /// Requested resolution. Advisory: the device reports the real one.
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// Acquisition rate requested when opening the device.
    #[serde(default = "default_camera_fps")]
    pub fps: u32,
    #[serde(default = "default_view")]
    pub view: String,
    /// Pacing of the synthetic pattern generator.
    #[serde(default = "default_synthetic_fps")]
    pub synthetic_fps: f64,
    /// When false the synthetic camera reports an unknown rate (0).
    #[serde(default = "default_report_fps")]
    pub report_fps: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_image_dir")]
    pub image_dir: PathBuf,
    #[serde(default = "default_movie_dir")]
    pub movie_dir: PathBuf,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub save_to_file: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    /// Seconds between archived snapshots of the live frame. 0 disables.
    #[serde(default)]
    pub snapshot_interval_secs: u64,
    #[serde(default = "default_snapshot_label")]
    pub snapshot_label: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            url: None,
            width: default_width(),
            height: default_height(),
            fps: default_camera_fps(),
            view: default_view(),
            synthetic_fps: default_synthetic_fps(),
            report_fps: default_report_fps(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            image_dir: default_image_dir(),
            movie_dir: default_movie_dir(),
            prefix: default_prefix(),
            save_to_file: false,
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            snapshot_interval_secs: 0,
            snapshot_label: default_snapshot_label(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        let config = Self::from_toml(&content)?;
        debug!(path = %path.display(), source = config.camera.source, "config loaded");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let cam = &self.camera;
        match cam.source.as_str() {
            "synthetic" => {}
            "http" => {
                if cam.url.as_deref().map_or(true, str::is_empty) {
                    return Err(ConfigError::Invalid(
                        "camera.url is required for the http source".into(),
                    ));
                }
            }
            other => {
                return Err(ConfigError::Invalid(format!(
                    "unknown camera.source {other:?}, expected \"synthetic\" or \"http\""
                )))
            }
        }
        if !matches!(cam.view.as_str(), "left" | "right") {
            return Err(ConfigError::Invalid(format!(
                "unknown camera.view {:?}, expected \"left\" or \"right\"",
                cam.view
            )));
        }
        if cam.width == 0 || cam.height == 0 {
            return Err(ConfigError::Invalid("camera width and height must be nonzero".into()));
        }
        if cam.fps == 0 {
            return Err(ConfigError::Invalid("camera.fps must be nonzero".into()));
        }
        if !(cam.synthetic_fps > 0.0) {
            return Err(ConfigError::Invalid("camera.synthetic_fps must be positive".into()));
        }
        if self.output.prefix.is_empty() {
            return Err(ConfigError::Invalid("output.prefix must not be empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_source() -> String {
    "synthetic".into()
}
fn default_width() -> u32 {
    1280
}
fn default_height() -> u32 {
    720
}
fn default_camera_fps() -> u32 {
    60
}
fn default_view() -> String {
    "left".into()
}
fn default_synthetic_fps() -> f64 {
    30.0
}
fn default_report_fps() -> bool {
    true
}
fn default_image_dir() -> PathBuf {
    PathBuf::from("output_image")
}
fn default_movie_dir() -> PathBuf {
    PathBuf::from("output_movie")
}
fn default_prefix() -> String {
    "output".into()
}
fn default_snapshot_label() -> String {
    "snapshot".into()
}
fn default_log_level() -> String {
    "info".into()
}
