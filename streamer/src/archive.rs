use std::collections::HashMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};

use stereo_stream_common::frame::Frame;
use tracing::debug;

use crate::recorder::keys::detection_file_name;

/// Extensions accepted for archived images.
const EXTENSIONS: [&str; 3] = [".jpg", ".jpeg", ".png"];

/// Writes labelled detection images under `<image_dir>/<label>/`.
///
/// File names come from the source path's base name plus a per-name counter,
/// so saving the same source twice yields `img_1.jpg` then `img_2.jpg`.
/// Counters live as long as the archive and are never reset.
pub struct DetectionArchive {
    image_dir: PathBuf,
    counters: HashMap<String, u32>,
}

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("{0:?} has no file name")]
    NoFileName(PathBuf),
    #[error("unsupported image extension in {0:?}, expected .jpg, .jpeg or .png")]
    UnsupportedExtension(String),
    #[error("failed to create {0}: {1}")]
    CreateDir(String, std::io::Error),
    #[error("failed to write {0}: {1}")]
    Write(String, image::ImageError),
}

impl DetectionArchive {
    pub fn new(image_dir: impl Into<PathBuf>) -> Self {
        Self {
            image_dir: image_dir.into(),
            counters: HashMap::new(),
        }
    }

    pub fn image_dir(&self) -> &Path {
        &self.image_dir
    }

    /// How many images were archived under this base name.
    pub fn count(&self, file_name: &str) -> u32 {
        self.counters.get(file_name).copied().unwrap_or(0)
    }

    /// Archive `image` and return the path it was written to.
    pub fn save(
        &mut self,
        label: impl Display,
        image: &Frame,
        path: &Path,
    ) -> Result<PathBuf, ArchiveError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ArchiveError::NoFileName(path.to_path_buf()))?;
        let (stem, ext) = split_extension(file_name)
            .ok_or_else(|| ArchiveError::UnsupportedExtension(file_name.to_string()))?;

        let label = label.to_string();
        let label_dir = self.image_dir.join(&label);
        std::fs::create_dir_all(&label_dir)
            .map_err(|e| ArchiveError::CreateDir(label_dir.display().to_string(), e))?;

        let counter = self.counters.entry(file_name.to_string()).or_insert(0);
        *counter += 1;
        let n = *counter;

        let target = self.image_dir.join(detection_file_name(&label, stem, n, ext));
        let result = match image.to_gray_image() {
            Some(gray) => gray.save(&target),
            None => image.to_rgb_image().save(&target),
        };
        result.map_err(|e| ArchiveError::Write(target.display().to_string(), e))?;

        debug!(label, n, path = %target.display(), "detection image archived");
        Ok(target)
    }
}

/// Split "img.jpeg" into ("img", ".jpeg") for the accepted extensions.
fn split_extension(file_name: &str) -> Option<(&str, &'static str)> {
    EXTENSIONS
        .iter()
        .find_map(|&ext| file_name.strip_suffix(ext).map(|stem| (stem, ext)))
        .filter(|(stem, _)| !stem.is_empty())
}
