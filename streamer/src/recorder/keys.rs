use std::path::{Path, PathBuf};

/// Movie file name, e.g. "output_1532580366.27.avi".
pub fn movie_file_name(prefix: &str, unix_secs: f64) -> String {
    format!("{prefix}_{unix_secs}.avi")
}

/// Movie path inside `dir`, stamped with the current time.
pub fn movie_path(dir: &Path, prefix: &str) -> PathBuf {
    let now_secs = chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0;
    dir.join(movie_file_name(prefix, now_secs))
}

/// Archived detection image, relative to the image directory:
/// "<label>/<stem>_<n><ext>".
pub fn detection_file_name(label: &str, stem: &str, n: u32, ext: &str) -> PathBuf {
    Path::new(label).join(format!("{stem}_{n}{ext}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_movie_name_format() {
        assert_eq!(movie_file_name("output", 1532580366.27), "output_1532580366.27.avi");

        let p = movie_path(Path::new("output_movie"), "cam");
        let name = p.file_name().unwrap().to_str().unwrap();
        assert!(p.starts_with("output_movie"));
        assert!(name.starts_with("cam_"), "got {name}");
        assert!(name.ends_with(".avi"));
        let stamp: f64 = name["cam_".len()..name.len() - ".avi".len()].parse().unwrap();
        assert!(stamp > 1_500_000_000.0);
    }

    #[test]
    fn test_detection_name_format() {
        let p = detection_file_name("3", "img", 2, ".png");
        assert_eq!(p, Path::new("3").join("img_2.png"));
    }
}
