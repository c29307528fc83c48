use std::sync::Arc;

use image::{GrayImage, RgbImage};

/// Memory layout of a frame's pixel buffer. Rows are tightly packed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 4 bytes per pixel, blue first. What stereo SDKs hand back for image views.
    Bgra8,
    Bgr8,
    Rgb8,
    Gray8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra8 => 4,
            PixelFormat::Bgr8 | PixelFormat::Rgb8 => 3,
            PixelFormat::Gray8 => 1,
        }
    }

    /// Name of this layout for ffmpeg's `-pix_fmt`.
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            PixelFormat::Bgra8 => "bgra",
            PixelFormat::Bgr8 => "bgr24",
            PixelFormat::Rgb8 => "rgb24",
            PixelFormat::Gray8 => "gray",
        }
    }
}

/// One image retrieved from a camera.
///
/// The pixel buffer is reference counted so a frame can be handed to many
/// readers without copying.
#[derive(Debug, Clone)]
pub struct Frame {
    data: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Device-assigned sequence number.
    pub seq: u64,
    /// Unix millis at retrieval.
    pub captured_at_ms: i64,
}

impl Frame {
    pub fn new(
        data: impl Into<Arc<[u8]>>,
        width: u32,
        height: u32,
        format: PixelFormat,
        seq: u64,
        captured_at_ms: i64,
    ) -> Result<Self, FrameError> {
        let data = data.into();
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if data.len() != expected {
            return Err(FrameError::BufferSize {
                got: data.len(),
                expected,
                width,
                height,
            });
        }
        Ok(Self {
            data,
            width,
            height,
            format,
            seq,
            captured_at_ms,
        })
    }

    /// Build a frame stamped with the current wall-clock time.
    pub fn now(
        data: impl Into<Arc<[u8]>>,
        width: u32,
        height: u32,
        format: PixelFormat,
        seq: u64,
    ) -> Result<Self, FrameError> {
        Self::new(data, width, height, format, seq, chrono::Utc::now().timestamp_millis())
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn row_stride(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Convert to an 8-bit RGB image for encoding with the `image` crate.
    pub fn to_rgb_image(&self) -> RgbImage {
        let rgb: Vec<u8> = match self.format {
            PixelFormat::Rgb8 => self.data.to_vec(),
            PixelFormat::Bgr8 => self
                .data
                .chunks_exact(3)
                .flat_map(|px| [px[2], px[1], px[0]])
                .collect(),
            PixelFormat::Bgra8 => self
                .data
                .chunks_exact(4)
                .flat_map(|px| [px[2], px[1], px[0]])
                .collect(),
            PixelFormat::Gray8 => self.data.iter().flat_map(|&v| [v, v, v]).collect(),
        };
        // Length was checked in `new`, so this cannot fail.
        RgbImage::from_raw(self.width, self.height, rgb)
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }

    /// Grayscale frames only.
    pub fn to_gray_image(&self) -> Option<GrayImage> {
        match self.format {
            PixelFormat::Gray8 => GrayImage::from_raw(self.width, self.height, self.data.to_vec()),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("pixel buffer is {got} bytes, expected {expected} for {width}x{height}")]
    BufferSize {
        got: usize,
        expected: usize,
        width: u32,
        height: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_buffer_size() {
        let err = Frame::new(vec![0u8; 10], 2, 2, PixelFormat::Rgb8, 0, 0).unwrap_err();
        assert!(matches!(err, FrameError::BufferSize { got: 10, expected: 12, .. }));
    }

    #[test]
    fn bgra_converts_to_rgb() {
        let frame = Frame::new(vec![10, 20, 30, 255, 1, 2, 3, 255], 2, 1, PixelFormat::Bgra8, 7, 0)
            .unwrap();
        assert_eq!(frame.row_stride(), 8);
        let rgb = frame.to_rgb_image();
        assert_eq!(rgb.as_raw(), &vec![30, 20, 10, 3, 2, 1]);
        assert!(frame.to_gray_image().is_none());
    }

    #[test]
    fn gray_expands_to_rgb() {
        let frame = Frame::new(vec![5, 9], 1, 2, PixelFormat::Gray8, 0, 0).unwrap();
        assert_eq!(frame.to_rgb_image().as_raw(), &vec![5, 5, 5, 9, 9, 9]);
        assert_eq!(frame.to_gray_image().unwrap().as_raw(), &vec![5, 9]);
    }

    #[test]
    fn clone_shares_buffer() {
        let frame = Frame::now(vec![0u8; 12], 2, 2, PixelFormat::Bgr8, 1).unwrap();
        let copy = frame.clone();
        assert_eq!(copy.data().as_ptr(), frame.data().as_ptr());
        assert!(copy.captured_at_ms > 0);
        assert_eq!(copy.size(), (2, 2));
        assert!(!copy.is_empty());
    }
}
