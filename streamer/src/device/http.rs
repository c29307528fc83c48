use std::time::Duration;

use stereo_stream_common::frame::{Frame, PixelFormat};
use tracing::{debug, info, warn};

use super::{
    CameraInformation, DeviceError, ErrorCode, InitParameters, Resolution, RuntimeParameters,
    StereoCamera, View,
};

/// Camera behind an HTTP single-frame endpoint, e.g. `http://robot:8000/frame`.
///
/// Every grab fetches one JPEG (or PNG) snapshot. The endpoint serves a single
/// sensor, so both views return the same image. The device cannot report its
/// rate, so `camera_fps` is always 0.
pub struct HttpCamera {
    url: String,
    client: Option<reqwest::blocking::Client>,
    resolution: Resolution,
    grabbed: Option<Vec<u8>>,
    seq: u64,
    server: Option<String>,
}

impl HttpCamera {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: None,
            resolution: Resolution::new(0, 0),
            grabbed: None,
            seq: 0,
            server: None,
        }
    }

    fn fetch(&self) -> Result<Vec<u8>, ErrorCode> {
        let client = self.client.as_ref().ok_or(ErrorCode::CameraNotInitialized)?;
        let response = client.get(&self.url).send().map_err(|e| {
            debug!(error = %e, url = self.url, "frame request failed");
            if e.is_timeout() {
                ErrorCode::Timeout
            } else {
                ErrorCode::CameraNotDetected
            }
        })?;
        if !response.status().is_success() {
            debug!(status = %response.status(), "non-success response from camera");
            return Err(ErrorCode::Failure);
        }
        let body = response.bytes().map_err(|_| ErrorCode::CorruptedFrame)?;
        if body.is_empty() {
            return Err(ErrorCode::CorruptedFrame);
        }
        Ok(body.to_vec())
    }
}

impl StereoCamera for HttpCamera {
    fn open(&mut self, params: &InitParameters) -> ErrorCode {
        let client = match reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(5))
            // Cameras sit on the local network.
            .no_proxy()
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "failed to build HTTP client");
                return ErrorCode::Failure;
            }
        };
        self.client = Some(client);

        // The first snapshot tells us the negotiated resolution.
        let first = match self.fetch() {
            Ok(body) => body,
            Err(code) => {
                self.client = None;
                return code;
            }
        };
        let (width, height) = match image::load_from_memory(&first) {
            Ok(img) => (img.width(), img.height()),
            Err(e) => {
                warn!(error = %e, "first snapshot is not a decodable image");
                self.client = None;
                return ErrorCode::CorruptedFrame;
            }
        };
        self.resolution = Resolution::new(width, height);
        self.server = reqwest::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_owned));

        if params.resolution != self.resolution {
            info!(
                requested_width = params.resolution.width,
                requested_height = params.resolution.height,
                width,
                height,
                "camera serves a different resolution than requested"
            );
        }
        ErrorCode::Success
    }

    fn grab(&mut self, _runtime: &RuntimeParameters) -> ErrorCode {
        match self.fetch() {
            Ok(body) => {
                self.seq += 1;
                self.grabbed = Some(body);
                ErrorCode::Success
            }
            Err(code) => code,
        }
    }

    fn retrieve_image(&mut self, _view: View) -> Result<Frame, DeviceError> {
        if self.client.is_none() {
            return Err(DeviceError::Closed);
        }
        let body = self.grabbed.as_ref().ok_or(DeviceError::NotGrabbed)?;
        let rgb = image::load_from_memory(body)
            .map_err(|e| DeviceError::Decode(e.to_string()))?
            .to_rgb8();
        let (width, height) = rgb.dimensions();
        let frame = Frame::now(rgb.into_raw(), width, height, PixelFormat::Rgb8, self.seq)?;
        Ok(frame)
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn camera_fps(&self) -> f64 {
        0.0
    }

    fn camera_information(&self) -> CameraInformation {
        CameraInformation {
            firmware_version: "http".into(),
            serial_number: self.server.clone().unwrap_or_else(|| "unknown".into()),
        }
    }

    fn is_opened(&self) -> bool {
        self.client.is_some()
    }

    fn close(&mut self) {
        self.client = None;
        self.grabbed = None;
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Serve one canned `(status, body)` per connection, in order.
    fn serve(responses: Vec<(u16, Vec<u8>)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            for (status, body) in responses {
                let (mut stream, _) = listener.accept().unwrap();
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let reason = if status == 200 { "OK" } else { "Service Unavailable" };
                let head = format!(
                    "HTTP/1.1 {status} {reason}\r\nContent-Type: image/png\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                // The client may hang up early on error statuses.
                let _ = stream.write_all(head.as_bytes());
                let _ = stream.write_all(&body);
            }
        });
        format!("http://{addr}/frame")
    }

    /// A 4x3 PNG whose pixels encode their position.
    fn png() -> Vec<u8> {
        let img = image::RgbImage::from_fn(4, 3, |x, y| image::Rgb([x as u8 * 10, y as u8 * 20, 7]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn open_reads_resolution_from_first_snapshot() {
        let url = serve(vec![(200, png()), (200, png())]);
        let mut cam = HttpCamera::new(url);
        assert_eq!(cam.open(&InitParameters::default()), ErrorCode::Success);
        assert!(cam.is_opened());
        assert_eq!(cam.resolution(), Resolution::new(4, 3));
        assert_eq!(cam.camera_information().serial_number, "127.0.0.1");

        assert_eq!(cam.grab(&RuntimeParameters::default()), ErrorCode::Success);
        let frame = cam.retrieve_image(View::Right).unwrap();
        assert_eq!(frame.size(), (4, 3));
        assert_eq!(frame.format, PixelFormat::Rgb8);
        assert_eq!(frame.seq, 1);
        // Pixel (2, 1) starts at (1 * 4 + 2) * 3.
        assert_eq!(&frame.data()[18..21], &[20, 20, 7]);
    }

    #[test]
    fn error_status_is_a_failed_grab() {
        let url = serve(vec![(200, png()), (503, b"busy".to_vec()), (200, png())]);
        let mut cam = HttpCamera::new(url);
        assert_eq!(cam.open(&InitParameters::default()), ErrorCode::Success);

        let runtime = RuntimeParameters::default();
        assert_eq!(cam.grab(&runtime), ErrorCode::Failure);
        assert!(matches!(cam.retrieve_image(View::Left), Err(DeviceError::NotGrabbed)));
        assert_eq!(cam.grab(&runtime), ErrorCode::Success);
        assert_eq!(cam.retrieve_image(View::Left).unwrap().seq, 1);
    }

    #[test]
    fn undecodable_first_snapshot_fails_open() {
        let url = serve(vec![(200, b"<html>not a camera</html>".to_vec())]);
        let mut cam = HttpCamera::new(url);
        assert_eq!(cam.open(&InitParameters::default()), ErrorCode::CorruptedFrame);
        assert!(!cam.is_opened());
    }

    #[test]
    fn garbage_after_open_is_a_decode_error() {
        let url = serve(vec![(200, png()), (200, vec![0xff, 0xd8, 0x00, 0x01])]);
        let mut cam = HttpCamera::new(url);
        assert_eq!(cam.open(&InitParameters::default()), ErrorCode::Success);
        assert_eq!(cam.grab(&RuntimeParameters::default()), ErrorCode::Success);
        let err = cam.retrieve_image(View::Left).unwrap_err();
        assert!(matches!(err, DeviceError::Decode(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn unreachable_endpoint_fails_to_open() {
        // Port 9 (discard) on localhost is not expected to serve HTTP.
        let mut cam = HttpCamera::new("http://127.0.0.1:9/frame");
        let code = cam.open(&InitParameters::default());
        assert!(!code.is_success());
        assert!(!cam.is_opened());
        assert_eq!(cam.grab(&RuntimeParameters::default()), ErrorCode::CameraNotInitialized);
    }

    #[test]
    fn closed_camera_refuses_retrieve() {
        let mut cam = HttpCamera::new("http://127.0.0.1:9/frame");
        assert!(matches!(cam.retrieve_image(View::Left), Err(DeviceError::Closed)));
        assert_eq!(cam.camera_fps(), 0.0);
        assert_eq!(cam.camera_information().serial_number, "unknown");
    }
}
