//! Motion JPEG streaming of the kiosk display.
//!
//! Each frame goes out as one part of a `multipart/x-mixed-replace` body, so
//! an `<img src="/kiosk/stream">` tag is the whole client.

use axum::{
    body::Body,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

const MJPEG_BOUNDARY: &str = "photobooth_frame_5c1e";

#[derive(Clone)]
pub struct MjpegFrame {
    pub jpeg_data: Bytes,
    pub frame_number: u64,
}

/// Fans frames out to every connected client. Slow clients skip frames.
pub struct MjpegBroadcaster {
    tx: broadcast::Sender<MjpegFrame>,
}

impl MjpegBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Returns the number of clients reached.
    pub fn publish(&self, frame: MjpegFrame) -> usize {
        self.tx.send(frame).unwrap_or(0)
    }

    pub fn subscribe(&self) -> MjpegSubscriber {
        MjpegSubscriber {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for MjpegBroadcaster {
    fn default() -> Self {
        Self::new(4)
    }
}

pub struct MjpegSubscriber {
    rx: broadcast::Receiver<MjpegFrame>,
}

fn frame_part(frame: &MjpegFrame) -> Bytes {
    let head = format!(
        "--{MJPEG_BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        frame.jpeg_data.len()
    );
    let mut part = Vec::with_capacity(head.len() + frame.jpeg_data.len() + 2);
    part.extend_from_slice(head.as_bytes());
    part.extend_from_slice(&frame.jpeg_data);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}

impl IntoResponse for MjpegSubscriber {
    fn into_response(self) -> Response {
        // Lagged and closed errors both just drop the frame.
        let stream = BroadcastStream::new(self.rx).filter_map(|result| {
            result
                .ok()
                .map(|frame| Ok::<_, std::convert::Infallible>(frame_part(&frame)))
        });

        (
            StatusCode::OK,
            [
                (
                    header::CONTENT_TYPE,
                    format!("multipart/x-mixed-replace; boundary={MJPEG_BOUNDARY}"),
                ),
                (
                    header::CACHE_CONTROL,
                    "no-cache, no-store, must-revalidate".to_string(),
                ),
                (header::PRAGMA, "no-cache".to_string()),
            ],
            Body::from_stream(stream),
        )
            .into_response()
    }
}

pub fn encode_rgb_jpeg(image: &RgbImage, quality: u8) -> Option<Bytes> {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality)
        .encode_image(image)
        .ok()?;
    Some(Bytes::from(jpeg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let broadcaster = MjpegBroadcaster::new(4);
        let frame = MjpegFrame {
            jpeg_data: Bytes::from_static(b"test"),
            frame_number: 1,
        };
        assert_eq!(broadcaster.publish(frame), 0);
    }

    #[test]
    fn test_subscriber_count() {
        let broadcaster = MjpegBroadcaster::new(4);
        let first = broadcaster.subscribe();
        let _second = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count(), 2);
        drop(first);
        assert_eq!(broadcaster.subscriber_count(), 1);
    }

    #[test]
    fn test_frame_part_layout() {
        let part = frame_part(&MjpegFrame {
            jpeg_data: Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xD9]),
            frame_number: 7,
        });
        let text = String::from_utf8_lossy(&part);
        assert!(text.starts_with(&format!("--{MJPEG_BOUNDARY}\r\n")));
        assert!(text.contains("Content-Length: 4\r\n\r\n"));
        assert!(part.ends_with(&[0xFF, 0xD9, b'\r', b'\n']));
    }

    #[test]
    fn test_encode_rgb_jpeg() {
        let image = RgbImage::from_pixel(8, 8, image::Rgb([10, 200, 30]));
        let jpeg = encode_rgb_jpeg(&image, 80).unwrap();
        assert_eq!(&jpeg[0..2], &[0xFF, 0xD8]);
    }
}
