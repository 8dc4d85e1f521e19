//! Synthetic camera data
//!
//! Deterministic frames for running the whole booth without hardware: solid
//! colours for layout checks, a moving gradient for preview and encoder paths.

use crate::camera::CameraBackend;
use crate::errors::BoothError;
use crate::types::Frame;
use std::collections::VecDeque;
use std::time::Duration;

/// Create a gradient frame that shifts with `frame_number`
pub fn synthetic_video_frame(frame_number: u64, width: u32, height: u32) -> Frame {
    let mut data = vec![0u8; (width * height * 3) as usize];

    let base = (frame_number % 256) as u8;
    for y in 0..height {
        for x in 0..width {
            let idx = ((y * width + x) * 3) as usize;
            data[idx] = base.wrapping_add((x % 256) as u8);
            data[idx + 1] = base.wrapping_add((y % 256) as u8);
            data[idx + 2] = base.wrapping_add(((x + y) % 256) as u8);
        }
    }

    Frame::new(width, height, data)
}

#[derive(Debug, Clone)]
enum Pattern {
    Gradient,
    /// Cycles through the colours, one per read
    Colors(Vec<[u8; 3]>),
}

/// Camera backend producing synthetic frames
///
/// Reads can be scripted to fail so the acquisition loop's retry path and the
/// "camera never warmed up" path are both reachable from tests.
#[derive(Debug)]
pub struct SyntheticCamera {
    width: u32,
    height: u32,
    pattern: Pattern,
    frame_number: u64,
    frame_interval: Duration,
    /// Per-read script: `true` fails that read. Empty means succeed.
    failures: VecDeque<bool>,
    always_fail: bool,
    closed: bool,
}

impl SyntheticCamera {
    pub fn gradient(width: u32, height: u32) -> Self {
        Self::with_pattern(width, height, Pattern::Gradient)
    }

    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        Self::with_pattern(width, height, Pattern::Colors(vec![rgb]))
    }

    /// Each read returns the next colour, wrapping around.
    pub fn color_cycle(width: u32, height: u32, colors: Vec<[u8; 3]>) -> Self {
        let colors = if colors.is_empty() { vec![[0, 0, 0]] } else { colors };
        Self::with_pattern(width, height, Pattern::Colors(colors))
    }

    /// A camera that opens fine but never produces a frame.
    pub fn never_ready(width: u32, height: u32) -> Self {
        let mut camera = Self::gradient(width, height);
        camera.always_fail = true;
        camera
    }

    fn with_pattern(width: u32, height: u32, pattern: Pattern) -> Self {
        Self {
            width,
            height,
            pattern,
            frame_number: 0,
            frame_interval: Duration::from_millis(5),
            failures: VecDeque::new(),
            always_fail: false,
            closed: false,
        }
    }

    /// Fail the first `count` reads.
    pub fn failing_first(mut self, count: usize) -> Self {
        self.failures = std::iter::repeat(true).take(count).collect();
        self
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl CameraBackend for SyntheticCamera {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn read_frame(&mut self) -> Result<Frame, BoothError> {
        if !self.frame_interval.is_zero() {
            std::thread::sleep(self.frame_interval);
        }
        if self.always_fail || self.failures.pop_front().unwrap_or(false) {
            return Err(BoothError::Camera("synthetic read failure".to_string()));
        }

        let frame = match &self.pattern {
            Pattern::Gradient => synthetic_video_frame(self.frame_number, self.width, self.height),
            Pattern::Colors(colors) => {
                let rgb = colors[(self.frame_number as usize) % colors.len()];
                Frame::solid(self.width, self.height, rgb)
            }
        };
        self.frame_number += 1;
        Ok(frame)
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_video_frame_correct_size() {
        let frame = synthetic_video_frame(0, 320, 240);
        assert_eq!(frame.width, 320);
        assert_eq!(frame.height, 240);
        assert_eq!(frame.data.len(), 320 * 240 * 3);
    }

    #[test]
    fn test_synthetic_video_frames_differ() {
        let frame0 = synthetic_video_frame(0, 32, 24);
        let frame1 = synthetic_video_frame(1, 32, 24);
        assert_ne!(frame0.data[0], frame1.data[0]);
    }

    #[test]
    fn test_scripted_failures_then_success() {
        let mut camera = SyntheticCamera::solid(8, 8, [1, 2, 3])
            .failing_first(2)
            .with_frame_interval(Duration::ZERO);
        assert!(camera.read_frame().is_err());
        assert!(camera.read_frame().is_err());
        let frame = camera.read_frame().unwrap();
        assert_eq!(&frame.data[..3], &[1, 2, 3]);
    }

    #[test]
    fn test_color_cycle_wraps() {
        let mut camera = SyntheticCamera::color_cycle(2, 2, vec![[255, 0, 0], [0, 255, 0]])
            .with_frame_interval(Duration::ZERO);
        let reds: Vec<u8> = (0..3).map(|_| camera.read_frame().unwrap().data[0]).collect();
        assert_eq!(reds, vec![255, 0, 255]);
    }

    #[test]
    fn test_never_ready_camera() {
        let mut camera = SyntheticCamera::never_ready(4, 4).with_frame_interval(Duration::ZERO);
        for _ in 0..5 {
            assert!(camera.read_frame().is_err());
        }
    }
}
