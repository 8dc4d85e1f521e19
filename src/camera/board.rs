//! Board-mounted camera (Raspberry Pi camera module).
//!
//! Runs the vendor streaming tool in MJPEG mode with output on stdout and
//! splits the byte stream into JPEG images on SOI/EOI markers. Entropy-coded
//! JPEG data byte-stuffs 0xFF, so an EOI marker only appears at frame ends.

use super::CameraBackend;
use crate::config::CameraConfig;
use crate::errors::BoothError;
use crate::types::Frame;
use std::io::Read;
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::time::Duration;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];
const READ_CHUNK: usize = 64 * 1024;
/// Upper bound on buffered bytes without a complete frame
const MAX_PENDING: usize = 16 * 1024 * 1024;

/// True when `command` resolves to an executable on `PATH`.
pub fn is_available(command: &str) -> bool {
    if command.contains('/') {
        return Path::new(command).is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(command).is_file()))
        .unwrap_or(false)
}

/// Incremental splitter for a concatenated JPEG stream.
#[derive(Debug, Default)]
pub struct JpegSplitter {
    buffer: Vec<u8>,
}

impl JpegSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and return every JPEG completed by them, oldest first.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();

        loop {
            let Some(start) = find_marker(&self.buffer, SOI, 0) else {
                // Keep a trailing 0xFF, it may be the first half of an SOI
                let keep = usize::from(self.buffer.last() == Some(&0xFF));
                let drop_to = self.buffer.len() - keep;
                self.buffer.drain(..drop_to);
                break;
            };
            if start > 0 {
                self.buffer.drain(..start);
            }
            match find_marker(&self.buffer, EOI, 2) {
                Some(end) => {
                    let frame: Vec<u8> = self.buffer.drain(..end + 2).collect();
                    frames.push(frame);
                }
                None => break,
            }
        }

        if self.buffer.len() > MAX_PENDING {
            log::warn!("Discarding {} bytes of unterminated JPEG data", self.buffer.len());
            self.buffer.clear();
        }

        frames
    }
}

fn find_marker(haystack: &[u8], marker: [u8; 2], from: usize) -> Option<usize> {
    if haystack.len() < from + 2 {
        return None;
    }
    haystack[from..]
        .windows(2)
        .position(|w| w == marker)
        .map(|pos| pos + from)
}

pub struct BoardCamera {
    name: String,
    child: Child,
    stdout: ChildStdout,
    splitter: JpegSplitter,
    chunk: Vec<u8>,
}

impl BoardCamera {
    pub fn open(config: &CameraConfig) -> Result<Self, BoothError> {
        if !is_available(&config.board_command) {
            return Err(BoothError::Camera(format!(
                "Board camera command not found: {}",
                config.board_command
            )));
        }

        let [width, height] = config.resolution;
        let mut child = Command::new(&config.board_command)
            .args(["-t", "0", "-n", "--codec", "mjpeg"])
            .args(["--width", &width.to_string(), "--height", &height.to_string()])
            .args(["-o", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| BoothError::Camera(format!("Failed to start board camera: {}", e)))?;

        // The tool exits almost immediately when no sensor is attached
        std::thread::sleep(Duration::from_millis(300));
        if let Ok(Some(status)) = child.try_wait() {
            return Err(BoothError::Camera(format!(
                "Board camera exited during startup ({})",
                status
            )));
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BoothError::Camera("Board camera stdout unavailable".to_string()))?;

        log::info!("Board camera streaming {}x{} via {}", width, height, config.board_command);

        Ok(Self {
            name: format!("board:{}", config.board_command),
            child,
            stdout,
            splitter: JpegSplitter::new(),
            chunk: vec![0; READ_CHUNK],
        })
    }
}

impl CameraBackend for BoardCamera {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_frame(&mut self) -> Result<Frame, BoothError> {
        loop {
            let n = self
                .stdout
                .read(&mut self.chunk)
                .map_err(|e| BoothError::Camera(format!("Board camera read failed: {}", e)))?;
            if n == 0 {
                return Err(BoothError::Camera("Board camera stream ended".to_string()));
            }

            // Only the newest completed JPEG matters, older ones are stale
            if let Some(jpeg) = self.splitter.push(&self.chunk[..n]).pop() {
                let image =
                    image::load_from_memory_with_format(&jpeg, image::ImageFormat::Jpeg)?;
                return Ok(Frame::from_rgb_image(image.to_rgb8()));
            }
        }
    }

    fn close(&mut self) {
        if let Err(e) = self.child.kill() {
            log::debug!("Board camera already exited: {}", e);
        }
        let _ = self.child.wait();
        log::info!("Board camera closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_jpeg(payload: &[u8]) -> Vec<u8> {
        let mut bytes = SOI.to_vec();
        bytes.extend_from_slice(payload);
        bytes.extend_from_slice(&EOI);
        bytes
    }

    #[test]
    fn test_splitter_single_frame() {
        let mut splitter = JpegSplitter::new();
        let frames = splitter.push(&fake_jpeg(&[1, 2, 3]));
        assert_eq!(frames, vec![fake_jpeg(&[1, 2, 3])]);
    }

    #[test]
    fn test_splitter_frame_across_chunks() {
        let mut splitter = JpegSplitter::new();
        let jpeg = fake_jpeg(&[9, 9, 0xFF, 0x00, 7]);
        assert!(splitter.push(&jpeg[..3]).is_empty());
        assert!(splitter.push(&jpeg[3..jpeg.len() - 1]).is_empty());
        assert_eq!(splitter.push(&jpeg[jpeg.len() - 1..]), vec![jpeg]);
    }

    #[test]
    fn test_splitter_skips_garbage_and_returns_all_frames() {
        let mut splitter = JpegSplitter::new();
        let mut stream = vec![0x00, 0x13, 0x37];
        stream.extend(fake_jpeg(&[1]));
        stream.extend(fake_jpeg(&[2]));
        let frames = splitter.push(&stream);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1], fake_jpeg(&[2]));
    }

    #[test]
    fn test_splitter_keeps_split_soi() {
        let mut splitter = JpegSplitter::new();
        assert!(splitter.push(&[0x00, 0xFF]).is_empty());
        let frames = splitter.push(&[0xD8, 5, 0xFF, 0xD9]);
        assert_eq!(frames, vec![vec![0xFF, 0xD8, 5, 0xFF, 0xD9]]);
    }

    #[test]
    fn test_is_available_for_missing_command() {
        assert!(!is_available("no-such-board-camera-tool"));
        assert!(!is_available("/nonexistent/path/rpicam-vid"));
    }
}
