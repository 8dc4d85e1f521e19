//! Continuous camera acquisition into a single latest-frame slot.
//!
//! One background thread owns the camera and keeps replacing the slot with
//! the newest frame. Readers get their own copy and never hold the lock
//! while copying pixels, so the writer is never stalled by a slow reader.

use crate::camera::{open_camera, CameraBackend};
use crate::config::CameraConfig;
use crate::errors::BoothError;
use crate::timing::StopSignal;
use crate::types::Frame;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Acquisition counters, for logs and the status endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameSourceStats {
    pub frames: u64,
    pub read_errors: u64,
}

struct Shared {
    slot: Mutex<Option<Arc<Frame>>>,
    frame_ready: Condvar,
    stop: StopSignal,
    start_instant: Instant,
    next_sequence: AtomicU64,
    frames: AtomicU64,
    read_errors: AtomicU64,
    read_retry: Duration,
}

impl Shared {
    fn publish(&self, mut frame: Frame) {
        frame.sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        frame.timestamp_us = self.start_instant.elapsed().as_micros() as u64;
        let frame = Arc::new(frame);

        let previous = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            slot.replace(frame)
        };
        self.frame_ready.notify_all();
        self.frames.fetch_add(1, Ordering::Relaxed);
        // Release the old frame outside the lock
        drop(previous);
    }

    fn latest(&self) -> Option<Arc<Frame>> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Owner of one camera and its acquisition thread.
pub struct FrameSource {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<Box<dyn CameraBackend>>>>,
    camera_name: String,
}

impl FrameSource {
    /// Open the configured camera and start acquiring.
    ///
    /// Open failures are returned; read failures after this point are retried
    /// forever by the background loop.
    pub fn open(config: &CameraConfig) -> Result<Self, BoothError> {
        let backend = open_camera(config)?;
        Self::start(backend, Duration::from_millis(config.read_retry_ms))
    }

    /// Start acquiring from an already-opened backend.
    pub fn start(backend: Box<dyn CameraBackend>, read_retry: Duration) -> Result<Self, BoothError> {
        let camera_name = backend.name().to_string();
        let shared = Arc::new(Shared {
            slot: Mutex::new(None),
            frame_ready: Condvar::new(),
            stop: StopSignal::new(),
            start_instant: Instant::now(),
            next_sequence: AtomicU64::new(1),
            frames: AtomicU64::new(0),
            read_errors: AtomicU64::new(0),
            read_retry,
        });

        let loop_shared = shared.clone();
        let handle = std::thread::Builder::new()
            .name("photobooth-frame-source".to_string())
            .spawn(move || acquisition_loop(loop_shared, backend))
            .map_err(|e| BoothError::Camera(format!("spawn failed: {e}")))?;

        log::info!("Frame source started on {}", camera_name);

        Ok(Self {
            shared,
            worker: Mutex::new(Some(handle)),
            camera_name,
        })
    }

    pub fn camera_name(&self) -> &str {
        &self.camera_name
    }

    /// Copy of the newest frame, or `None` before the first successful read.
    pub fn get_latest_frame(&self) -> Option<Frame> {
        let frame = self.shared.latest()?;
        Some(Frame::clone(&frame))
    }

    /// Stills come straight from the live buffer.
    pub fn capture_still(&self) -> Option<Frame> {
        self.get_latest_frame()
    }

    /// Block until a frame exists or `timeout` passes.
    pub fn wait_for_frame(&self, timeout: Duration) -> Option<Frame> {
        let deadline = Instant::now() + timeout;
        let mut slot = self
            .shared
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(frame) = slot.as_ref() {
                let frame = frame.clone();
                drop(slot);
                return Some(Frame::clone(&frame));
            }
            let now = Instant::now();
            if now >= deadline || self.shared.stop.is_stopped() {
                return None;
            }
            let (guard, _) = self
                .shared
                .frame_ready
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            slot = guard;
        }
    }

    pub fn has_frame(&self) -> bool {
        self.shared.latest().is_some()
    }

    pub fn stats(&self) -> FrameSourceStats {
        FrameSourceStats {
            frames: self.shared.frames.load(Ordering::Relaxed),
            read_errors: self.shared.read_errors.load(Ordering::Relaxed),
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Stop acquisition, wait for the loop to exit, then release the camera.
    ///
    /// Safe to call more than once.
    pub fn stop(&self) {
        self.shared.stop.stop();
        self.shared.frame_ready.notify_all();

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return;
        };

        match handle.join() {
            Ok(mut backend) => {
                backend.close();
                let stats = self.stats();
                log::info!(
                    "Frame source stopped ({} frames, {} read errors)",
                    stats.frames,
                    stats.read_errors
                );
            }
            Err(_) => log::error!("Frame source thread panicked"),
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn acquisition_loop(
    shared: Arc<Shared>,
    mut backend: Box<dyn CameraBackend>,
) -> Box<dyn CameraBackend> {
    let mut consecutive_errors: u64 = 0;

    while !shared.stop.is_stopped() {
        match backend.read_frame() {
            Ok(frame) if frame.is_valid() => {
                if consecutive_errors > 0 {
                    log::info!("Camera recovered after {} failed reads", consecutive_errors);
                    consecutive_errors = 0;
                }
                shared.publish(frame);
            }
            Ok(frame) => {
                shared.read_errors.fetch_add(1, Ordering::Relaxed);
                log::debug!(
                    "Discarding malformed {}x{} frame ({} bytes)",
                    frame.width,
                    frame.height,
                    frame.data.len()
                );
            }
            Err(e) => {
                shared.read_errors.fetch_add(1, Ordering::Relaxed);
                consecutive_errors += 1;
                if consecutive_errors == 1 {
                    log::warn!("Camera read failed, retrying: {}", e);
                }
                if shared.stop.sleep(shared.read_retry) {
                    break;
                }
            }
        }
    }

    backend
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SyntheticCamera;

    fn start_synthetic(camera: SyntheticCamera) -> FrameSource {
        FrameSource::start(Box::new(camera), Duration::from_millis(1)).unwrap()
    }

    #[test]
    fn test_latest_frame_arrives() {
        let source = start_synthetic(SyntheticCamera::solid(16, 8, [200, 10, 10]));
        let frame = source.wait_for_frame(Duration::from_secs(2)).unwrap();
        assert_eq!((frame.width, frame.height), (16, 8));
        assert_eq!(&frame.data[..3], &[200, 10, 10]);
        assert!(frame.sequence >= 1);
        source.stop();
    }

    #[test]
    fn test_no_frame_before_first_read() {
        let source = start_synthetic(SyntheticCamera::never_ready(4, 4));
        assert!(source.get_latest_frame().is_none());
        assert!(source.capture_still().is_none());
        assert!(source.wait_for_frame(Duration::from_millis(50)).is_none());
        source.stop();
        assert!(source.stats().read_errors > 0);
    }

    #[test]
    fn test_read_errors_are_retried() {
        let source = start_synthetic(SyntheticCamera::gradient(8, 8).failing_first(5));
        assert!(source.wait_for_frame(Duration::from_secs(2)).is_some());
        source.stop();
        let stats = source.stats();
        assert_eq!(stats.read_errors, 5);
        assert!(stats.frames >= 1);
    }

    #[test]
    fn test_readers_get_independent_copies() {
        let source = start_synthetic(SyntheticCamera::solid(4, 4, [1, 2, 3]));
        let mut a = source.wait_for_frame(Duration::from_secs(2)).unwrap();
        a.data[0] = 99;
        let b = source.get_latest_frame().unwrap();
        assert_eq!(b.data[0], 1);
        source.stop();
    }

    #[test]
    fn test_stop_is_synchronous_and_idempotent() {
        let source = start_synthetic(SyntheticCamera::gradient(4, 4));
        source.wait_for_frame(Duration::from_secs(2));
        assert!(source.is_running());
        source.stop();
        assert!(!source.is_running());
        let frames = source.stats().frames;
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(source.stats().frames, frames);
        source.stop();
    }
}
