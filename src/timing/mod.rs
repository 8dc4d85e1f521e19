//! Timing helpers shared by the background loops.
//!
//! `StopSignal` is the cooperative stop flag checked once per loop iteration;
//! its sleeps wake early when a stop is requested so `stop()` never waits out
//! a full reconnect interval.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: Mutex<bool>,
    cv: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        let mut stopped = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        *stopped = true;
        self.cv.notify_all();
    }

    pub fn reset(&self) {
        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for `duration` or until stopped. Returns true when stopped.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut stopped = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if *stopped {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .cv
                .wait_timeout(stopped, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            stopped = guard;
        }
    }
}

/// Wall-clock deadline `after` from now, as Unix epoch milliseconds.
///
/// Status pollers render countdowns against this value.
pub fn deadline_epoch_ms(after: Duration) -> i64 {
    let after = chrono::Duration::from_std(after).unwrap_or_else(|_| chrono::Duration::zero());
    (chrono::Utc::now() + after).timestamp_millis()
}

/// Compact local timestamp used in capture filenames.
pub fn file_timestamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S_%3f").to_string()
}
