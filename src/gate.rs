//! Single-flight admission for capture workflows.
//!
//! Every trigger (joystick, HTTP, kiosk display) goes through one
//! `CaptureGate`. Admission is an atomic check-and-set; the returned
//! `GateGuard` is the only writer of workflow status while it lives and
//! clears the gate when dropped, including during a panic.

use crate::types::CaptureKind;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use uuid::Uuid;

pub const READY_MESSAGE: &str = "Ready to take photos!";

/// Where a workflow is. Serialized flat into the status JSON under `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Phase {
    Ready,
    /// Counting down to `target_ms` (Unix epoch milliseconds)
    Countdown {
        target_ms: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        shot: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        total: Option<usize>,
    },
    Capturing {
        #[serde(skip_serializing_if = "Option::is_none")]
        shot: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        total: Option<usize>,
    },
    /// Pause between strip shots, next shot at `target_ms`
    Waiting {
        target_ms: i64,
        shot: usize,
        total: usize,
    },
    Processing,
    Printing,
    Success {
        #[serde(skip_serializing_if = "Option::is_none")]
        image_url: Option<String>,
    },
    Error,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Ready | Phase::Success { .. } | Phase::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowStatus {
    #[serde(flatten)]
    pub phase: Phase,
    pub message: String,
    pub run_id: Option<Uuid>,
    pub kind: Option<CaptureKind>,
}

impl WorkflowStatus {
    pub fn ready() -> Self {
        Self {
            phase: Phase::Ready,
            message: READY_MESSAGE.to_string(),
            run_id: None,
            kind: None,
        }
    }
}

impl Default for WorkflowStatus {
    fn default() -> Self {
        Self::ready()
    }
}

#[derive(Debug)]
pub struct CaptureGate {
    in_progress: AtomicBool,
    status: Mutex<WorkflowStatus>,
}

impl Default for CaptureGate {
    fn default() -> Self {
        Self {
            in_progress: AtomicBool::new(false),
            status: Mutex::new(WorkflowStatus::ready()),
        }
    }
}

impl CaptureGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Admit one workflow, or `None` while another is running.
    pub fn try_acquire(self: &Arc<Self>, kind: Option<CaptureKind>) -> Option<GateGuard> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::info!("Capture rejected, another workflow is in progress");
            return None;
        }

        let run_id = Uuid::new_v4();
        let starting = WorkflowStatus {
            phase: Phase::Processing,
            message: "Starting...".to_string(),
            run_id: Some(run_id),
            kind,
        };
        let previous = std::mem::replace(&mut *self.lock_status(), starting.clone());
        let (updates, _) = watch::channel(starting);

        log::info!(
            "Workflow {} admitted ({})",
            run_id,
            kind.map(CaptureKind::as_str).unwrap_or("print")
        );

        Some(GateGuard {
            gate: self.clone(),
            run_id,
            kind,
            updates,
            previous: Some(previous),
            finished: false,
        })
    }

    pub fn is_busy(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Snapshot of the latest published status.
    pub fn status(&self) -> WorkflowStatus {
        self.lock_status().clone()
    }

    fn lock_status(&self) -> std::sync::MutexGuard<'_, WorkflowStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Proof of admission. Dropping it reopens the gate.
#[derive(Debug)]
pub struct GateGuard {
    gate: Arc<CaptureGate>,
    run_id: Uuid,
    kind: Option<CaptureKind>,
    updates: watch::Sender<WorkflowStatus>,
    previous: Option<WorkflowStatus>,
    finished: bool,
}

impl GateGuard {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn kind(&self) -> Option<CaptureKind> {
        self.kind
    }

    /// Updates for this run only.
    pub fn subscribe(&self) -> watch::Receiver<WorkflowStatus> {
        self.updates.subscribe()
    }

    pub fn publish(&mut self, phase: Phase, message: impl Into<String>) {
        let status = WorkflowStatus {
            phase,
            message: message.into(),
            run_id: Some(self.run_id),
            kind: self.kind,
        };
        self.finished = status.phase.is_terminal();
        self.previous = None;
        *self.gate.lock_status() = status.clone();
        self.updates.send_replace(status);
    }

    /// Reopen the gate and put back the status from before admission.
    ///
    /// For a workflow that was admitted but could not start.
    pub fn release_quietly(mut self) {
        if let Some(previous) = self.previous.take() {
            *self.gate.lock_status() = previous;
        }
        self.finished = true;
    }
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        if !self.finished {
            let message = if std::thread::panicking() {
                "Capture crashed"
            } else {
                "Capture failed"
            };
            log::warn!("Workflow {} ended without a result", self.run_id);
            self.publish(Phase::Error, message);
        }
        self.gate.in_progress.store(false, Ordering::Release);
        log::debug!("Workflow {} released the gate", self.run_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_rejected() {
        let gate = CaptureGate::new();
        let guard = gate.try_acquire(Some(CaptureKind::Single)).unwrap();
        assert!(gate.is_busy());
        assert!(gate.try_acquire(Some(CaptureKind::Strip)).is_none());
        drop(guard);
        assert!(!gate.is_busy());
        assert!(gate.try_acquire(None).is_some());
    }

    #[test]
    fn test_unfinished_guard_reports_error() {
        let gate = CaptureGate::new();
        {
            let mut guard = gate.try_acquire(Some(CaptureKind::Single)).unwrap();
            guard.publish(Phase::Capturing { shot: None, total: None }, "Say cheese!");
        }
        let status = gate.status();
        assert_eq!(status.phase, Phase::Error);
        assert!(!gate.is_busy());
    }

    #[test]
    fn test_success_is_kept_after_release() {
        let gate = CaptureGate::new();
        let mut guard = gate.try_acquire(Some(CaptureKind::Single)).unwrap();
        let run_id = guard.run_id();
        let rx = guard.subscribe();
        guard.publish(
            Phase::Success {
                image_url: Some("/photos/photo_1.jpg".to_string()),
            },
            "Photo printed!",
        );
        drop(guard);

        let status = gate.status();
        assert_eq!(status.run_id, Some(run_id));
        assert_eq!(status.message, "Photo printed!");
        assert!(matches!(rx.borrow().phase, Phase::Success { .. }));
    }

    #[test]
    fn test_release_quietly_restores_previous_status() {
        let gate = CaptureGate::new();
        let guard = gate.try_acquire(Some(CaptureKind::Strip)).unwrap();
        guard.release_quietly();
        assert_eq!(gate.status(), WorkflowStatus::ready());
        assert!(!gate.is_busy());
    }

    #[test]
    fn test_panicking_workflow_clears_gate() {
        let gate = CaptureGate::new();
        let worker_gate = gate.clone();
        let result = std::thread::spawn(move || {
            let _guard = worker_gate.try_acquire(Some(CaptureKind::Single)).unwrap();
            panic!("camera exploded");
        })
        .join();
        assert!(result.is_err());
        assert!(!gate.is_busy());
        assert_eq!(gate.status().message, "Capture crashed");
    }

    #[test]
    fn test_status_json_shape() {
        let status = WorkflowStatus {
            phase: Phase::Countdown {
                target_ms: 1_700_000_000_000,
                shot: Some(2),
                total: Some(3),
            },
            message: "Get ready!".to_string(),
            run_id: None,
            kind: Some(CaptureKind::Strip),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "countdown");
        assert_eq!(json["target_ms"], 1_700_000_000_000i64);
        assert_eq!(json["shot"], 2);
        assert_eq!(json["kind"], "strip");
        assert_eq!(serde_json::to_value(WorkflowStatus::ready()).unwrap()["status"], "ready");
    }
}
