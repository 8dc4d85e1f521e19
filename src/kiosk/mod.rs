//! Kiosk session state machine.
//!
//! `SessionController::tick` is driven by a fixed-cadence loop. Each tick
//! drains the trigger mailbox once, then applies the one timeout or
//! completion rule of the current state. Durations are always measured from
//! `state_entered_at`, so a late tick never double-counts time.

pub mod app;
pub mod display;

use crate::capture::CaptureService;
use crate::config::{KioskConfig, StripConfig, ThermalConfig};
use crate::gate::{CaptureGate, GateGuard, Phase};
use crate::library::photo_url;
use crate::printer::PrintSink;
use crate::thermal::process_for_thermal;
use crate::timing::deadline_epoch_ms;
use crate::types::CaptureKind;
use image::RgbImage;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

pub use app::{KioskApp, KioskFeed};
pub use display::{compose_display, DisplayFrame, DisplaySettings, Overlay};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Countdown,
    Flash,
    Capture,
    StripGap,
    Review,
    Printing,
}

/// Everything the display and the tick rules read.
#[derive(Debug, Clone)]
pub struct Session {
    pub state: SessionState,
    pub state_entered_at: Instant,
    pub is_strip: bool,
    /// Shots taken so far in this session
    pub shot_index: usize,
    pub shot_total: usize,
    pub captured_paths: Vec<PathBuf>,
    /// Image to print after review, `None` when capture or stitching failed
    pub pending_output_path: Option<PathBuf>,
    pub review_image: Option<RgbImage>,
}

impl Session {
    pub fn new(now: Instant) -> Self {
        Self {
            state: SessionState::Idle,
            state_entered_at: now,
            is_strip: false,
            shot_index: 0,
            shot_total: 1,
            captured_paths: Vec::new(),
            pending_output_path: None,
            review_image: None,
        }
    }

    pub fn kind(&self) -> CaptureKind {
        if self.is_strip {
            CaptureKind::Strip
        } else {
            CaptureKind::Single
        }
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.state_entered_at)
    }

    fn enter(&mut self, state: SessionState, now: Instant) {
        log::debug!("Kiosk {:?} -> {:?}", self.state, state);
        self.state = state;
        self.state_entered_at = now;
    }
}

/// Single-slot trigger mailbox. A new trigger replaces an unconsumed one.
#[derive(Debug, Default)]
pub struct Mailbox {
    slot: Mutex<Option<CaptureKind>>,
}

impl Mailbox {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn post(&self, kind: CaptureKind) {
        let replaced = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(kind);
        if let Some(previous) = replaced {
            log::debug!("Pending {} trigger replaced by {}", previous.as_str(), kind.as_str());
        }
    }

    pub fn take(&self) -> Option<CaptureKind> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    pub fn is_empty(&self) -> bool {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KioskTimings {
    pub countdown: Duration,
    pub flash: Duration,
    pub review: Duration,
    pub strip_gap: Duration,
    pub strip_shots: usize,
}

impl KioskTimings {
    pub fn from_config(kiosk: &KioskConfig, strip: &StripConfig) -> Self {
        Self {
            countdown: Duration::from_millis(kiosk.countdown_ms),
            flash: Duration::from_millis(kiosk.flash_ms),
            review: Duration::from_millis(kiosk.review_ms),
            strip_gap: Duration::from_millis(kiosk.strip_gap_ms),
            strip_shots: strip.shots.max(1),
        }
    }
}

/// The side effects the state machine triggers.
pub trait KioskBackend: Send {
    /// Grab and save the current frame.
    fn capture(&mut self, kind: CaptureKind) -> Option<PathBuf>;
    fn stitch(&mut self, paths: &[PathBuf]) -> Option<PathBuf>;
    fn load_review(&mut self, path: &Path) -> Option<RgbImage>;
    /// Start printing in the background. The receiver yields the outcome
    /// once, or disconnects if the print task died.
    fn start_print(&mut self, path: &Path, kind: CaptureKind) -> Receiver<bool>;
}

/// Backend wired to the real camera and printer.
pub struct BoothBackend {
    capture: Arc<CaptureService>,
    printer: PrintSink,
    thermal: ThermalConfig,
    spacing: u32,
}

impl BoothBackend {
    pub fn new(
        capture: Arc<CaptureService>,
        printer: PrintSink,
        thermal: ThermalConfig,
        spacing: u32,
    ) -> Self {
        Self {
            capture,
            printer,
            thermal,
            spacing,
        }
    }
}

impl KioskBackend for BoothBackend {
    fn capture(&mut self, kind: CaptureKind) -> Option<PathBuf> {
        self.capture.capture(Duration::ZERO, kind.shot_prefix())
    }

    fn stitch(&mut self, paths: &[PathBuf]) -> Option<PathBuf> {
        self.capture.create_strip(paths, self.spacing)
    }

    fn load_review(&mut self, path: &Path) -> Option<RgbImage> {
        match image::open(path) {
            Ok(img) => Some(img.to_rgb8()),
            Err(e) => {
                log::warn!("Cannot load review image {}: {}", path.display(), e);
                None
            }
        }
    }

    fn start_print(&mut self, path: &Path, kind: CaptureKind) -> Receiver<bool> {
        let (tx, rx) = mpsc::channel();
        let path = path.to_path_buf();
        let printer = self.printer.clone();
        let thermal = self.thermal.clone();

        let spawned = std::thread::Builder::new()
            .name("photobooth-print".to_string())
            .spawn(move || {
                let printed = match process_for_thermal(&path, kind.is_strip(), &thermal) {
                    Ok(raster) => printer.print_photo(&raster, printer.title_for(kind)),
                    Err(e) => {
                        log::error!("Thermal rendering failed for {}: {}", path.display(), e);
                        false
                    }
                };
                let _ = tx.send(printed);
            });
        if let Err(e) = spawned {
            // The sender was dropped with the closure, so the receiver
            // reports disconnection and the kiosk returns to idle.
            log::error!("Failed to start print thread: {}", e);
        }
        rx
    }
}

pub struct SessionController<B> {
    session: Session,
    timings: KioskTimings,
    mailbox: Arc<Mailbox>,
    gate: Arc<CaptureGate>,
    guard: Option<GateGuard>,
    print_result: Option<Receiver<bool>>,
    backend: B,
}

impl<B: KioskBackend> SessionController<B> {
    pub fn new(
        timings: KioskTimings,
        mailbox: Arc<Mailbox>,
        gate: Arc<CaptureGate>,
        backend: B,
        now: Instant,
    ) -> Self {
        Self {
            session: Session::new(now),
            timings,
            mailbox,
            gate,
            guard: None,
            print_result: None,
            backend,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        self.session.state
    }

    pub fn timings(&self) -> &KioskTimings {
        &self.timings
    }

    pub fn mailbox(&self) -> &Arc<Mailbox> {
        &self.mailbox
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Advance the session by one step.
    pub fn tick(&mut self, now: Instant) {
        if let Some(kind) = self.mailbox.take() {
            if self.session.state == SessionState::Idle {
                self.begin(kind, now);
            } else {
                log::debug!("Ignoring {} trigger while {:?}", kind.as_str(), self.session.state);
            }
        }

        let elapsed = self.session.elapsed(now);
        match self.session.state {
            SessionState::Idle => {}
            SessionState::Countdown => {
                if elapsed >= self.timings.countdown {
                    self.session.enter(SessionState::Flash, now);
                }
            }
            SessionState::Flash => {
                if elapsed >= self.timings.flash {
                    self.take_shot(now);
                }
            }
            // Entered and left inside take_shot
            SessionState::Capture => {}
            SessionState::StripGap => {
                if elapsed >= self.timings.strip_gap {
                    self.start_countdown(now);
                }
            }
            SessionState::Review => {
                if elapsed >= self.timings.review {
                    self.start_printing(now);
                }
            }
            SessionState::Printing => {
                let done = match self.print_result.as_ref().map(Receiver::try_recv) {
                    Some(Ok(printed)) => Some(printed),
                    Some(Err(TryRecvError::Empty)) => None,
                    Some(Err(TryRecvError::Disconnected)) | None => Some(false),
                };
                if let Some(printed) = done {
                    self.finish_printing(printed, now);
                }
            }
        }
    }

    fn begin(&mut self, kind: CaptureKind, now: Instant) {
        let Some(guard) = self.gate.try_acquire(Some(kind)) else {
            log::info!("Kiosk trigger ignored, a capture is already running");
            return;
        };
        self.guard = Some(guard);

        let session = &mut self.session;
        session.is_strip = kind.is_strip();
        session.shot_index = 0;
        session.shot_total = if kind.is_strip() {
            self.timings.strip_shots
        } else {
            1
        };
        session.captured_paths.clear();
        session.pending_output_path = None;
        session.review_image = None;
        log::info!("Kiosk session started ({})", kind.as_str());
        self.start_countdown(now);
    }

    fn start_countdown(&mut self, now: Instant) {
        self.session.enter(SessionState::Countdown, now);
        let (shot, total) = self.shot_label();
        let target_ms = deadline_epoch_ms(self.timings.countdown);
        self.publish(
            Phase::Countdown {
                target_ms,
                shot,
                total,
            },
            "Say cheese! 📸",
        );
    }

    fn take_shot(&mut self, now: Instant) {
        self.session.enter(SessionState::Capture, now);
        let (shot, total) = self.shot_label();
        self.publish(Phase::Capturing { shot, total }, "SNAP!");

        let kind = self.session.kind();
        let path = self.backend.capture(kind);
        if path.is_none() {
            log::warn!("Kiosk capture produced no image");
        }

        if !self.session.is_strip {
            self.session.pending_output_path = path;
            self.enter_review(now);
            return;
        }

        if let Some(path) = path {
            self.session.captured_paths.push(path);
        }
        self.session.shot_index += 1;

        if self.session.shot_index < self.session.shot_total {
            self.session.enter(SessionState::StripGap, now);
            self.publish(
                Phase::Waiting {
                    target_ms: deadline_epoch_ms(self.timings.strip_gap),
                    shot: self.session.shot_index + 1,
                    total: self.session.shot_total,
                },
                "Next photo coming up...",
            );
        } else {
            self.publish(Phase::Processing, "Creating photo strip...");
            self.session.pending_output_path = if self.session.captured_paths.is_empty() {
                log::warn!("No strip shots were captured");
                None
            } else {
                self.backend.stitch(&self.session.captured_paths)
            };
            self.enter_review(now);
        }
    }

    fn enter_review(&mut self, now: Instant) {
        self.session.review_image = match self.session.pending_output_path.clone() {
            Some(path) => self.backend.load_review(&path),
            None => None,
        };
        self.session.enter(SessionState::Review, now);
        self.publish(Phase::Processing, "Looking good!");
    }

    fn start_printing(&mut self, now: Instant) {
        let Some(path) = self.session.pending_output_path.clone() else {
            log::warn!("Nothing to print, returning to idle");
            self.publish(Phase::Error, "Capture failed");
            self.return_to_idle(now);
            return;
        };
        self.print_result = Some(self.backend.start_print(&path, self.session.kind()));
        self.session.enter(SessionState::Printing, now);
        self.publish(Phase::Printing, "Printing...");
    }

    fn finish_printing(&mut self, printed: bool, now: Instant) {
        self.print_result = None;
        let message = match (printed, self.session.is_strip) {
            (true, false) => "Photo printed! 🎉",
            (true, true) => "Photo strip printed! 🎉",
            (false, _) => "Photo saved, but printing failed",
        };
        let image_url = self
            .session
            .pending_output_path
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| photo_url(&n.to_string_lossy()));
        self.publish(Phase::Success { image_url }, message);
        self.return_to_idle(now);
    }

    fn return_to_idle(&mut self, now: Instant) {
        self.session.enter(SessionState::Idle, now);
        self.session.review_image = None;
        self.guard = None;
    }

    fn shot_label(&self) -> (Option<usize>, Option<usize>) {
        if self.session.is_strip {
            (Some(self.session.shot_index + 1), Some(self.session.shot_total))
        } else {
            (None, None)
        }
    }

    fn publish(&mut self, phase: Phase, message: &str) {
        if let Some(guard) = self.guard.as_mut() {
            guard.publish(phase, message);
        }
    }
}
