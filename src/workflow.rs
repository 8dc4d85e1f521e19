//! Headless capture workflows started from the network or the button box.
//!
//! Each admitted workflow runs on its own short-lived thread holding the
//! `GateGuard`, so the gate reopens however the thread ends.

use crate::capture::{CaptureService, StripProgress};
use crate::config::BoothConfig;
use crate::errors::BoothError;
use crate::frame_source::FrameSource;
use crate::gate::{CaptureGate, GateGuard, Phase, WorkflowStatus};
use crate::library::{photo_url, PhotoLibrary};
use crate::metadata::MetadataStore;
use crate::printer::PrintSink;
use crate::thermal::process_for_thermal;
use crate::timing::deadline_epoch_ms;
use crate::types::CaptureKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("Photo already in progress!")]
    Busy,
    #[error("Camera not available")]
    CameraUnavailable,
    #[error("{0}")]
    Photo(BoothError),
    #[error("Failed to start workflow: {0}")]
    Spawn(String),
}

/// Timing and output choices for one capture run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureOptions {
    pub countdown: Duration,
    pub shots: usize,
    pub gap: Duration,
    pub print: bool,
}

/// A running workflow.
pub struct WorkflowHandle {
    run_id: Uuid,
    updates: watch::Receiver<WorkflowStatus>,
    worker: JoinHandle<Option<PathBuf>>,
}

impl WorkflowHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn updates(&self) -> watch::Receiver<WorkflowStatus> {
        self.updates.clone()
    }

    /// Wait for the workflow. Returns the output image, if one was produced.
    pub fn join(self) -> Option<PathBuf> {
        self.worker.join().unwrap_or_else(|_| {
            log::error!("Workflow {} panicked", self.run_id);
            None
        })
    }
}

/// Everything a workflow needs, shared by the HTTP server and the kiosk.
pub struct Booth {
    config: BoothConfig,
    capture: Option<Arc<CaptureService>>,
    gate: Arc<CaptureGate>,
    printer: PrintSink,
    metadata: Arc<MetadataStore>,
    library: PhotoLibrary,
    joystick_connected: Mutex<Option<Arc<AtomicBool>>>,
}

impl Booth {
    pub fn new(config: BoothConfig, source: Option<Arc<FrameSource>>, printer: PrintSink) -> Arc<Self> {
        let capture = source
            .map(|source| Arc::new(CaptureService::new(source, &config.storage, &config.strip)));
        let metadata = Arc::new(MetadataStore::open(config.storage.metadata_path()));
        let library = PhotoLibrary::new(config.storage.photos_path());

        Arc::new(Self {
            config,
            capture,
            gate: CaptureGate::new(),
            printer,
            metadata,
            library,
            joystick_connected: Mutex::new(None),
        })
    }

    /// Open the camera and printer from `config`.
    ///
    /// A camera that fails to open is logged and leaves the booth running
    /// without one; capture requests then report it as unavailable.
    pub fn open(config: BoothConfig) -> Arc<Self> {
        let source = match FrameSource::open(&config.camera) {
            Ok(source) => {
                let warmup = Duration::from_millis(config.camera.warmup_timeout_ms);
                if source.wait_for_frame(warmup).is_none() {
                    log::warn!("Camera opened but produced no frame within {:?}", warmup);
                }
                Some(Arc::new(source))
            }
            Err(e) => {
                log::error!("Camera unavailable: {}", e);
                None
            }
        };
        let printer = PrintSink::new(&config.printer);
        Self::new(config, source, printer)
    }

    pub fn config(&self) -> &BoothConfig {
        &self.config
    }

    pub fn gate(&self) -> &Arc<CaptureGate> {
        &self.gate
    }

    pub fn capture_service(&self) -> Option<&Arc<CaptureService>> {
        self.capture.as_ref()
    }

    pub fn frame_source(&self) -> Option<&Arc<FrameSource>> {
        self.capture.as_ref().map(|c| c.frame_source())
    }

    pub fn printer(&self) -> &PrintSink {
        &self.printer
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    pub fn library(&self) -> &PhotoLibrary {
        &self.library
    }

    pub fn camera_available(&self) -> bool {
        self.capture.is_some()
    }

    pub fn attach_joystick(&self, connected: Arc<AtomicBool>) {
        *self
            .joystick_connected
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(connected);
    }

    pub fn joystick_connected(&self) -> bool {
        self.joystick_connected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Options for a network or button triggered capture.
    pub fn default_options(&self, kind: CaptureKind) -> CaptureOptions {
        match kind {
            CaptureKind::Single => CaptureOptions {
                countdown: Duration::from_millis(self.config.server.countdown_ms),
                shots: 1,
                gap: Duration::ZERO,
                print: true,
            },
            CaptureKind::Strip => CaptureOptions {
                countdown: Duration::from_millis(self.config.strip.countdown_ms),
                shots: self.config.strip.shots,
                gap: Duration::from_millis(self.config.strip.gap_ms),
                print: true,
            },
        }
    }

    pub fn start_capture(self: &Arc<Self>, kind: CaptureKind) -> Result<WorkflowHandle, TriggerError> {
        self.start_capture_with(kind, self.default_options(kind))
    }

    /// Admit a capture through the gate and run it in the background.
    pub fn start_capture_with(
        self: &Arc<Self>,
        kind: CaptureKind,
        options: CaptureOptions,
    ) -> Result<WorkflowHandle, TriggerError> {
        let guard = self.gate.try_acquire(Some(kind)).ok_or(TriggerError::Busy)?;
        let Some(capture) = self.capture.clone() else {
            log::warn!("Capture requested but no camera is open");
            guard.release_quietly();
            return Err(TriggerError::CameraUnavailable);
        };

        let booth = self.clone();
        spawn_workflow(guard, move |guard| booth.run_capture(guard, &capture, kind, options))
    }

    /// Print an existing photo again.
    pub fn start_reprint(self: &Arc<Self>, name: &str) -> Result<WorkflowHandle, TriggerError> {
        let path = self.library.resolve_printable(name).map_err(TriggerError::Photo)?;
        let kind = CaptureKind::from_file_name(name);
        let guard = self.gate.try_acquire(Some(kind)).ok_or(TriggerError::Busy)?;

        let booth = self.clone();
        spawn_workflow(guard, move |guard| booth.run_reprint(guard, path, kind))
    }

    fn run_capture(
        &self,
        guard: &mut GateGuard,
        capture: &CaptureService,
        kind: CaptureKind,
        options: CaptureOptions,
    ) -> Option<PathBuf> {
        let output = match kind {
            CaptureKind::Single => {
                guard.publish(
                    Phase::Countdown {
                        target_ms: deadline_epoch_ms(options.countdown),
                        shot: None,
                        total: None,
                    },
                    "Say cheese! 📸",
                );
                std::thread::sleep(options.countdown);
                guard.publish(Phase::Capturing { shot: None, total: None }, "📸");
                capture.capture(Duration::ZERO, kind.shot_prefix())
            }
            CaptureKind::Strip => {
                let paths = capture.capture_strip_observed(
                    options.shots,
                    options.countdown,
                    options.gap,
                    &mut |progress| publish_strip_progress(guard, progress),
                );
                guard.publish(Phase::Processing, "Creating photo strip...");
                capture.create_strip(&paths, self.config.strip.spacing_px)
            }
        };

        let Some(output) = output else {
            guard.publish(Phase::Error, "Capture failed, no camera frame");
            return None;
        };

        let message = if !options.print {
            "Photo saved! 🎉"
        } else if self.print(guard, &output, kind) {
            match kind {
                CaptureKind::Single => "Photo printed! 🎉",
                CaptureKind::Strip => "Photo strip printed! 🎉",
            }
        } else {
            "Photo saved, but printing failed"
        };

        guard.publish(
            Phase::Success {
                image_url: Some(image_url(&output)),
            },
            message,
        );
        Some(output)
    }

    fn run_reprint(&self, guard: &mut GateGuard, path: PathBuf, kind: CaptureKind) -> Option<PathBuf> {
        if self.print(guard, &path, kind) {
            guard.publish(
                Phase::Success {
                    image_url: Some(image_url(&path)),
                },
                "Reprinted! 🎉",
            );
            Some(path)
        } else {
            guard.publish(Phase::Error, "Printing failed");
            None
        }
    }

    /// Render and print; capture and print outcomes stay separate.
    fn print(&self, guard: &mut GateGuard, path: &Path, kind: CaptureKind) -> bool {
        guard.publish(Phase::Printing, "Printing...");
        match process_for_thermal(path, kind.is_strip(), &self.config.thermal) {
            Ok(raster) => self.printer.print_photo(&raster, self.printer.title_for(kind)),
            Err(e) => {
                log::error!("Thermal rendering failed for {}: {}", path.display(), e);
                false
            }
        }
    }
}

fn publish_strip_progress(guard: &mut GateGuard, progress: StripProgress) {
    match progress {
        StripProgress::Countdown {
            shot,
            total,
            remaining,
        } => guard.publish(
            Phase::Countdown {
                target_ms: deadline_epoch_ms(remaining),
                shot: Some(shot),
                total: Some(total),
            },
            format!("Get ready for photo {shot}/{total}..."),
        ),
        StripProgress::Capturing { shot, total } => guard.publish(
            Phase::Capturing {
                shot: Some(shot),
                total: Some(total),
            },
            format!("Photo {shot}/{total}"),
        ),
        StripProgress::Waiting {
            shot,
            total,
            remaining,
        } => guard.publish(
            Phase::Waiting {
                target_ms: deadline_epoch_ms(remaining),
                shot,
                total,
            },
            "Next photo coming up...",
        ),
    }
}

fn image_url(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    photo_url(&name)
}

fn spawn_workflow<F>(mut guard: GateGuard, body: F) -> Result<WorkflowHandle, TriggerError>
where
    F: FnOnce(&mut GateGuard) -> Option<PathBuf> + Send + 'static,
{
    let run_id = guard.run_id();
    let updates = guard.subscribe();
    let worker = std::thread::Builder::new()
        .name("photobooth-workflow".to_string())
        .spawn(move || body(&mut guard))
        .map_err(|e| TriggerError::Spawn(e.to_string()))?;

    Ok(WorkflowHandle {
        run_id,
        updates,
        worker,
    })
}
