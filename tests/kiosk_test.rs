//! Kiosk session liveness and a full kiosk run on synthetic hardware.

use image::{Rgb, RgbImage};
use photobooth::capture::CaptureService;
use photobooth::config::BoothConfig;
use photobooth::frame_source::FrameSource;
use photobooth::gate::CaptureGate;
use photobooth::kiosk::{
    BoothBackend, KioskApp, KioskBackend, KioskFeed, KioskTimings, Mailbox, SessionController,
    SessionState,
};
use photobooth::printer::PrintSink;
use photobooth::testing::{MemoryTransport, SyntheticCamera};
use photobooth::types::CaptureKind;
use proptest::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Backend whose outcomes are drawn from the test input.
struct ChaosBackend {
    capture_ok: bool,
    stitch_ok: bool,
    print_outcome: Option<bool>,
}

impl KioskBackend for ChaosBackend {
    fn capture(&mut self, kind: CaptureKind) -> Option<PathBuf> {
        self.capture_ok
            .then(|| PathBuf::from(format!("{}_x.jpg", kind.shot_prefix())))
    }

    fn stitch(&mut self, _paths: &[PathBuf]) -> Option<PathBuf> {
        self.stitch_ok.then(|| PathBuf::from("photostrip_x.jpg"))
    }

    fn load_review(&mut self, _path: &Path) -> Option<RgbImage> {
        Some(RgbImage::from_pixel(2, 2, Rgb([0, 0, 0])))
    }

    fn start_print(&mut self, _path: &Path, _kind: CaptureKind) -> Receiver<bool> {
        let (tx, rx) = mpsc::channel();
        if let Some(outcome) = self.print_outcome {
            let _ = tx.send(outcome);
        }
        rx
    }
}

fn timings(ms: u64, shots: usize) -> KioskTimings {
    KioskTimings {
        countdown: Duration::from_millis(ms * 3),
        flash: Duration::from_millis(ms / 5 + 1),
        review: Duration::from_millis(ms * 4),
        strip_gap: Duration::from_millis(ms * 2),
        strip_shots: shots,
    }
}

proptest! {
    /// From any session start, the kiosk is back to idle within a bounded
    /// number of ticks, and the gate is released.
    #[test]
    fn session_always_returns_to_idle(
        strip in any::<bool>(),
        shots in 1usize..5,
        capture_ok in any::<bool>(),
        stitch_ok in any::<bool>(),
        print_outcome in prop::option::of(any::<bool>()),
        unit_ms in 1u64..200,
        tick_ms in 1u64..100,
        extra_triggers in prop::collection::vec(any::<bool>(), 0..20),
    ) {
        let t0 = Instant::now();
        let mailbox = Mailbox::new();
        let gate = CaptureGate::new();
        let backend = ChaosBackend { capture_ok, stitch_ok, print_outcome };
        let mut kiosk = SessionController::new(
            timings(unit_ms, shots),
            mailbox.clone(),
            gate.clone(),
            backend,
            t0,
        );

        mailbox.post(if strip { CaptureKind::Strip } else { CaptureKind::Single });
        let mut now = t0;
        kiosk.tick(now);
        prop_assert_eq!(kiosk.state(), SessionState::Countdown);

        let mut extra = extra_triggers.into_iter();
        let mut ticks = 0;
        while kiosk.state() != SessionState::Idle {
            if let Some(strip) = extra.next() {
                mailbox.post(if strip { CaptureKind::Strip } else { CaptureKind::Single });
            }
            now += Duration::from_millis(tick_ms);
            kiosk.tick(now);
            ticks += 1;
            prop_assert!(ticks < 10_000, "stuck in {:?}", kiosk.state());
        }
        prop_assert!(!gate.is_busy());
    }
}

#[test]
fn kiosk_runs_a_single_photo_session() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = BoothConfig::default();
    config.storage.photos_dir = dir.path().to_string_lossy().into_owned();
    config.kiosk.countdown_ms = 30;
    config.kiosk.flash_ms = 10;
    config.kiosk.review_ms = 30;
    config.kiosk.tick_ms = 5;
    config.kiosk.screen_size = [160, 90];

    let source = Arc::new(
        FrameSource::start(
            Box::new(SyntheticCamera::gradient(320, 240)),
            Duration::from_millis(5),
        )
        .unwrap(),
    );
    assert!(source.wait_for_frame(Duration::from_secs(2)).is_some());
    let capture = Arc::new(CaptureService::new(
        source.clone(),
        &config.storage,
        &config.strip,
    ));
    let transport = MemoryTransport::new();
    let printer = PrintSink::with_transport(&config.printer, Arc::new(transport.clone()));

    let mailbox = Mailbox::new();
    let feed = KioskFeed::new(mailbox.clone());
    let gate = CaptureGate::new();
    let backend = BoothBackend::new(capture, printer, config.thermal.clone(), config.strip.spacing_px);
    let controller = SessionController::new(
        KioskTimings::from_config(&config.kiosk, &config.strip),
        mailbox,
        gate.clone(),
        backend,
        Instant::now(),
    );
    let mut app = KioskApp::new(controller, source.clone(), feed.clone(), &config.kiosk);

    assert_eq!(app.step(Instant::now(), 0), SessionState::Idle);
    assert_eq!(feed.overlay().banner.as_deref(), Some("Press the button to take a photo!"));

    feed.trigger(CaptureKind::Single);
    let mut seen = vec![];
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut frame = 1;
    loop {
        let state = app.step(Instant::now(), frame);
        frame += 1;
        if seen.last() != Some(&state) {
            seen.push(state);
        }
        if state == SessionState::Idle || Instant::now() > deadline {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(
        seen,
        vec![
            SessionState::Countdown,
            SessionState::Flash,
            SessionState::Review,
            SessionState::Printing,
            SessionState::Idle,
        ]
    );
    assert!(!gate.is_busy());
    assert_eq!(gate.status().message, "Photo printed! 🎉");
    assert!(!transport.bytes().is_empty());
    source.stop();
}
