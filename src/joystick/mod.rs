//! Physical button box: rising-edge detection with a global debounce, on a
//! polling thread that reconnects by itself.

pub mod hidraw;

use crate::config::JoystickConfig;
use crate::errors::BoothError;
use crate::timing::StopSignal;
use crate::types::CaptureKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const REPORT_SIZE: usize = 64;

/// An opened input device. Dropping it closes the device.
pub trait HidDevice: Send {
    /// Read one report into `buf`. `Ok(0)` means nothing pending.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, BoothError>;
}

/// Opens the button box. Called again after every disconnect.
pub trait HidOpener: Send {
    fn open(&mut self) -> Result<Box<dyn HidDevice>, BoothError>;
}

/// Pure report-to-press translation.
#[derive(Debug, Clone)]
pub struct EdgeDetector {
    button_byte: usize,
    button_mask: u8,
    /// Checked in order; the first rising binding wins
    bindings: [(u8, CaptureKind); 2],
    debounce: Duration,
    previous_bits: u8,
    /// False after a disconnect until the next report has set the baseline
    primed: bool,
    last_accepted: Option<Instant>,
}

impl EdgeDetector {
    pub fn from_config(config: &JoystickConfig) -> Self {
        Self {
            button_byte: config.button_byte,
            button_mask: config.button_mask,
            bindings: [
                (1 << config.single_photo_bit, CaptureKind::Single),
                (1 << config.photo_strip_bit, CaptureKind::Strip),
            ],
            debounce: config.debounce(),
            previous_bits: 0,
            primed: true,
            last_accepted: None,
        }
    }

    pub fn button_byte(&self) -> usize {
        self.button_byte
    }

    pub fn previous_bits(&self) -> u8 {
        self.previous_bits
    }

    /// Feed one report. Returns the press it triggers, if any.
    ///
    /// At startup the baseline is "nothing held", so the first press fires.
    /// The first report after a reset only records which buttons are held.
    pub fn handle_report(&mut self, report: &[u8], now: Instant) -> Option<CaptureKind> {
        let current = report.get(self.button_byte)? & self.button_mask;
        let rising = current & !self.previous_bits;
        self.previous_bits = current;

        if !self.primed {
            self.primed = true;
            if current != 0 {
                log::debug!("Buttons {:#04x} held at reconnect, waiting for release", current);
            }
            return None;
        }

        if rising == 0 {
            return None;
        }

        if let Some(last) = self.last_accepted {
            if now.saturating_duration_since(last) < self.debounce {
                log::debug!("Button edge {:#04x} inside debounce window, ignored", rising);
                return None;
            }
        }

        let (_, kind) = self.bindings.iter().find(|(bit, _)| rising & bit != 0)?;
        self.last_accepted = Some(now);
        Some(*kind)
    }

    /// Forget the held buttons, so a reconnect cannot produce a stale edge.
    pub fn reset(&mut self) {
        self.previous_bits = 0;
        self.primed = false;
    }
}

/// Background reader delivering presses to a callback.
pub struct JoystickController {
    stop: Arc<StopSignal>,
    connected: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl JoystickController {
    /// Start polling. `on_press` runs on the polling thread and must return quickly.
    pub fn start<F>(
        config: &JoystickConfig,
        opener: Box<dyn HidOpener>,
        on_press: F,
    ) -> Result<Self, BoothError>
    where
        F: Fn(CaptureKind) + Send + 'static,
    {
        let stop = Arc::new(StopSignal::new());
        let connected = Arc::new(AtomicBool::new(false));

        let poller = Poller {
            detector: EdgeDetector::from_config(config),
            opener,
            device: None,
            stop: stop.clone(),
            connected: connected.clone(),
            reconnect: config.reconnect_interval(),
            poll: config.poll_interval(),
            failed_opens: 0,
        };

        let handle = std::thread::Builder::new()
            .name("photobooth-joystick".to_string())
            .spawn(move || poller.run(on_press))
            .map_err(|e| BoothError::Input(format!("spawn failed: {e}")))?;

        Ok(Self {
            stop,
            connected,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Start with the platform HID backend from `config`.
    pub fn start_default<F>(config: &JoystickConfig, on_press: F) -> Result<Self, BoothError>
    where
        F: Fn(CaptureKind) + Send + 'static,
    {
        let opener = hidraw::HidrawOpener::new(config.vendor_id, config.product_id);
        Self::start(config, Box::new(opener), on_press)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Shared view of the connection state for status reporting.
    pub fn connected_flag(&self) -> Arc<AtomicBool> {
        self.connected.clone()
    }

    /// Close the device and wait for the polling thread to exit.
    pub fn stop(&self) {
        self.stop.stop();
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("Joystick thread panicked");
            }
            log::info!("Joystick stopped");
        }
    }
}

impl Drop for JoystickController {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Poller {
    detector: EdgeDetector,
    opener: Box<dyn HidOpener>,
    device: Option<Box<dyn HidDevice>>,
    stop: Arc<StopSignal>,
    connected: Arc<AtomicBool>,
    reconnect: Duration,
    poll: Duration,
    failed_opens: u64,
}

impl Poller {
    fn run<F: Fn(CaptureKind)>(mut self, on_press: F) {
        let mut buf = [0u8; REPORT_SIZE];

        while !self.stop.is_stopped() {
            let Some(device) = self.device.as_mut() else {
                if !self.connect() && self.stop.sleep(self.reconnect) {
                    break;
                }
                continue;
            };

            match device.read(&mut buf) {
                Ok(n) if n > self.detector.button_byte() => {
                    if let Some(kind) = self.detector.handle_report(&buf[..n], Instant::now()) {
                        log::info!("Button pressed: {}", kind.as_str());
                        on_press(kind);
                    }
                }
                Ok(_) => {
                    if self.stop.sleep(self.poll) {
                        break;
                    }
                }
                Err(e) => {
                    log::warn!("Joystick disconnected: {}", e);
                    self.disconnect();
                    if self.stop.sleep(self.reconnect) {
                        break;
                    }
                }
            }
        }

        self.disconnect();
    }

    fn connect(&mut self) -> bool {
        match self.opener.open() {
            Ok(device) => {
                self.device = Some(device);
                self.connected.store(true, Ordering::SeqCst);
                self.failed_opens = 0;
                log::info!("Joystick connected");
                true
            }
            Err(e) => {
                if self.failed_opens == 0 {
                    log::info!("Joystick not available, retrying every {:?}: {}", self.reconnect, e);
                } else {
                    log::debug!("Joystick open failed: {}", e);
                }
                self.failed_opens += 1;
                false
            }
        }
    }

    fn disconnect(&mut self) {
        self.device = None;
        self.detector.reset();
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{button_report, HidStep, ScriptedHidOpener};
    use std::sync::mpsc;

    const K1: u8 = 0x10;
    const K2: u8 = 0x20;

    /// Detector that has already seen an idle report.
    fn detector() -> EdgeDetector {
        let mut d = EdgeDetector::from_config(&JoystickConfig::default());
        assert_eq!(d.handle_report(&button_report(5, 0x0F), Instant::now()), None);
        d
    }

    #[test]
    fn test_first_press_after_startup_fires() {
        // Pads that only report on change send the press as their first report
        let mut d = EdgeDetector::from_config(&JoystickConfig::default());
        assert_eq!(
            d.handle_report(&button_report(5, K2), Instant::now()),
            Some(CaptureKind::Strip)
        );
    }

    #[test]
    fn test_button_held_through_reconnect_does_not_fire() {
        let mut d = EdgeDetector::from_config(&JoystickConfig::default());
        let t0 = Instant::now();
        assert_eq!(d.handle_report(&button_report(5, K1), t0), Some(CaptureKind::Single));

        d.reset();
        assert_eq!(d.previous_bits(), 0);
        let later = t0 + Duration::from_secs(5);
        assert_eq!(d.handle_report(&button_report(5, K2), later), None);
        assert_eq!(d.handle_report(&button_report(5, K2), later), None);
        assert_eq!(d.handle_report(&button_report(5, 0), later), None);
        assert_eq!(d.handle_report(&button_report(5, K2), later), Some(CaptureKind::Strip));
    }

    #[test]
    fn test_rising_edge_fires_once() {
        let mut d = detector();
        let t0 = Instant::now();
        assert_eq!(d.handle_report(&button_report(5, K1), t0), Some(CaptureKind::Single));
        assert_eq!(d.handle_report(&button_report(5, K1), t0 + Duration::from_secs(5)), None);
    }

    #[test]
    fn test_hat_switch_is_masked() {
        let mut d = detector();
        let t0 = Instant::now();
        assert_eq!(d.handle_report(&button_report(5, 0x0F), t0), None);
        assert_eq!(d.handle_report(&button_report(5, 0x0F | K2), t0), Some(CaptureKind::Strip));
    }

    #[test]
    fn test_single_wins_when_both_rise() {
        let mut d = detector();
        assert_eq!(
            d.handle_report(&button_report(5, K1 | K2), Instant::now()),
            Some(CaptureKind::Single)
        );
    }

    #[test]
    fn test_unbound_button_does_not_arm_debounce() {
        let mut d = detector();
        let t0 = Instant::now();
        // K3 is inside the mask but bound to nothing
        assert_eq!(d.handle_report(&button_report(5, 0x40), t0), None);
        assert_eq!(
            d.handle_report(&button_report(5, 0x40 | K1), t0 + Duration::from_millis(10)),
            Some(CaptureKind::Single)
        );
    }

    #[test]
    fn test_short_report_is_ignored() {
        let mut d = detector();
        let before = d.previous_bits();
        assert_eq!(d.handle_report(&[0xFF; 3], Instant::now()), None);
        assert_eq!(d.previous_bits(), before);
    }

    #[test]
    fn test_debounce_expires() {
        let mut d = detector();
        let t0 = Instant::now();
        assert!(d.handle_report(&button_report(5, K1), t0).is_some());
        d.handle_report(&button_report(5, 0), t0 + Duration::from_millis(500));
        assert!(d
            .handle_report(&button_report(5, K1), t0 + Duration::from_millis(2100))
            .is_some());
    }

    #[test]
    fn test_controller_delivers_presses_and_reconnects() {
        let config = JoystickConfig {
            reconnect_ms: 5,
            poll_interval_ms: 1,
            debounce_ms: 0,
            ..JoystickConfig::default()
        };
        let opener = ScriptedHidOpener::new(vec![
            None,
            Some(vec![
                HidStep::Report(button_report(5, 0)),
                HidStep::Report(button_report(5, K1)),
                HidStep::Empty,
                HidStep::Fail,
            ]),
            Some(vec![
                // Still held through the reconnect: must not fire again
                HidStep::Report(button_report(5, K1)),
                HidStep::Report(button_report(5, 0)),
                HidStep::Report(button_report(5, K2)),
            ]),
        ]);
        let attempts = opener.open_attempts();

        let (tx, rx) = mpsc::channel();
        let controller = JoystickController::start(&config, Box::new(opener), move |kind| {
            let _ = tx.send(kind);
        })
        .unwrap();

        let presses: Vec<CaptureKind> = (0..2)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(presses, vec![CaptureKind::Single, CaptureKind::Strip]);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert!(controller.is_connected());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        controller.stop();
        assert!(!controller.is_connected());
    }

    #[test]
    fn test_stop_interrupts_reconnect_wait() {
        let config = JoystickConfig {
            reconnect_ms: 60_000,
            ..JoystickConfig::default()
        };
        let controller =
            JoystickController::start(&config, Box::new(ScriptedHidOpener::new(vec![])), |_| {})
                .unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let start = Instant::now();
        controller.stop();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!controller.is_connected());
    }
}
