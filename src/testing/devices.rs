//! Scripted stand-ins for the input device and the printer.

use crate::errors::BoothError;
use crate::joystick::{HidDevice, HidOpener};
use crate::printer::PrinterTransport;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// One scripted outcome of a HID read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HidStep {
    Report(Vec<u8>),
    /// Non-blocking read with nothing pending
    Empty,
    /// Communication failure, the device is gone
    Fail,
}

/// Build a report with `bits` at `button_byte`.
pub fn button_report(button_byte: usize, bits: u8) -> Vec<u8> {
    let mut report = vec![0u8; button_byte + 3];
    report[button_byte] = bits;
    report
}

/// Input device replaying a fixed script, then reporting no data forever.
#[derive(Debug)]
pub struct ScriptedHid {
    steps: VecDeque<HidStep>,
    reads: Arc<AtomicUsize>,
}

impl ScriptedHid {
    pub fn new(steps: Vec<HidStep>) -> Self {
        Self {
            steps: steps.into(),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl HidDevice for ScriptedHid {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, BoothError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        match self.steps.pop_front() {
            Some(HidStep::Report(bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            Some(HidStep::Empty) | None => Ok(0),
            Some(HidStep::Fail) => Err(BoothError::Input("scripted disconnect".to_string())),
        }
    }
}

/// Opener handing out scripted devices in order.
///
/// `None` entries make that open attempt fail. Once the list is exhausted
/// every further attempt fails.
#[derive(Debug)]
pub struct ScriptedHidOpener {
    sessions: VecDeque<Option<Vec<HidStep>>>,
    opens: Arc<AtomicUsize>,
}

impl ScriptedHidOpener {
    pub fn new(sessions: Vec<Option<Vec<HidStep>>>) -> Self {
        Self {
            sessions: sessions.into(),
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared counter of open attempts, readable after the opener moves.
    pub fn open_attempts(&self) -> Arc<AtomicUsize> {
        self.opens.clone()
    }
}

impl HidOpener for ScriptedHidOpener {
    fn open(&mut self) -> Result<Box<dyn HidDevice>, BoothError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        match self.sessions.pop_front() {
            Some(Some(steps)) => Ok(Box::new(ScriptedHid::new(steps))),
            _ => Err(BoothError::Input("scripted device not present".to_string())),
        }
    }
}

/// Printer transport capturing every byte in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    bytes: Arc<Mutex<Vec<u8>>>,
    fail_open: bool,
    opens: Arc<AtomicUsize>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A printer that is never present.
    pub fn unplugged() -> Self {
        Self {
            fail_open: true,
            ..Self::default()
        }
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

struct MemoryWriter {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl PrinterTransport for MemoryTransport {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    fn open(&self) -> Result<Box<dyn Write + Send>, BoothError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open {
            return Err(BoothError::Printer("printer not connected".to_string()));
        }
        Ok(Box::new(MemoryWriter {
            bytes: self.bytes.clone(),
        }))
    }
}
