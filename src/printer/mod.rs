//! Thermal printer output.
//!
//! Printing is best effort: every public entry point reports success as a
//! bool and logs the reason for a failure instead of returning it.

pub mod escpos;

use crate::config::PrinterConfig;
use crate::errors::BoothError;
use crate::types::CaptureKind;
use escpos::{EscPos, TextStyle};
use image::imageops::{self, FilterType};
use image::GrayImage;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Vendors commonly found on USB receipt printers.
const THERMAL_VENDORS: &[(u16, &str)] = &[
    (0x0416, "RONGTA"),
    (0x0483, "STMicroelectronics"),
    (0x04b8, "Epson"),
    (0x0525, "Generic Thermal Printer"),
    (0x0fe6, "Generic Printer"),
    (0x1504, "RONGTA"),
    (0x1a86, "QinHeng"),
    (0x1fc9, "NXP"),
    (0x28e9, "RONGTA"),
];

const SYS_USB_DEVICES: &str = "/sys/bus/usb/devices";
const SYS_USBLP_CLASSES: &[&str] = &["/sys/class/usbmisc", "/sys/class/usb"];
const DEV_USBLP: &str = "/dev/usb";

/// Something bytes can be sent to. Opened once per print job.
pub trait PrinterTransport: Send + Sync {
    fn describe(&self) -> String;

    fn open(&self) -> Result<Box<dyn Write + Send>, BoothError>;
}

/// Kernel `usblp` character device for a VID/PID pair.
#[derive(Debug, Clone)]
pub struct UsbLpTransport {
    vendor_id: u16,
    product_id: u16,
    device_path: Option<PathBuf>,
}

impl UsbLpTransport {
    pub fn from_config(config: &PrinterConfig) -> Self {
        Self {
            vendor_id: config.vendor_id,
            product_id: config.product_id,
            device_path: config.device_path.as_ref().map(PathBuf::from),
        }
    }

    fn resolve(&self) -> Result<PathBuf, BoothError> {
        if let Some(path) = &self.device_path {
            return Ok(path.clone());
        }
        SYS_USBLP_CLASSES
            .iter()
            .find_map(|class| {
                find_usblp(Path::new(class), Path::new(DEV_USBLP), self.vendor_id, self.product_id)
            })
            .ok_or_else(|| {
                BoothError::Printer(format!(
                    "No printer {:04x}:{:04x} found",
                    self.vendor_id, self.product_id
                ))
            })
    }
}

impl PrinterTransport for UsbLpTransport {
    fn describe(&self) -> String {
        match &self.device_path {
            Some(path) => path.display().to_string(),
            None => format!("usb {:04x}:{:04x}", self.vendor_id, self.product_id),
        }
    }

    fn open(&self) -> Result<Box<dyn Write + Send>, BoothError> {
        let path = self.resolve()?;
        let file = OpenOptions::new().write(true).open(&path).map_err(|e| {
            BoothError::Printer(format!("Failed to open {}: {}", path.display(), e))
        })?;
        log::debug!("Printer opened at {}", path.display());
        Ok(Box::new(file))
    }
}

/// Find `/dev/usb/lpN` whose USB parent matches `vendor_id:product_id`.
fn find_usblp(class_dir: &Path, dev_dir: &Path, vendor_id: u16, product_id: u16) -> Option<PathBuf> {
    let entries = fs::read_dir(class_dir).ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with("lp") {
            continue;
        }
        // `device` points at the USB interface, its parent is the device
        let Ok(interface) = fs::canonicalize(entry.path().join("device")) else {
            continue;
        };
        let Some(usb_device) = interface.parent() else {
            continue;
        };
        if read_usb_ids(usb_device) == Some((vendor_id, product_id)) {
            return Some(dev_dir.join(name));
        }
    }
    None
}

fn read_hex_id(path: &Path) -> Option<u16> {
    let text = fs::read_to_string(path).ok()?;
    u16::from_str_radix(text.trim(), 16).ok()
}

fn read_usb_ids(device: &Path) -> Option<(u16, u16)> {
    Some((
        read_hex_id(&device.join("idVendor"))?,
        read_hex_id(&device.join("idProduct"))?,
    ))
}

fn read_attr(device: &Path, name: &str) -> String {
    fs::read_to_string(device.join(name))
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "Unknown".to_string())
}

/// A USB device that looks like a receipt printer.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PrinterInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub manufacturer: String,
    pub product: String,
}

/// Scan the USB bus for likely thermal printers.
pub fn list_printers() -> Vec<PrinterInfo> {
    scan_printers(Path::new(SYS_USB_DEVICES))
}

fn scan_printers(devices_dir: &Path) -> Vec<PrinterInfo> {
    let Ok(entries) = fs::read_dir(devices_dir) else {
        log::warn!("Cannot read {}", devices_dir.display());
        return Vec::new();
    };

    let mut printers: Vec<PrinterInfo> = entries
        .flatten()
        .filter_map(|entry| {
            let dir = entry.path();
            let (vendor_id, product_id) = read_usb_ids(&dir)?;
            let manufacturer = read_attr(&dir, "manufacturer");
            let product = read_attr(&dir, "product");
            let known_vendor = THERMAL_VENDORS.iter().any(|(id, _)| *id == vendor_id);
            let looks_like_printer = product.to_lowercase().contains("printer")
                || manufacturer.to_lowercase().contains("rongta");
            (known_vendor || looks_like_printer).then_some(PrinterInfo {
                vendor_id,
                product_id,
                manufacturer,
                product,
            })
        })
        .collect();

    printers.sort_by_key(|p| (p.vendor_id, p.product_id));
    printers.dedup();
    printers
}

pub fn vendor_name(vendor_id: u16) -> Option<&'static str> {
    THERMAL_VENDORS
        .iter()
        .find(|(id, _)| *id == vendor_id)
        .map(|(_, name)| *name)
}

/// Receipt printer front end.
#[derive(Clone)]
pub struct PrintSink {
    config: PrinterConfig,
    transport: Arc<dyn PrinterTransport>,
}

impl PrintSink {
    pub fn new(config: &PrinterConfig) -> Self {
        Self::with_transport(config, Arc::new(UsbLpTransport::from_config(config)))
    }

    pub fn with_transport(config: &PrinterConfig, transport: Arc<dyn PrinterTransport>) -> Self {
        Self {
            config: config.clone(),
            transport,
        }
    }

    /// Masthead for a capture of `kind`.
    pub fn title_for(&self, kind: CaptureKind) -> &str {
        match kind {
            CaptureKind::Single => &self.config.title,
            CaptureKind::Strip => &self.config.strip_title,
        }
    }

    /// Print a raster under `title`. Returns false on any failure.
    pub fn print_photo(&self, path: &Path, title: &str) -> bool {
        log::info!("Printing {} on {}", path.display(), self.transport.describe());
        match self.try_print_photo(path, title) {
            Ok(()) => {
                log::info!("Photo printed");
                true
            }
            Err(e) => {
                log::error!("Error printing: {}", e);
                false
            }
        }
    }

    /// Text-only test page.
    pub fn print_message(&self, message: &str) -> bool {
        match self.try_print_message(message) {
            Ok(()) => {
                log::info!("Message printed");
                true
            }
            Err(e) => {
                log::error!("Error printing message: {}", e);
                false
            }
        }
    }

    fn try_print_photo(&self, path: &Path, title: &str) -> Result<(), BoothError> {
        let raster = self.load_raster(path)?;
        let mut printer = EscPos::new(self.transport.open()?);

        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");

        printer.init()?;
        printer.set(TextStyle::masthead())?;
        printer.text(&format!("\n{title}\n"))?;
        printer.set(TextStyle::small())?;
        printer.text(&format!("{timestamp}\n"))?;
        printer.set(TextStyle::centered())?;
        printer.text(&format!("{}\n\n", "=".repeat(24)))?;

        printer.image(&raster)?;

        printer.text("\n")?;
        printer.text(&format!("{}\n", "-".repeat(24)))?;
        printer.text(&format!("{}\n", self.config.footer))?;
        printer.feed(3)?;
        self.finish(printer)
    }

    fn try_print_message(&self, message: &str) -> Result<(), BoothError> {
        let mut printer = EscPos::new(self.transport.open()?);
        let rule = "=".repeat(32);

        printer.init()?;
        printer.set(TextStyle::centered())?;
        printer.text(&format!("\n{rule}\n\n"))?;
        printer.set(TextStyle::masthead())?;
        printer.text("PHOTOBOOTH\n")?;
        printer.set(TextStyle::centered())?;
        printer.text(&format!("\n{message}\n\n{rule}\n"))?;
        printer.feed(3)?;
        self.finish(printer)
    }

    fn finish(&self, mut printer: EscPos<Box<dyn Write + Send>>) -> Result<(), BoothError> {
        if self.config.cut_paper {
            // Not every firmware has a cutter
            if let Err(e) = printer.cut() {
                log::debug!("Paper cut failed: {}", e);
            }
        }
        printer.flush()?;
        Ok(())
    }

    /// Load the raster and shrink it to the head width if needed.
    fn load_raster(&self, path: &Path) -> Result<GrayImage, BoothError> {
        let raster = image::open(path)?.to_luma8();
        let max_width = self.config.width_px;
        if raster.width() <= max_width {
            return Ok(raster);
        }
        let height = (u64::from(raster.height()) * u64::from(max_width) / u64::from(raster.width()))
            .max(1) as u32;
        Ok(imageops::resize(&raster, max_width, height, FilterType::Triangle))
    }
}
