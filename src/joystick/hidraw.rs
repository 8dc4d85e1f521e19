//! Linux `hidraw` backend.
//!
//! The device node is found through sysfs: each `/sys/class/hidraw/hidrawN`
//! has a `device/uevent` with a `HID_ID=BUS:VENDOR:PRODUCT` line.

use super::{HidDevice, HidOpener};
use crate::errors::BoothError;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

const SYS_HIDRAW: &str = "/sys/class/hidraw";
const DEV_DIR: &str = "/dev";

pub struct HidrawOpener {
    vendor_id: u16,
    product_id: u16,
    sys_dir: PathBuf,
    dev_dir: PathBuf,
}

impl HidrawOpener {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            sys_dir: PathBuf::from(SYS_HIDRAW),
            dev_dir: PathBuf::from(DEV_DIR),
        }
    }

    /// `/dev/hidrawN` of the first matching device.
    pub fn find_node(&self) -> Option<PathBuf> {
        let mut names: Vec<String> = fs::read_dir(&self.sys_dir)
            .ok()?
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("hidraw"))
            .collect();
        names.sort();

        names.into_iter().find_map(|name| {
            let uevent = fs::read_to_string(self.sys_dir.join(&name).join("device/uevent")).ok()?;
            let ids = parse_hid_id(&uevent)?;
            (ids == (self.vendor_id, self.product_id)).then(|| self.dev_dir.join(&name))
        })
    }
}

/// Vendor and product from a `uevent` body (`HID_ID=0003:00000079:00000006`).
pub fn parse_hid_id(uevent: &str) -> Option<(u16, u16)> {
    let value = uevent
        .lines()
        .find_map(|line| line.trim().strip_prefix("HID_ID="))?;
    let mut parts = value.split(':');
    let _bus = parts.next()?;
    let vendor = u32::from_str_radix(parts.next()?, 16).ok()?;
    let product = u32::from_str_radix(parts.next()?, 16).ok()?;
    Some((u16::try_from(vendor).ok()?, u16::try_from(product).ok()?))
}

impl HidOpener for HidrawOpener {
    fn open(&mut self) -> Result<Box<dyn HidDevice>, BoothError> {
        let node = self.find_node().ok_or_else(|| {
            BoothError::Input(format!(
                "No HID device {:04x}:{:04x}",
                self.vendor_id, self.product_id
            ))
        })?;
        let file = open_nonblocking(&node)
            .map_err(|e| BoothError::Input(format!("Failed to open {}: {}", node.display(), e)))?;
        log::debug!("Opened {}", node.display());
        Ok(Box::new(HidrawDevice { file }))
    }
}

#[cfg(target_os = "linux")]
fn open_nonblocking(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
}

#[cfg(not(target_os = "linux"))]
fn open_nonblocking(_path: &Path) -> std::io::Result<File> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "hidraw is only available on Linux",
    ))
}

struct HidrawDevice {
    file: File,
}

impl HidDevice for HidrawDevice {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, BoothError> {
        use std::io::{ErrorKind, Read};
        match self.file.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {
                Ok(0)
            }
            Err(e) => Err(BoothError::Input(format!("HID read failed: {}", e))),
        }
    }
}
