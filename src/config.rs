//! Configuration management for the photobooth
//!
//! Provides configuration loading, saving, and validation for the camera,
//! printer, joystick, kiosk timings, strip layout, thermal rendering, storage
//! and the HTTP server.

use crate::camera::CameraKind;
use crate::errors::BoothError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BoothConfig {
    pub camera: CameraConfig,
    pub printer: PrinterConfig,
    pub joystick: JoystickConfig,
    pub kiosk: KioskConfig,
    pub strip: StripConfig,
    pub thermal: ThermalConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
}

/// Camera selection and acquisition settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Which backend to open (auto, usb, board, synthetic)
    pub backend: CameraKind,
    /// USB camera index
    pub device_index: u32,
    /// Requested resolution [width, height]
    pub resolution: [u32; 2],
    /// Board camera streaming command
    pub board_command: String,
    /// Delay before retrying a failed frame read
    pub read_retry_ms: u64,
    /// How long callers wait for the first frame after start
    pub warmup_timeout_ms: u64,
}

/// Thermal printer device and receipt text
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrinterConfig {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Explicit character device, bypasses the sysfs lookup
    pub device_path: Option<String>,
    /// Print head width in dots
    pub width_px: u32,
    /// Send a cut command after each print
    pub cut_paper: bool,
    pub title: String,
    pub strip_title: String,
    pub footer: String,
}

/// Physical button controller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JoystickConfig {
    pub enabled: bool,
    pub vendor_id: u16,
    pub product_id: u16,
    /// Byte of the HID report holding the button bits
    pub button_byte: usize,
    /// Mask isolating the buttons from the hat switch
    pub button_mask: u8,
    /// Bit that triggers a single photo (checked first)
    pub single_photo_bit: u8,
    /// Bit that triggers a photo strip
    pub photo_strip_bit: u8,
    pub debounce_ms: u64,
    pub reconnect_ms: u64,
    pub poll_interval_ms: u64,
}

/// Kiosk state machine timings and display
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KioskConfig {
    pub countdown_ms: u64,
    pub flash_ms: u64,
    pub review_ms: u64,
    pub strip_gap_ms: u64,
    pub tick_ms: u64,
    /// Display canvas [width, height]
    pub screen_size: [u32; 2],
}

/// Photo strip layout and headless strip pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StripConfig {
    pub shots: usize,
    pub spacing_px: u32,
    pub width_px: u32,
    pub countdown_ms: u64,
    pub gap_ms: u64,
}

/// Thermal raster rendering
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermalConfig {
    pub width_px: u32,
    pub contrast: f32,
    pub brightness: f32,
    pub sharpen: bool,
}

/// Storage and file management configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub photos_dir: String,
    /// Metadata file name inside the photos directory
    pub metadata_file: String,
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
}

/// HTTP control surface
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Enables session login when set
    pub password: Option<String>,
    /// Countdown before a web-triggered single photo
    pub countdown_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            backend: CameraKind::Auto,
            device_index: 0,
            resolution: [1280, 720],
            board_command: "rpicam-vid".to_string(),
            read_retry_ms: 50,
            warmup_timeout_ms: 5000,
        }
    }
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self {
            vendor_id: 0x0fe6,
            product_id: 0x811e,
            device_path: None,
            width_px: 576,
            cut_paper: true,
            title: "THE OCHO PHOTOBOOTH".to_string(),
            strip_title: "THE OCHO PHOTO STRIP".to_string(),
            footer: "Thanks for visiting!".to_string(),
        }
    }
}

impl Default for JoystickConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            vendor_id: 0x0079,
            product_id: 0x0006,
            button_byte: 5,
            button_mask: 0xF0,
            single_photo_bit: 4,
            photo_strip_bit: 5,
            debounce_ms: 2000,
            reconnect_ms: 3000,
            poll_interval_ms: 10,
        }
    }
}

impl Default for KioskConfig {
    fn default() -> Self {
        Self {
            countdown_ms: 3000,
            flash_ms: 200,
            review_ms: 4000,
            strip_gap_ms: 2000,
            tick_ms: 33,
            screen_size: [1280, 720],
        }
    }
}

impl Default for StripConfig {
    fn default() -> Self {
        Self {
            shots: 3,
            spacing_px: 20,
            width_px: 576,
            countdown_ms: 3000,
            gap_ms: 2000,
        }
    }
}

impl Default for ThermalConfig {
    fn default() -> Self {
        Self {
            width_px: 576,
            contrast: 1.4,
            brightness: 1.1,
            sharpen: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            photos_dir: "./photos".to_string(),
            metadata_file: "metadata.json".to_string(),
            jpeg_quality: 95,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            password: None,
            countdown_ms: 3000,
        }
    }
}

impl JoystickConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl StorageConfig {
    pub fn photos_path(&self) -> PathBuf {
        PathBuf::from(&self.photos_dir)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.photos_path().join(&self.metadata_file)
    }
}

impl BoothConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, BoothError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| BoothError::Config(format!("Failed to read config file: {}", e)))?;

        let config: BoothConfig = toml::from_str(&contents)
            .map_err(|e| BoothError::Config(format!("Failed to parse config file: {}", e)))?;

        config.validate().map_err(BoothError::Config)?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), BoothError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    BoothError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| BoothError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| BoothError::Config(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("photobooth.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.camera.resolution[0] == 0 || self.camera.resolution[1] == 0 {
            return Err("Invalid camera resolution".to_string());
        }

        if self.printer.width_px == 0 || self.printer.width_px % 8 != 0 {
            return Err("Printer width must be a positive multiple of 8".to_string());
        }

        if self.joystick.single_photo_bit > 7 || self.joystick.photo_strip_bit > 7 {
            return Err("Joystick button bits must be between 0 and 7".to_string());
        }
        let single_mask = 1u8 << self.joystick.single_photo_bit;
        let strip_mask = 1u8 << self.joystick.photo_strip_bit;
        if self.joystick.button_mask & single_mask == 0
            || self.joystick.button_mask & strip_mask == 0
        {
            return Err("Joystick button bits must lie inside the button mask".to_string());
        }
        if self.joystick.single_photo_bit == self.joystick.photo_strip_bit {
            return Err("Single photo and photo strip buttons must differ".to_string());
        }

        if self.kiosk.tick_ms == 0 || self.kiosk.tick_ms > 1000 {
            return Err("Kiosk tick must be between 1 and 1000 ms".to_string());
        }
        if self.kiosk.screen_size[0] == 0 || self.kiosk.screen_size[1] == 0 {
            return Err("Invalid kiosk screen size".to_string());
        }

        if self.strip.shots == 0 || self.strip.shots > 10 {
            return Err("Strip shots must be between 1 and 10".to_string());
        }
        if self.strip.width_px == 0 {
            return Err("Strip width must be positive".to_string());
        }

        if self.thermal.width_px == 0 {
            return Err("Thermal width must be positive".to_string());
        }
        if !(0.5..=3.0).contains(&self.thermal.contrast) {
            return Err("Thermal contrast must be between 0.5 and 3.0".to_string());
        }
        if !(0.5..=2.0).contains(&self.thermal.brightness) {
            return Err("Thermal brightness must be between 0.5 and 2.0".to_string());
        }

        if self.storage.jpeg_quality == 0 || self.storage.jpeg_quality > 100 {
            return Err("JPEG quality must be between 1 and 100".to_string());
        }
        if self.storage.metadata_file.contains('/') || self.storage.metadata_file.is_empty() {
            return Err("Metadata file must be a plain file name".to_string());
        }

        Ok(())
    }
}
