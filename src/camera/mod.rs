//! Camera backends behind one small interface.
//!
//! The frame source and capture service only ever see `CameraBackend`; the
//! concrete variant is picked once at startup from `CameraConfig::backend`.

pub mod board;
#[cfg(feature = "usb-camera")]
pub mod usb;

use crate::config::CameraConfig;
use crate::errors::BoothError;
use crate::testing::SyntheticCamera;
use crate::types::Frame;
use serde::{Deserialize, Serialize};

/// One opened physical (or synthetic) camera.
///
/// `read_frame` errors are treated as transient by the acquisition loop;
/// only opening the backend is allowed to fail hard.
pub trait CameraBackend: Send {
    fn name(&self) -> &str;

    fn read_frame(&mut self) -> Result<Frame, BoothError>;

    /// Release the device. Called once after the acquisition loop exits.
    fn close(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraKind {
    /// Board camera if its tooling is installed, otherwise USB
    Auto,
    Usb,
    Board,
    Synthetic,
}

impl CameraKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CameraKind::Auto => "auto",
            CameraKind::Usb => "usb",
            CameraKind::Board => "board",
            CameraKind::Synthetic => "synthetic",
        }
    }
}

/// Open the configured camera.
pub fn open_camera(config: &CameraConfig) -> Result<Box<dyn CameraBackend>, BoothError> {
    log::info!("Opening camera backend: {}", config.backend.as_str());

    match config.backend {
        CameraKind::Board => Ok(Box::new(board::BoardCamera::open(config)?)),
        CameraKind::Usb => open_usb(config),
        CameraKind::Synthetic => {
            let [width, height] = config.resolution;
            Ok(Box::new(SyntheticCamera::gradient(width, height)))
        }
        CameraKind::Auto => {
            if board::is_available(&config.board_command) {
                match board::BoardCamera::open(config) {
                    Ok(camera) => return Ok(Box::new(camera)),
                    Err(e) => log::warn!("Board camera unavailable, trying USB: {}", e),
                }
            }
            open_usb(config)
        }
    }
}

#[cfg(feature = "usb-camera")]
fn open_usb(config: &CameraConfig) -> Result<Box<dyn CameraBackend>, BoothError> {
    Ok(Box::new(usb::UsbCamera::open(config)?))
}

#[cfg(not(feature = "usb-camera"))]
fn open_usb(_config: &CameraConfig) -> Result<Box<dyn CameraBackend>, BoothError> {
    Err(BoothError::Camera(
        "USB camera support not compiled in (enable the usb-camera feature)".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_synthetic_camera() {
        let config = CameraConfig {
            backend: CameraKind::Synthetic,
            resolution: [64, 48],
            ..CameraConfig::default()
        };
        let mut camera = open_camera(&config).unwrap();
        let frame = camera.read_frame().unwrap();
        assert_eq!((frame.width, frame.height), (64, 48));
        assert!(frame.is_valid());
    }

    #[test]
    fn test_board_camera_missing_command_fails_to_open() {
        let config = CameraConfig {
            backend: CameraKind::Board,
            board_command: "definitely-not-a-camera-tool".to_string(),
            ..CameraConfig::default()
        };
        assert!(matches!(open_camera(&config), Err(BoothError::Camera(_))));
    }

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_string(&CameraKind::Board).unwrap();
        assert_eq!(json, "\"board\"");
    }
}
