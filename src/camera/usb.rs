use super::CameraBackend;
use crate::config::CameraConfig;
use crate::errors::BoothError;
use crate::types::Frame;
use nokhwa::{
    pixel_format::RgbFormat,
    utils::{CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution},
    CallbackCamera,
};

/// USB webcam opened through nokhwa's native backend (V4L2 on Linux)
pub struct UsbCamera {
    camera: CallbackCamera,
    name: String,
}

impl UsbCamera {
    /// Open the camera and start its stream
    ///
    /// Requests MJPEG at the configured resolution, which nearly every UVC
    /// webcam offers at 30 fps.
    pub fn open(config: &CameraConfig) -> Result<Self, BoothError> {
        let [width, height] = config.resolution;
        let requested_format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
            nokhwa::utils::CameraFormat::new(
                Resolution::new(width, height),
                FrameFormat::MJPEG,
                30,
            ),
        ));

        let mut camera = CallbackCamera::new(
            CameraIndex::Index(config.device_index),
            requested_format,
            |_| {},
        )
        .map_err(|e| BoothError::Camera(format!("Failed to initialize camera: {}", e)))?;

        camera
            .open_stream()
            .map_err(|e| BoothError::Camera(format!("Failed to start stream: {}", e)))?;

        let name = camera
            .info()
            .map(|info| info.human_name())
            .unwrap_or_else(|_| format!("usb:{}", config.device_index));

        log::info!("USB camera {} streaming", name);
        Ok(Self { camera, name })
    }
}

impl CameraBackend for UsbCamera {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_frame(&mut self) -> Result<Frame, BoothError> {
        let buffer = self
            .camera
            .poll_frame()
            .map_err(|e| BoothError::Camera(format!("Failed to capture frame: {}", e)))?;

        let decoded = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| BoothError::Camera(format!("Failed to decode frame: {}", e)))?;

        let (width, height) = (decoded.width(), decoded.height());
        Ok(Frame::new(width, height, decoded.into_raw()))
    }

    fn close(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            log::warn!("Failed to stop USB camera stream: {}", e);
        }
        log::info!("USB camera {} closed", self.name);
    }
}
