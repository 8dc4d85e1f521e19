//! Core data types shared across the booth: frames and capture kinds.

use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};

/// Filename prefix of single-photo outputs.
pub const SINGLE_PREFIX: &str = "photo";
/// Filename prefix of per-shot strip intermediates.
pub const STRIP_SHOT_PREFIX: &str = "strip";
/// Filename prefix of stitched strip outputs.
pub const STRIP_OUTPUT_PREFIX: &str = "photostrip";
/// Marker appended to the stem of printer-ready rasters.
pub const THERMAL_MARKER: &str = "_thermal";

/// One RGB8 raster pulled from a camera.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub sequence: u64,
    pub timestamp_us: u64,
    pub width: u32,
    pub height: u32,
    /// Packed RGB8, `width * height * 3` bytes
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            sequence: 0,
            timestamp_us: 0,
            width,
            height,
            data,
        }
    }

    pub fn from_rgb_image(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self::new(width, height, image.into_raw())
    }

    /// Frame filled with a single colour.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        Self::from_rgb_image(RgbImage::from_pixel(width, height, Rgb(rgb)))
    }

    /// Returns `None` when the buffer length does not match the dimensions.
    pub fn to_rgb_image(&self) -> Option<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.data.clone())
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.data.len() == (self.width as usize) * (self.height as usize) * 3
    }
}

/// What a capture workflow produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureKind {
    Single,
    Strip,
}

impl CaptureKind {
    pub fn is_strip(self) -> bool {
        matches!(self, CaptureKind::Strip)
    }

    /// Prefix used when saving the individual shots of this kind.
    pub fn shot_prefix(self) -> &'static str {
        match self {
            CaptureKind::Single => SINGLE_PREFIX,
            CaptureKind::Strip => STRIP_SHOT_PREFIX,
        }
    }

    /// Infer the kind of a finished output from its filename.
    ///
    /// Only stitched strips carry the `photostrip_` prefix; per-shot
    /// `strip_` files are plain photos when reprinted on their own.
    pub fn from_file_name(name: &str) -> Self {
        if name.starts_with(&format!("{}_", STRIP_OUTPUT_PREFIX)) {
            CaptureKind::Strip
        } else {
            CaptureKind::Single
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CaptureKind::Single => "single",
            CaptureKind::Strip => "strip",
        }
    }
}

impl std::str::FromStr for CaptureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" | "photo" => Ok(CaptureKind::Single),
            "strip" => Ok(CaptureKind::Strip),
            other => Err(format!("unknown capture kind: {}", other)),
        }
    }
}
