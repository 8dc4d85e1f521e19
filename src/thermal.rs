//! Photo to 1-bit raster for the thermal print head.

use crate::capture::center_crop_square;
use crate::config::ThermalConfig;
use crate::errors::BoothError;
use crate::types::THERMAL_MARKER;
use image::imageops::{self, BiLevel, FilterType};
use image::{GrayImage, ImageFormat, Luma, RgbImage};
use std::path::{Path, PathBuf};

/// 3x3 sharpen kernel, normalised by its sum (16) inside `filter3x3`
const SHARPEN: [f32; 9] = [-2.0, -2.0, -2.0, -2.0, 32.0, -2.0, -2.0, -2.0, -2.0];

/// Where the raster for `source` is written: `name.jpg` -> `name_thermal.png`.
pub fn thermal_path(source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    source.with_file_name(format!("{stem}{THERMAL_MARKER}.png"))
}

/// True for a printer raster derived from another photo.
pub fn is_thermal_name(name: &str) -> bool {
    Path::new(name)
        .file_stem()
        .is_some_and(|stem| stem.to_string_lossy().ends_with(THERMAL_MARKER))
}

/// Render `path` for the printer and save it next to the source.
pub fn process_for_thermal(
    path: &Path,
    is_strip: bool,
    settings: &ThermalConfig,
) -> Result<PathBuf, BoothError> {
    let source = image::open(path)?.to_rgb8();
    let raster = render_thermal(&source, is_strip, settings);

    let output = thermal_path(path);
    raster.save_with_format(&output, ImageFormat::Png)?;
    log::info!(
        "Thermal raster {}x{} saved: {}",
        raster.width(),
        raster.height(),
        output.display()
    );
    Ok(output)
}

/// Crop/scale, grayscale, sharpen, contrast, brightness, then Floyd-Steinberg
/// down to pure black and white.
///
/// Singles are square-cropped. Strips keep their aspect ratio.
pub fn render_thermal(source: &RgbImage, is_strip: bool, settings: &ThermalConfig) -> GrayImage {
    let width = settings.width_px;
    let sized = if is_strip {
        let height = scaled_height(source.width(), source.height(), width);
        imageops::resize(source, width, height, FilterType::Lanczos3)
    } else {
        let square = center_crop_square(source);
        imageops::resize(&square, width, width, FilterType::Lanczos3)
    };

    let mut gray = imageops::grayscale(&sized);
    if settings.sharpen {
        gray = imageops::filter3x3(&gray, &SHARPEN);
    }
    adjust_contrast(&mut gray, settings.contrast);
    adjust_brightness(&mut gray, settings.brightness);
    imageops::dither(&mut gray, &BiLevel);
    gray
}

fn scaled_height(src_width: u32, src_height: u32, width: u32) -> u32 {
    if src_width == 0 {
        return 0;
    }
    let height = (u64::from(src_height) * u64::from(width)) / u64::from(src_width);
    height.max(1) as u32
}

/// Stretch values away from the image mean.
fn adjust_contrast(image: &mut GrayImage, factor: f32) {
    let pixels = u64::from(image.width()) * u64::from(image.height());
    if pixels == 0 {
        return;
    }
    let sum: u64 = image.pixels().map(|p| u64::from(p.0[0])).sum();
    let mean = (sum as f32 / pixels as f32).round();

    for Luma([v]) in image.pixels_mut() {
        *v = clamp_u8(mean + (f32::from(*v) - mean) * factor);
    }
}

fn adjust_brightness(image: &mut GrayImage, factor: f32) {
    for Luma([v]) in image.pixels_mut() {
        *v = clamp_u8(f32::from(*v) * factor);
    }
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn settings(width: u32) -> ThermalConfig {
        ThermalConfig {
            width_px: width,
            ..ThermalConfig::default()
        }
    }

    #[test]
    fn test_thermal_path() {
        assert_eq!(
            thermal_path(Path::new("/photos/photo_1.jpg")),
            PathBuf::from("/photos/photo_1_thermal.png")
        );
        assert!(is_thermal_name("photo_1_thermal.png"));
        assert!(!is_thermal_name("photo_1.jpg"));
    }

    #[test]
    fn test_output_is_binary() {
        let mut source = RgbImage::new(80, 60);
        for (x, _, p) in source.enumerate_pixels_mut() {
            let v = (x * 3) as u8;
            *p = Rgb([v, v, v]);
        }
        let raster = render_thermal(&source, false, &settings(64));
        assert!(raster.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
    }

    #[test]
    fn test_gradient_is_dithered_not_thresholded() {
        let source = RgbImage::from_pixel(32, 32, Rgb([128, 128, 128]));
        let mut flat = settings(32);
        flat.sharpen = false;
        flat.contrast = 1.0;
        flat.brightness = 1.0;
        let raster = render_thermal(&source, false, &flat);
        let white = raster.pixels().filter(|p| p.0[0] == 255).count();
        // Mid grey diffuses into a mix of both levels
        assert!(white > 200 && white < 824, "white pixels: {white}");
    }

    #[test]
    fn test_contrast_stretches_around_mean() {
        let mut img = GrayImage::from_raw(2, 1, vec![100, 200]).unwrap();
        adjust_contrast(&mut img, 2.0);
        assert_eq!(img.as_raw(), &vec![50, 250]);
    }
}
