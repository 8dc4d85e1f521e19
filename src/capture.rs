//! Still capture on top of the live frame buffer: single photos, timed strip
//! sequences and strip composition.

use crate::config::{StorageConfig, StripConfig};
use crate::errors::BoothError;
use crate::frame_source::FrameSource;
use crate::timing::file_timestamp;
use crate::types::{Frame, STRIP_OUTPUT_PREFIX, STRIP_SHOT_PREFIX};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

/// Progress of a strip sequence, reported before each step starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StripProgress {
    /// Counting down before shot `shot` (1-based)
    Countdown { shot: usize, total: usize, remaining: Duration },
    Capturing { shot: usize, total: usize },
    /// Pausing before shot `shot`
    Waiting { shot: usize, total: usize, remaining: Duration },
}

pub struct CaptureService {
    source: Arc<FrameSource>,
    photos_dir: PathBuf,
    jpeg_quality: u8,
    strip_width: u32,
}

impl CaptureService {
    pub fn new(source: Arc<FrameSource>, storage: &StorageConfig, strip: &StripConfig) -> Self {
        Self {
            source,
            photos_dir: storage.photos_path(),
            jpeg_quality: storage.jpeg_quality,
            strip_width: strip.width_px,
        }
    }

    pub fn frame_source(&self) -> &Arc<FrameSource> {
        &self.source
    }

    pub fn photos_dir(&self) -> &Path {
        &self.photos_dir
    }

    /// Wait out `countdown`, then save the latest frame as `{tag}_{timestamp}.jpg`.
    ///
    /// `None` when the camera has not produced a frame yet or the file could
    /// not be written.
    pub fn capture(&self, countdown: Duration, tag: &str) -> Option<PathBuf> {
        if !countdown.is_zero() {
            std::thread::sleep(countdown);
        }

        let Some(frame) = self.source.capture_still() else {
            log::warn!("No camera frame available for capture");
            return None;
        };

        match self.save_frame(&frame, tag) {
            Ok(path) => {
                log::info!("Photo saved: {}", path.display());
                Some(path)
            }
            Err(e) => {
                log::error!("Failed to save photo: {}", e);
                None
            }
        }
    }

    /// Take `count` photos with `gap` between them. Failed shots are omitted.
    pub fn capture_strip(&self, count: usize, countdown: Duration, gap: Duration) -> Vec<PathBuf> {
        self.capture_strip_observed(count, countdown, gap, &mut |_| {})
    }

    pub fn capture_strip_observed(
        &self,
        count: usize,
        countdown: Duration,
        gap: Duration,
        observer: &mut dyn FnMut(StripProgress),
    ) -> Vec<PathBuf> {
        let mut paths = Vec::with_capacity(count);

        for i in 0..count {
            let shot = i + 1;
            if i > 0 && !gap.is_zero() {
                observer(StripProgress::Waiting {
                    shot,
                    total: count,
                    remaining: gap,
                });
                std::thread::sleep(gap);
            }

            observer(StripProgress::Countdown {
                shot,
                total: count,
                remaining: countdown,
            });
            if !countdown.is_zero() {
                std::thread::sleep(countdown);
            }

            observer(StripProgress::Capturing { shot, total: count });
            match self.capture(Duration::ZERO, STRIP_SHOT_PREFIX) {
                Some(path) => paths.push(path),
                None => log::warn!("Strip shot {}/{} failed, continuing", shot, count),
            }
        }

        log::info!("Captured {}/{} strip photos", paths.len(), count);
        paths
    }

    /// Stitch `paths` into one vertical strip saved as `photostrip_{timestamp}.jpg`.
    pub fn create_strip(&self, paths: &[PathBuf], spacing: u32) -> Option<PathBuf> {
        if paths.is_empty() {
            log::warn!("No photos to stitch into a strip");
            return None;
        }

        let mut images = Vec::with_capacity(paths.len());
        for path in paths {
            match image::open(path) {
                Ok(img) => images.push(img.to_rgb8()),
                Err(e) => log::warn!("Skipping unreadable strip photo {}: {}", path.display(), e),
            }
        }

        let strip = compose_strip(&images, self.strip_width, spacing)?;
        match self.save_image(&strip, STRIP_OUTPUT_PREFIX) {
            Ok(path) => {
                log::info!("Strip saved: {}", path.display());
                Some(path)
            }
            Err(e) => {
                log::error!("Failed to save strip: {}", e);
                None
            }
        }
    }

    pub fn save_frame(&self, frame: &Frame, tag: &str) -> Result<PathBuf, BoothError> {
        let image = frame
            .to_rgb_image()
            .ok_or_else(|| BoothError::Camera("frame buffer does not match its size".to_string()))?;
        self.save_image(&image, tag)
    }

    fn save_image(&self, image: &RgbImage, tag: &str) -> Result<PathBuf, BoothError> {
        fs::create_dir_all(&self.photos_dir)?;
        let path = unique_path(&self.photos_dir, tag, "jpg");
        write_jpeg(image, &path, self.jpeg_quality)?;
        Ok(path)
    }
}

/// `dir/{tag}_{timestamp}.{ext}`, suffixed with a counter if already taken.
pub fn unique_path(dir: &Path, tag: &str, ext: &str) -> PathBuf {
    let stem = format!("{}_{}", tag, file_timestamp());
    let candidate = dir.join(format!("{stem}.{ext}"));
    if !candidate.exists() {
        return candidate;
    }
    (2u32..)
        .map(|n| dir.join(format!("{stem}_{n}.{ext}")))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

pub fn write_jpeg(image: &RgbImage, path: &Path, quality: u8) -> Result<(), BoothError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut writer, quality).encode_image(image)?;
    writer.flush()?;
    Ok(())
}

/// Largest centred square of `image`.
pub fn center_crop_square(image: &RgbImage) -> RgbImage {
    let (width, height) = image.dimensions();
    let side = width.min(height);
    let x = (width - side) / 2;
    let y = (height - side) / 2;
    imageops::crop_imm(image, x, y, side, side).to_image()
}

/// Square-crop each image, scale to `width`, and stack top to bottom with
/// `spacing` pixels of white between them.
pub fn compose_strip(images: &[RgbImage], width: u32, spacing: u32) -> Option<RgbImage> {
    if images.is_empty() || width == 0 {
        return None;
    }

    let count = images.len() as u32;
    let height = width * count + spacing * (count - 1);
    let mut strip = RgbImage::from_pixel(width, height, WHITE);

    for (i, image) in images.iter().enumerate() {
        let square = center_crop_square(image);
        let tile = imageops::resize(&square, width, width, FilterType::Lanczos3);
        let y = i as u32 * (width + spacing);
        imageops::replace(&mut strip, &tile, 0, i64::from(y));
    }

    Some(strip)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_crop_landscape_and_portrait() {
        let landscape = RgbImage::new(40, 20);
        assert_eq!(center_crop_square(&landscape).dimensions(), (20, 20));
        let portrait = RgbImage::new(15, 30);
        assert_eq!(center_crop_square(&portrait).dimensions(), (15, 15));
    }

    #[test]
    fn test_center_crop_keeps_middle() {
        let mut img = RgbImage::from_pixel(30, 10, Rgb([0, 0, 0]));
        for y in 0..10 {
            for x in 10..20 {
                img.put_pixel(x, y, Rgb([255, 0, 0]));
            }
        }
        let square = center_crop_square(&img);
        assert!(square.pixels().all(|p| *p == Rgb([255, 0, 0])));
    }

    #[test]
    fn test_compose_strip_layout() {
        let red = RgbImage::from_pixel(64, 48, Rgb([255, 0, 0]));
        let blue = RgbImage::from_pixel(48, 64, Rgb([0, 0, 255]));
        let strip = compose_strip(&[red, blue], 32, 4).unwrap();
        assert_eq!(strip.dimensions(), (32, 68));
        // Gutter stays white
        assert_eq!(*strip.get_pixel(16, 33), WHITE);
        assert!(strip.get_pixel(16, 10).0[0] > 250);
        assert!(strip.get_pixel(16, 50).0[2] > 250);
    }

    #[test]
    fn test_compose_strip_empty() {
        assert!(compose_strip(&[], 576, 20).is_none());
    }

    #[test]
    fn test_unique_path_avoids_collisions() {
        let dir = tempfile::tempdir().unwrap();
        let first = unique_path(dir.path(), "photo", "jpg");
        fs::write(&first, b"x").unwrap();
        let second = unique_path(dir.path(), "photo", "jpg");
        assert_ne!(first, second);
        assert!(second
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("photo_"));
    }
}
