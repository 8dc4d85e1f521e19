//! Camera to printer pipeline on synthetic hardware: frame buffer, capture,
//! strip composition and thermal rendering.

use photobooth::capture::{compose_strip, CaptureService};
use photobooth::config::{StorageConfig, StripConfig, ThermalConfig};
use photobooth::frame_source::FrameSource;
use photobooth::testing::SyntheticCamera;
use photobooth::thermal::process_for_thermal;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const SPACING: u32 = 20;

fn storage(dir: &Path) -> StorageConfig {
    StorageConfig {
        photos_dir: dir.to_string_lossy().into_owned(),
        ..StorageConfig::default()
    }
}

fn service(camera: SyntheticCamera, dir: &TempDir) -> CaptureService {
    let source = FrameSource::start(Box::new(camera), Duration::from_millis(5)).unwrap();
    assert!(source.wait_for_frame(Duration::from_secs(2)).is_some());
    CaptureService::new(Arc::new(source), &storage(dir.path()), &StripConfig::default())
}

#[cfg(test)]
mod frame_source_tests {
    use super::*;

    #[test]
    fn test_read_failures_are_retried() {
        let camera = SyntheticCamera::gradient(64, 48).failing_first(5);
        let source = FrameSource::start(Box::new(camera), Duration::from_millis(1)).unwrap();
        let frame = source.wait_for_frame(Duration::from_secs(2)).unwrap();
        assert_eq!((frame.width, frame.height), (64, 48));
        assert!(source.stats().read_errors >= 5);
        source.stop();
        assert!(!source.is_running());
    }

    #[test]
    fn test_never_ready_camera_has_no_frame() {
        let camera = SyntheticCamera::never_ready(64, 48);
        let source = FrameSource::start(Box::new(camera), Duration::from_millis(1)).unwrap();
        assert!(source.wait_for_frame(Duration::from_millis(100)).is_none());
        assert!(source.capture_still().is_none());
        source.stop();
    }

    #[test]
    fn test_capture_fails_without_frame() {
        let dir = tempfile::tempdir().unwrap();
        let camera = SyntheticCamera::never_ready(64, 48);
        let source = FrameSource::start(Box::new(camera), Duration::from_millis(1)).unwrap();
        let capture =
            CaptureService::new(Arc::new(source), &storage(dir.path()), &StripConfig::default());
        assert!(capture.capture(Duration::ZERO, "photo").is_none());
        assert!(capture.capture_strip(3, Duration::ZERO, Duration::ZERO).is_empty());
        assert!(capture.create_strip(&[], SPACING).is_none());
    }
}

#[cfg(test)]
mod strip_tests {
    use super::*;

    #[test]
    fn test_three_solid_frames_make_expected_strip() {
        let dir = tempfile::tempdir().unwrap();
        let camera = SyntheticCamera::color_cycle(
            1280,
            720,
            vec![[255, 0, 0], [0, 255, 0], [0, 0, 255]],
        );
        let capture = service(camera, &dir);

        let shots = capture.capture_strip(3, Duration::ZERO, Duration::ZERO);
        assert_eq!(shots.len(), 3);
        for shot in &shots {
            let name = shot.file_name().unwrap().to_string_lossy();
            assert!(name.starts_with("strip_"), "{name}");
        }

        let strip = capture.create_strip(&shots, SPACING).unwrap();
        let name = strip.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("photostrip_"));

        let image = image::open(&strip).unwrap().to_rgb8();
        assert_eq!(image.width(), 576);
        assert_eq!(image.height(), 3 * 576 + 2 * SPACING);

        // Gutters stay white
        let gutter = image.get_pixel(288, 576 + SPACING / 2);
        assert!(gutter.0.iter().all(|&c| c > 240), "{gutter:?}");
    }

    #[test]
    fn test_stitching_is_deterministic() {
        let inputs: Vec<image::RgbImage> = (0..3u8)
            .map(|i| {
                image::RgbImage::from_fn(320, 200, |x, y| {
                    image::Rgb([(x as u8).wrapping_mul(i + 1), y as u8, i * 40])
                })
            })
            .collect();
        let first = compose_strip(&inputs, 576, SPACING).unwrap();
        let second = compose_strip(&inputs, 576, SPACING).unwrap();
        assert_eq!(first.as_raw(), second.as_raw());
        assert_eq!(first.dimensions(), (576, 3 * 576 + 2 * SPACING));
    }
}

#[cfg(test)]
mod thermal_tests {
    use super::*;

    #[test]
    fn test_strip_keeps_aspect_and_single_is_square() {
        let dir = tempfile::tempdir().unwrap();
        let capture = service(SyntheticCamera::gradient(1280, 720), &dir);
        let settings = ThermalConfig::default();

        let single = capture.capture(Duration::ZERO, "photo").unwrap();
        let raster = process_for_thermal(&single, false, &settings).unwrap();
        assert!(raster.to_string_lossy().ends_with("_thermal.png"));
        let raster = image::open(&raster).unwrap();
        assert_eq!((raster.width(), raster.height()), (576, 576));

        let shots = capture.capture_strip(2, Duration::ZERO, Duration::ZERO);
        let strip = capture.create_strip(&shots, SPACING).unwrap();
        let raster = image::open(process_for_thermal(&strip, true, &settings).unwrap()).unwrap();
        assert_eq!((raster.width(), raster.height()), (576, 2 * 576 + SPACING));
    }

    #[test]
    fn test_thermal_output_is_bilevel() {
        let dir = tempfile::tempdir().unwrap();
        let capture = service(SyntheticCamera::gradient(640, 480), &dir);
        let photo = capture.capture(Duration::ZERO, "photo").unwrap();
        let raster = process_for_thermal(&photo, false, &ThermalConfig::default()).unwrap();
        let gray = image::open(raster).unwrap().to_luma8();
        assert!(gray.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
    }
}
