//! What the kiosk screen shows, as a pure function of session state.
//!
//! The raster carries the picture only. Text goes out separately as an
//! `Overlay` and is drawn by the display page.

use super::{Session, SessionState};
use crate::types::Frame;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use serde::Serialize;
use std::time::{Duration, Instant};

pub const IDLE_TEXT: &str = "Press the button to take a photo!";
pub const SNAP_TEXT: &str = "SNAP!";
pub const PROCESSING_TEXT: &str = "Processing...";
pub const PRINTING_TEXT: &str = "Printing...";
pub const NO_CAMERA_TEXT: &str = "Waiting for camera...";

/// Share of the screen the review image may cover.
const REVIEW_FILL: f32 = 0.85;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplaySettings {
    pub width: u32,
    pub height: u32,
    pub countdown: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Overlay {
    pub state: SessionState,
    /// Large centred text: countdown digit, "SNAP!" or a notice
    pub headline: Option<String>,
    /// Text on the dark banner
    pub banner: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DisplayFrame {
    pub image: RgbImage,
    pub overlay: Overlay,
}

/// Seconds left on the countdown, never shown below 1.
pub fn countdown_digit(countdown: Duration, elapsed: Duration) -> u64 {
    countdown
        .as_secs()
        .saturating_sub(elapsed.as_secs())
        .max(1)
}

pub fn compose_display(
    session: &Session,
    live: Option<&Frame>,
    settings: &DisplaySettings,
    now: Instant,
) -> DisplayFrame {
    let state = session.state;
    let overlay = |headline: Option<String>, banner: Option<String>| Overlay {
        state,
        headline,
        banner,
    };

    match state {
        SessionState::Flash => DisplayFrame {
            image: solid(settings, [255, 255, 255]),
            overlay: overlay(None, None),
        },
        SessionState::Review | SessionState::Printing => {
            let banner = (state == SessionState::Printing).then(|| PRINTING_TEXT.to_string());
            match &session.review_image {
                Some(review) => DisplayFrame {
                    image: fit_on_black(review, settings),
                    overlay: overlay(None, banner),
                },
                None => DisplayFrame {
                    image: solid(settings, [0, 0, 0]),
                    overlay: overlay(Some(PROCESSING_TEXT.to_string()), banner),
                },
            }
        }
        SessionState::Idle
        | SessionState::Countdown
        | SessionState::StripGap
        | SessionState::Capture => {
            let Some(preview) = live.and_then(Frame::to_rgb_image) else {
                return DisplayFrame {
                    image: solid(settings, [0, 0, 0]),
                    overlay: overlay(Some(NO_CAMERA_TEXT.to_string()), None),
                };
            };
            let image = imageops::flip_horizontal(&preview);
            let next_shot = session.shot_index + 1;

            let (headline, banner) = match state {
                SessionState::Idle => (None, Some(IDLE_TEXT.to_string())),
                SessionState::Countdown => {
                    let digit = countdown_digit(settings.countdown, session.elapsed(now));
                    let label = session
                        .is_strip
                        .then(|| format!("Photo {}/{}", next_shot, session.shot_total));
                    (Some(digit.to_string()), label)
                }
                SessionState::StripGap => (
                    None,
                    Some(format!(
                        "Get ready for photo {}/{}...",
                        next_shot, session.shot_total
                    )),
                ),
                _ => (Some(SNAP_TEXT.to_string()), None),
            };
            DisplayFrame {
                image,
                overlay: overlay(headline, banner),
            }
        }
    }
}

fn solid(settings: &DisplaySettings, rgb: [u8; 3]) -> RgbImage {
    RgbImage::from_pixel(settings.width, settings.height, Rgb(rgb))
}

/// Scale `review` to fit the screen at `REVIEW_FILL`, centred on black.
fn fit_on_black(review: &RgbImage, settings: &DisplaySettings) -> RgbImage {
    let mut canvas = solid(settings, [0, 0, 0]);
    let (rw, rh) = review.dimensions();
    if rw == 0 || rh == 0 {
        return canvas;
    }

    let scale = (settings.width as f32 / rw as f32).min(settings.height as f32 / rh as f32)
        * REVIEW_FILL;
    let w = ((rw as f32 * scale) as u32).max(1);
    let h = ((rh as f32 * scale) as u32).max(1);
    let resized = imageops::resize(review, w, h, FilterType::Triangle);

    let x = (settings.width.saturating_sub(w) / 2) as i64;
    let y = (settings.height.saturating_sub(h) / 2) as i64;
    imageops::replace(&mut canvas, &resized, x, y);
    canvas
}
