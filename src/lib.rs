//! Photobooth: a self-service photo kiosk.
//!
//! Captures stills from a live camera feed, composes single photos or
//! multi-shot strips, renders them for a thermal receipt printer and runs
//! the on-screen session (countdown, flash, review, print). Captures are
//! triggered by a USB button box, by the HTTP control page or by the kiosk
//! display itself; all of them go through one single-flight `CaptureGate`.
//!
//! # Usage
//! ```rust,no_run
//! use photobooth::config::BoothConfig;
//! use photobooth::types::CaptureKind;
//! use photobooth::workflow::Booth;
//!
//! photobooth::init_logging();
//! let booth = Booth::open(BoothConfig::load_or_default());
//! if let Ok(run) = booth.start_capture(CaptureKind::Single) {
//!     let photo = run.join();
//!     println!("saved {:?}", photo);
//! }
//! ```
pub mod camera;
pub mod capture;
pub mod config;
pub mod errors;
pub mod frame_source;
pub mod gate;
pub mod joystick;
pub mod kiosk;
pub mod library;
pub mod metadata;
pub mod printer;
pub mod server;
pub mod thermal;
pub mod timing;
pub mod types;
pub mod workflow;

// Testing utilities - scripted devices for running without hardware
pub mod testing;

pub use errors::BoothError;
pub use frame_source::FrameSource;
pub use gate::{CaptureGate, GateGuard, Phase, WorkflowStatus};
pub use types::{CaptureKind, Frame};
pub use workflow::{Booth, TriggerError};

/// Initialize logging for the booth
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "photobooth=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
