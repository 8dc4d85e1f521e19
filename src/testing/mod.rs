//! Testing utilities for the photobooth
//!
//! Hardware stand-ins so the capture pipeline, the joystick loop and the
//! print path all run on a machine with no camera, button box or printer.

pub mod devices;
pub mod synthetic_data;

pub use devices::{button_report, HidStep, MemoryTransport, ScriptedHid, ScriptedHidOpener};
pub use synthetic_data::{synthetic_video_frame, SyntheticCamera};
