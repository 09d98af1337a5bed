//! Capture subprocess management
//!
//! - [`CaptureCommand`]: program and arguments, built from a device config
//! - [`FrameSource`]: start/stop supervision of one process and its output
//! - [`probe`]: one-off check of what a device accepts

pub mod command;
pub mod error;
pub mod probe;
pub mod source;

pub use command::CaptureCommand;
pub use error::CaptureError;
pub use probe::{ProbeOutcome, ProbeRequest};
pub use source::{CaptureOutput, CaptureState, FrameSource, DEFAULT_STOP_TIMEOUT};
