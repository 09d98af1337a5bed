//! Crate error types

use crate::broadcast::BroadcastError;
use crate::capture::CaptureError;
use crate::config::ConfigError;
use crate::server::ServerError;

/// Top-level error
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("broadcast error: {0}")]
    Broadcast(#[from] BroadcastError),

    #[error("server error: {0}")]
    Server(#[from] ServerError),

    #[error("no camera could be started")]
    NoDevicesStarted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;
