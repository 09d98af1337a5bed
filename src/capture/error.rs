//! Capture process error types

use std::io;

/// Errors raised while launching or probing a capture process
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("capture executable '{program}' not found, is ffmpeg installed?")]
    FfmpegNotFound { program: String },

    #[error("failed to launch capture process '{program}': {source}")]
    ProcessLaunch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("capture source for device '{0}' is already running")]
    AlreadyRunning(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CaptureError {
    /// Classify a spawn failure
    pub(crate) fn launch(program: &str, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            CaptureError::FfmpegNotFound {
                program: program.to_string(),
            }
        } else {
            CaptureError::ProcessLaunch {
                program: program.to_string(),
                source,
            }
        }
    }
}
