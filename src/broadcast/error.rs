//! Broadcaster error types

/// Error type for broadcaster operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BroadcastError {
    /// The capture stream ended or the broadcaster was stopped
    #[error("broadcaster for device '{0}' is stopped")]
    Stopped(String),
}
