//! Broadcaster configuration

use crate::codec::DEFAULT_MAX_FRAME_SIZE;

/// Default number of frames buffered for subscribers
pub const DEFAULT_CAPACITY: usize = 8;

/// Configuration for a [`FrameBroadcaster`](super::FrameBroadcaster)
#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// Frames a subscriber may fall behind before its oldest frames are dropped
    pub capacity: usize,

    /// Largest frame accepted from the capture stream
    pub max_frame_size: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl BroadcastConfig {
    /// Set the subscriber queue capacity (at least 1)
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Set the maximum frame size
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }
}
