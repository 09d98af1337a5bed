//! Statistics for device streams

use std::time::{Duration, Instant};

/// Snapshot of a device broadcaster's counters
#[derive(Debug, Clone)]
pub struct StreamStats {
    /// Device name
    pub device: String,
    /// When the broadcaster started reading the capture stream
    pub started_at: Instant,
    /// Frames handed to subscribers
    pub frames_published: u64,
    /// JPEG payload bytes handed to subscribers
    pub bytes_published: u64,
    /// Frames skipped by slow subscribers, summed over all subscribers
    pub frames_dropped: u64,
    /// Malformed parts discarded by the parser
    pub malformed_frames: u64,
    /// Live subscriptions at snapshot time
    pub subscriber_count: u32,
}

impl StreamStats {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            started_at: Instant::now(),
            frames_published: 0,
            bytes_published: 0,
            frames_dropped: 0,
            malformed_frames: 0,
            subscriber_count: 0,
        }
    }

    /// Get duration since the stream started
    pub fn duration(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Payload bitrate in bits per second
    pub fn bitrate(&self) -> u64 {
        self.bitrate_over(self.duration())
    }

    /// Payload bitrate over an explicit interval
    pub fn bitrate_over(&self, elapsed: Duration) -> u64 {
        let secs = elapsed.as_secs();
        if secs > 0 {
            (self.bytes_published * 8) / secs
        } else {
            0
        }
    }

    /// Measured frames per second
    pub fn framerate(&self) -> f64 {
        self.framerate_over(self.duration())
    }

    /// Frames per second over an explicit interval
    pub fn framerate_over(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            self.frames_published as f64 / secs
        } else {
            0.0
        }
    }

    /// Average JPEG size in bytes
    pub fn average_frame_size(&self) -> u64 {
        self.bytes_published
            .checked_div(self.frames_published)
            .unwrap_or(0)
    }
}
