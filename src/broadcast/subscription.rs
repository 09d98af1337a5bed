//! Per-viewer subscription handle

use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures_util::Stream;
use tokio::sync::broadcast::{self, error::RecvError};

use super::broadcaster::Shared;
use crate::codec::Frame;

/// A viewer's bounded queue of frames
///
/// Frames arrive in publish order. When the viewer falls more than the
/// configured capacity behind, its oldest frames are dropped and it resumes
/// with the newest ones. Dropping the subscription unsubscribes it.
pub struct Subscription {
    id: u64,
    rx: broadcast::Receiver<Frame>,
    shared: Arc<Shared>,
    dropped: u64,
}

impl Subscription {
    pub(super) fn new(id: u64, rx: broadcast::Receiver<Frame>, shared: Arc<Shared>) -> Self {
        Self {
            id,
            rx,
            shared,
            dropped: 0,
        }
    }

    /// Subscription ID, unique per broadcaster
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Frames this subscriber missed because it fell behind
    pub fn dropped_frames(&self) -> u64 {
        self.dropped
    }

    /// Wait for the next frame
    ///
    /// Returns `None` once the broadcaster has stopped and the queue is empty.
    pub async fn recv(&mut self) -> Option<Frame> {
        loop {
            match self.rx.recv().await {
                Ok(frame) => return Some(frame),
                Err(RecvError::Lagged(skipped)) => {
                    self.dropped += skipped;
                    self.shared
                        .frames_dropped
                        .fetch_add(skipped, Ordering::Relaxed);

                    tracing::debug!(
                        device = %self.shared.name,
                        subscriber = self.id,
                        skipped = skipped,
                        "Slow subscriber skipped frames"
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Turn the subscription into a stream of frames
    pub fn into_stream(self) -> impl Stream<Item = Frame> + Send + 'static {
        futures_util::stream::unfold(self, |mut sub| async move {
            let frame = sub.recv().await?;
            Some((frame, sub))
        })
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("device", &self.shared.name)
            .field("id", &self.id)
            .field("dropped", &self.dropped)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let prev = self.shared.subscriber_count.fetch_sub(1, Ordering::Relaxed);

        tracing::debug!(
            device = %self.shared.name,
            subscriber = self.id,
            subscribers = prev.saturating_sub(1),
            dropped = self.dropped,
            "Subscriber removed"
        );
    }
}
