//! Frame broadcaster implementation
//!
//! One task reads the capture stream through the [`FrameParser`] and publishes
//! every frame to all live subscriptions.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::{broadcast, watch, RwLock};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;

use super::config::BroadcastConfig;
use super::error::BroadcastError;
use super::subscription::Subscription;
use crate::codec::{Frame, FrameParser};
use crate::stats::StreamStats;

/// Lifecycle of a broadcaster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcasterState {
    /// Reading the capture stream and publishing frames
    Running,
    /// Terminal: the stream ended or `stop` was called, subscriptions closed
    Stopped,
}

/// State shared between the handle, the publish task and subscriptions
pub(super) struct Shared {
    pub(super) name: String,

    /// Sender for fan-out; `None` once the broadcaster stopped
    tx: RwLock<Option<broadcast::Sender<Frame>>>,

    state: watch::Sender<BroadcasterState>,
    cancel: CancellationToken,
    started_at: Instant,

    pub(super) subscriber_count: AtomicU32,
    next_subscriber_id: AtomicU64,
    frames_published: AtomicU64,
    bytes_published: AtomicU64,
    pub(super) frames_dropped: AtomicU64,
    malformed_frames: AtomicU64,
}

/// Single-reader, multi-subscriber frame fan-out
///
/// Cloning the handle is cheap; all clones refer to the same publish task.
#[derive(Clone)]
pub struct FrameBroadcaster {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for FrameBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBroadcaster")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl FrameBroadcaster {
    /// Spawn the publish task over a raw capture byte stream
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<R>(name: impl Into<String>, reader: R, config: BroadcastConfig) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let (tx, _) = broadcast::channel(config.capacity.max(1));
        let (state, _) = watch::channel(BroadcasterState::Running);

        let broadcaster = Self {
            shared: Arc::new(Shared {
                name: name.into(),
                tx: RwLock::new(Some(tx)),
                state,
                cancel: CancellationToken::new(),
                started_at: Instant::now(),
                subscriber_count: AtomicU32::new(0),
                next_subscriber_id: AtomicU64::new(1),
                frames_published: AtomicU64::new(0),
                bytes_published: AtomicU64::new(0),
                frames_dropped: AtomicU64::new(0),
                malformed_frames: AtomicU64::new(0),
            }),
        };

        let frames = FramedRead::new(reader, FrameParser::with_max_frame_size(config.max_frame_size));
        let task = broadcaster.clone();
        tokio::spawn(async move { task.run(frames).await });

        broadcaster
    }

    async fn run<R>(&self, mut frames: FramedRead<R, FrameParser>)
    where
        R: AsyncRead + Unpin,
    {
        tracing::info!(device = %self.shared.name, "Broadcaster started");

        loop {
            let next = tokio::select! {
                _ = self.shared.cancel.cancelled() => {
                    tracing::debug!(device = %self.shared.name, "Broadcaster stop requested");
                    break;
                }
                next = frames.next() => next,
            };

            match next {
                Some(Ok(frame)) => {
                    self.shared
                        .malformed_frames
                        .store(frames.decoder().malformed_frames(), Ordering::Relaxed);
                    self.publish(frame).await;
                }
                Some(Err(e)) => {
                    tracing::warn!(
                        device = %self.shared.name,
                        error = %e,
                        "Capture stream read failed"
                    );
                    break;
                }
                None => {
                    tracing::info!(device = %self.shared.name, "Capture stream ended");
                    break;
                }
            }
        }

        self.shared
            .malformed_frames
            .store(frames.decoder().malformed_frames(), Ordering::Relaxed);
        self.close().await;
    }

    /// Send a frame to every subscriber without waiting on any of them
    async fn publish(&self, frame: Frame) {
        let len = frame.len() as u64;
        let sequence = frame.sequence;

        let tx = self.shared.tx.read().await;
        let Some(tx) = tx.as_ref() else {
            return;
        };

        self.shared.frames_published.fetch_add(1, Ordering::Relaxed);
        self.shared.bytes_published.fetch_add(len, Ordering::Relaxed);

        // Err only means there are no receivers right now
        let receivers = tx.send(frame).unwrap_or(0);

        tracing::trace!(
            device = %self.shared.name,
            sequence = sequence,
            bytes = len,
            receivers = receivers,
            "Frame published"
        );
    }

    /// Drop the sender so every subscription drains and then reports closed
    async fn close(&self) {
        let tx = self.shared.tx.write().await.take();
        drop(tx);
        self.shared.state.send_replace(BroadcasterState::Stopped);

        tracing::info!(
            device = %self.shared.name,
            frames = self.shared.frames_published.load(Ordering::Relaxed),
            subscribers = self.subscriber_count(),
            "Broadcaster stopped, subscriptions closed"
        );
    }

    /// Register a new subscription
    ///
    /// The subscription receives every frame published after this call.
    pub async fn subscribe(&self) -> Result<Subscription, BroadcastError> {
        let tx = self.shared.tx.read().await;
        let tx = tx
            .as_ref()
            .ok_or_else(|| BroadcastError::Stopped(self.shared.name.clone()))?;

        let rx = tx.subscribe();
        let id = self.shared.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let count = self.shared.subscriber_count.fetch_add(1, Ordering::Relaxed) + 1;

        tracing::info!(
            device = %self.shared.name,
            subscriber = id,
            subscribers = count,
            "Subscriber added"
        );

        Ok(Subscription::new(id, rx, Arc::clone(&self.shared)))
    }

    /// Remove and close a subscription
    ///
    /// Dropping the subscription has the same effect.
    pub fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
    }

    /// Ask the publish task to stop
    ///
    /// Returns immediately; use [`stopped`](Self::stopped) to wait for the
    /// subscriptions to be closed.
    pub fn stop(&self) {
        self.shared.cancel.cancel();
    }

    /// Wait until the broadcaster reaches [`BroadcasterState::Stopped`]
    pub async fn stopped(&self) {
        let mut rx = self.shared.state.subscribe();
        let _ = rx.wait_for(|state| *state == BroadcasterState::Stopped).await;
    }

    /// Current state
    pub fn state(&self) -> BroadcasterState {
        *self.shared.state.borrow()
    }

    /// Whether frames are still being published
    pub fn is_running(&self) -> bool {
        self.state() == BroadcasterState::Running
    }

    /// Device name this broadcaster serves
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> u32 {
        self.shared.subscriber_count.load(Ordering::Relaxed)
    }

    /// Snapshot of the broadcaster counters
    pub fn stats(&self) -> StreamStats {
        StreamStats {
            device: self.shared.name.clone(),
            started_at: self.shared.started_at,
            frames_published: self.shared.frames_published.load(Ordering::Relaxed),
            bytes_published: self.shared.bytes_published.load(Ordering::Relaxed),
            frames_dropped: self.shared.frames_dropped.load(Ordering::Relaxed),
            malformed_frames: self.shared.malformed_frames.load(Ordering::Relaxed),
            subscriber_count: self.subscriber_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncWriteExt, DuplexStream};
    use tokio::time::timeout;

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    fn part(payload: &[u8]) -> Vec<u8> {
        let mut out = format!(
            "--ffmpeg\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            payload.len()
        )
        .into_bytes();
        out.extend_from_slice(payload);
        out.extend_from_slice(b"\r\n");
        out
    }

    fn spawn_with(config: BroadcastConfig) -> (FrameBroadcaster, DuplexStream) {
        let (writer, reader) = tokio::io::duplex(1024 * 1024);
        (FrameBroadcaster::spawn("test", reader, config), writer)
    }

    async fn wait_for_frames(broadcaster: &FrameBroadcaster, count: u64) {
        timeout(WAIT, async {
            while broadcaster.stats().frames_published < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("frames were not published in time");
    }

    #[tokio::test]
    async fn test_subscribe_receive() {
        let (broadcaster, mut writer) = spawn_with(BroadcastConfig::default());
        let mut sub = broadcaster.subscribe().await.unwrap();
        assert_eq!(broadcaster.subscriber_count(), 1);

        writer.write_all(&part(b"hello")).await.unwrap();

        let frame = timeout(WAIT, sub.recv()).await.unwrap().unwrap();
        assert_eq!(&frame.data[..], b"hello");
        assert_eq!(frame.sequence, 0);

        broadcaster.unsubscribe(sub);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_fan_out_same_order() {
        let (broadcaster, mut writer) = spawn_with(BroadcastConfig::default().capacity(64));

        let mut subs = Vec::new();
        for _ in 0..3 {
            subs.push(broadcaster.subscribe().await.unwrap());
        }

        let payloads: Vec<Vec<u8>> = (0..20u8).map(|i| vec![i; 50 + i as usize]).collect();
        let mut burst = Vec::new();
        for payload in &payloads {
            burst.extend(part(payload));
        }
        writer.write_all(&burst).await.unwrap();

        for sub in subs.iter_mut() {
            for (i, payload) in payloads.iter().enumerate() {
                let frame = timeout(WAIT, sub.recv()).await.unwrap().unwrap();
                assert_eq!(frame.sequence, i as u64);
                assert_eq!(&frame.data[..], &payload[..]);
            }
            assert_eq!(sub.dropped_frames(), 0);
        }
    }

    #[tokio::test]
    async fn test_stalled_subscriber_does_not_block_others() {
        let (broadcaster, mut writer) = spawn_with(BroadcastConfig::default().capacity(4));

        let mut stalled = broadcaster.subscribe().await.unwrap();
        let mut fast = broadcaster.subscribe().await.unwrap();

        // Far more frames than the stalled subscriber can hold
        for i in 0..50u8 {
            writer.write_all(&part(&[i; 32])).await.unwrap();
            let frame = timeout(Duration::from_secs(1), fast.recv())
                .await
                .expect("fast subscriber was delayed")
                .unwrap();
            assert_eq!(frame.data[0], i);
        }

        // The stalled one skipped ahead to the newest frames
        let frame = timeout(WAIT, stalled.recv()).await.unwrap().unwrap();
        assert!(frame.sequence >= 46, "got sequence {}", frame.sequence);
        assert!(stalled.dropped_frames() > 0);
        assert!(broadcaster.stats().frames_dropped > 0);
    }

    #[tokio::test]
    async fn test_end_of_stream_closes_subscriptions() {
        let (broadcaster, mut writer) = spawn_with(BroadcastConfig::default());
        let mut sub = broadcaster.subscribe().await.unwrap();

        writer.write_all(&part(b"last")).await.unwrap();
        drop(writer);

        // Queued frames are still delivered before the close
        let frame = timeout(WAIT, sub.recv()).await.unwrap().unwrap();
        assert_eq!(&frame.data[..], b"last");
        assert!(timeout(WAIT, sub.recv()).await.unwrap().is_none());

        timeout(WAIT, broadcaster.stopped()).await.unwrap();
        assert_eq!(broadcaster.state(), BroadcasterState::Stopped);
        assert!(matches!(
            broadcaster.subscribe().await,
            Err(BroadcastError::Stopped(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_closes_subscriptions() {
        let (broadcaster, _writer) = spawn_with(BroadcastConfig::default());
        let mut sub = broadcaster.subscribe().await.unwrap();

        broadcaster.stop();
        timeout(WAIT, broadcaster.stopped()).await.unwrap();

        assert!(timeout(WAIT, sub.recv()).await.unwrap().is_none());
        assert!(!broadcaster.is_running());
    }

    #[tokio::test]
    async fn test_malformed_parts_counted() {
        let (broadcaster, mut writer) = spawn_with(BroadcastConfig::default());
        let mut sub = broadcaster.subscribe().await.unwrap();

        writer
            .write_all(b"--ffmpeg\r\nContent-Type: image/jpeg\r\n\r\n")
            .await
            .unwrap();
        writer.write_all(&part(b"good")).await.unwrap();

        let frame = timeout(WAIT, sub.recv()).await.unwrap().unwrap();
        assert_eq!(&frame.data[..], b"good");

        let stats = broadcaster.stats();
        assert_eq!(stats.frames_published, 1);
        assert_eq!(stats.malformed_frames, 1);
        assert_eq!(stats.bytes_published, 4);
    }

    #[tokio::test]
    async fn test_frames_without_subscribers_are_discarded() {
        let (broadcaster, mut writer) = spawn_with(BroadcastConfig::default());

        writer.write_all(&part(b"early")).await.unwrap();
        wait_for_frames(&broadcaster, 1).await;

        let mut sub = broadcaster.subscribe().await.unwrap();
        writer.write_all(&part(b"late")).await.unwrap();

        let frame = timeout(WAIT, sub.recv()).await.unwrap().unwrap();
        assert_eq!(&frame.data[..], b"late");
        assert_eq!(frame.sequence, 1);
    }
}
