//! Frame fan-out from one capture stream to many viewers
//!
//! Exactly one task reads a device's capture output. Viewers never touch the
//! capture stream; they hold a [`Subscription`] fed by a
//! `tokio::sync::broadcast` channel.
//!
//! # Architecture
//!
//! ```text
//!   capture stdout
//!         │
//!         ▼
//!   FramedRead<_, FrameParser>        (one task per device)
//!         │
//!         ▼
//!   FrameBroadcaster::publish() ──► broadcast::Sender<Frame>
//!                                         │
//!         ┌───────────────────────────────┼───────────────────────┐
//!         ▼                               ▼                       ▼
//!   [Subscription]                  [Subscription]          [Subscription]
//!   recv() ──► /stream              recv() ──► /stream      recv() ──► /stream
//! ```
//!
//! # Slow viewers
//!
//! Publishing never waits. A viewer that falls more than `capacity` frames
//! behind loses its oldest frames and picks up from the newest ones, so the
//! capture process never sees backpressure.
//!
//! # Zero-Copy Design
//!
//! `bytes::Bytes` uses reference counting, so all subscribers share the same
//! memory allocation for a frame.

pub mod broadcaster;
pub mod config;
pub mod error;
pub mod subscription;

pub use broadcaster::{BroadcasterState, FrameBroadcaster};
pub use config::{BroadcastConfig, DEFAULT_CAPACITY};
pub use error::BroadcastError;
pub use subscription::Subscription;
