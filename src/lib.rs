//! # webcam-streamer
//!
//! Serve V4L2 cameras as live multipart MJPEG streams over HTTP.
//!
//! Each configured camera gets one ffmpeg capture process, one broadcaster
//! task reading that process, and one HTTP server on its own port. Any number
//! of browsers can watch a camera at once; a slow viewer loses old frames
//! instead of slowing down the capture.
//!
//! # Architecture
//!
//! ```text
//!   ffmpeg (per camera)
//!         │ stdout: multipart JPEG
//!         ▼
//!   capture::FrameSource ──► codec::FrameParser ──► broadcast::FrameBroadcaster
//!                                                          │
//!                                   ┌──────────────────────┼──────────────┐
//!                                   ▼                      ▼              ▼
//!                              GET /stream            GET /stream    GET /stream
//! ```
//!
//! # Example
//!
//! ```no_run
//! use webcam_streamer::{AppConfig, Streamer};
//!
//! #[tokio::main]
//! async fn main() -> webcam_streamer::Result<()> {
//!     let config = AppConfig::load("config.yaml")?;
//!     let mut streamer = Streamer::start(&config).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     streamer.stop().await;
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod broadcast;
pub mod capture;
pub mod codec;
pub mod config;
pub mod device;
pub mod error;
pub mod logging;
pub mod server;
pub mod stats;

pub use app::Streamer;
pub use broadcast::{FrameBroadcaster, Subscription};
pub use capture::{CaptureCommand, FrameSource};
pub use codec::{Frame, FrameParser};
pub use config::{AppConfig, DeviceConfig, Settings};
pub use device::Device;
pub use error::{Error, Result};
pub use server::{build_router, DeviceContext, StreamServer};
