//! One configured camera
//!
//! A [`Device`] ties together the capture process, the broadcaster reading its
//! output and the HTTP server exposing it. They start together and stop
//! together, in that order and in reverse.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::broadcast::{BroadcastConfig, FrameBroadcaster};
use crate::capture::{CaptureCommand, CaptureState, FrameSource};
use crate::config::{DeviceConfig, Settings};
use crate::error::Result;
use crate::server::{DeviceContext, ServerConfig, ServerError, StreamServer};
use crate::stats::StreamStats;

/// Upper bound on waiting for the broadcaster to close its subscriptions
const BROADCAST_STOP_WAIT: Duration = Duration::from_secs(2);

/// A running camera
pub struct Device {
    config: Arc<DeviceConfig>,
    source: Arc<Mutex<FrameSource>>,
    broadcaster: FrameBroadcaster,
    local_addr: SocketAddr,
    stopping: CancellationToken,
    server_shutdown: CancellationToken,
    server_task: Option<JoinHandle<std::result::Result<(), ServerError>>>,
    shutdown_timeout: Duration,
}

impl Device {
    /// Start the ffmpeg capture for `config` and serve it
    pub async fn start(config: DeviceConfig, settings: &Settings) -> Result<Self> {
        let command = CaptureCommand::for_device(&config, &settings.ffmpeg_path);
        Self::start_with_command(config, command, settings).await
    }

    /// Start with an explicit capture command
    pub async fn start_with_command(
        config: DeviceConfig,
        command: CaptureCommand,
        settings: &Settings,
    ) -> Result<Self> {
        let source = FrameSource::new(config.name.clone(), command);
        let server = ServerConfig::for_port(settings.bind_address, config.port);
        let broadcast = BroadcastConfig::default().capacity(settings.broadcast_capacity);
        Self::launch(config, source, server, broadcast).await
    }

    /// Start from fully built parts
    pub async fn launch(
        config: DeviceConfig,
        mut source: FrameSource,
        server_config: ServerConfig,
        broadcast_config: BroadcastConfig,
    ) -> Result<Self> {
        let config = Arc::new(config);

        source.start()?;
        let broadcaster =
            FrameBroadcaster::spawn(config.name.clone(), source.take_output(), broadcast_config);

        let shutdown_timeout = server_config.shutdown_timeout;
        let ctx = DeviceContext::new(Arc::clone(&config), broadcaster.clone());
        let server = match StreamServer::bind(server_config, ctx).await {
            Ok(server) => server,
            Err(e) => {
                broadcaster.stop();
                source.stop().await;
                return Err(e.into());
            }
        };
        let local_addr = server.local_addr();

        let server_shutdown = CancellationToken::new();
        let signal = server_shutdown.clone();
        let server_task =
            tokio::spawn(server.run_until(async move { signal.cancelled().await }));

        let source = Arc::new(Mutex::new(source));
        let stopping = CancellationToken::new();
        spawn_monitor(
            config.name.clone(),
            broadcaster.clone(),
            Arc::clone(&source),
            stopping.clone(),
        );

        tracing::info!(
            device = %config.name,
            path = %config.device,
            addr = %local_addr,
            resolution = %config.resolution,
            fps = config.framerate,
            "Device started"
        );

        Ok(Self {
            config,
            source,
            broadcaster,
            local_addr,
            stopping,
            server_shutdown,
            server_task: Some(server_task),
            shutdown_timeout,
        })
    }

    /// Stop capture, close every viewer, then shut the server down
    ///
    /// Idempotent.
    pub async fn stop(&mut self) {
        let Some(task) = self.server_task.take() else {
            return;
        };
        self.stopping.cancel();

        self.source.lock().await.stop().await;
        self.broadcaster.stop();
        if tokio::time::timeout(BROADCAST_STOP_WAIT, self.broadcaster.stopped())
            .await
            .is_err()
        {
            tracing::warn!(device = %self.config.name, "Broadcaster did not stop in time");
        }

        self.server_shutdown.cancel();
        join_server(&self.config.name, task, self.shutdown_timeout).await;

        let stats = self.broadcaster.stats();
        tracing::info!(
            device = %self.config.name,
            frames = stats.frames_published,
            bytes = stats.bytes_published,
            dropped = stats.frames_dropped,
            malformed = stats.malformed_frames,
            fps = format_args!("{:.1}", stats.framerate()),
            bitrate = stats.bitrate(),
            avg_frame_size = stats.average_frame_size(),
            "Device stopped"
        );
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Address the HTTP server is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn broadcaster(&self) -> &FrameBroadcaster {
        &self.broadcaster
    }

    pub fn stats(&self) -> StreamStats {
        self.broadcaster.stats()
    }

    /// State of the capture process
    pub async fn capture_state(&self) -> CaptureState {
        self.source.lock().await.state()
    }

    /// Whether frames are still flowing
    pub fn is_streaming(&self) -> bool {
        self.server_task.is_some() && self.broadcaster.is_running()
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.config.name)
            .field("local_addr", &self.local_addr)
            .field("source", &self.source.try_lock().ok().map(|s| s.state()))
            .field("broadcaster", &self.broadcaster.state())
            .finish_non_exhaustive()
    }
}

/// Report and reap a capture that ends while the device is supposed to run
///
/// The HTTP server stays up: the page still renders and `/stream` answers 503.
fn spawn_monitor(
    name: String,
    broadcaster: FrameBroadcaster,
    source: Arc<Mutex<FrameSource>>,
    stopping: CancellationToken,
) {
    tokio::spawn(async move {
        tokio::select! {
            _ = stopping.cancelled() => {}
            _ = broadcaster.stopped() => {
                if stopping.is_cancelled() {
                    return;
                }
                tracing::error!(
                    device = %name,
                    "Capture stream ended unexpectedly, stream unavailable until restart"
                );
                source.lock().await.reap().await;
            }
        }
    });
}

/// Wait for the server task, aborting it when it outlives `timeout`
async fn join_server(
    name: &str,
    mut task: JoinHandle<std::result::Result<(), ServerError>>,
    timeout: Duration,
) {
    match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => {
            tracing::warn!(device = %name, error = %e, "HTTP server failed");
        }
        Ok(Err(e)) => {
            tracing::warn!(device = %name, error = %e, "HTTP server task panicked");
        }
        Err(_) => {
            tracing::warn!(device = %name, "HTTP server did not shut down in time, aborting");
            task.abort();
        }
    }
}
