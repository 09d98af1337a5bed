//! Device HTTP server
//!
//! Binds the device port and serves the device router until told to stop.

use std::future::Future;
use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;

use super::config::ServerConfig;
use super::error::ServerError;
use super::routes::{build_router, DeviceContext};

/// HTTP server for one device
pub struct StreamServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    router: Router,
    device: String,
}

impl StreamServer {
    /// Bind the listening socket
    ///
    /// Binding happens before serving so a taken port is reported to the
    /// caller instead of inside a background task.
    pub async fn bind(config: ServerConfig, ctx: DeviceContext) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.bind_addr,
                source,
            })?;
        let local_addr = listener.local_addr()?;
        let device = ctx.device.name.clone();

        tracing::info!(device = %device, addr = %local_addr, "HTTP server listening");

        Ok(Self {
            listener,
            local_addr,
            router: build_router(ctx),
            device,
        })
    }

    /// Actual bound address (resolves port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until `shutdown` resolves, then wait for open connections
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let device = self.device.clone();
        let result = axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                tracing::info!(device = %device, "HTTP server shutting down");
            })
            .await;

        tracing::info!(device = %self.device, "HTTP server stopped");
        result.map_err(ServerError::from)
    }
}

impl std::fmt::Debug for StreamServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamServer")
            .field("device", &self.device)
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}
