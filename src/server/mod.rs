//! HTTP surface
//!
//! Every device gets its own [`StreamServer`] on its own port, serving the
//! router built by [`build_router`].

pub mod config;
pub mod error;
pub mod listener;
pub mod page;
pub mod routes;

pub use config::ServerConfig;
pub use error::ServerError;
pub use listener::StreamServer;
pub use routes::{build_router, DeviceContext};
