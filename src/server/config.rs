//! Server configuration

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Per-device HTTP server options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// How long shutdown waits for open connections to finish
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Config for a device listening on `port` at `ip`
    pub fn for_port(ip: IpAddr, port: u16) -> Self {
        Self::with_addr(SocketAddr::new(ip, port))
    }

    /// Set the shutdown timeout
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();

        assert_eq!(config.bind_addr.port(), 8080);
        assert!(config.bind_addr.ip().is_unspecified());
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_for_port() {
        let config = ServerConfig::for_port(IpAddr::V4(Ipv4Addr::LOCALHOST), 8081);

        assert_eq!(config.bind_addr, "127.0.0.1:8081".parse().unwrap());
    }

    #[test]
    fn test_builder_chaining() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let config = ServerConfig::with_addr(addr)
            .shutdown_timeout(Duration::from_millis(250));

        assert_eq!(config.bind_addr, addr);
        assert_eq!(config.shutdown_timeout, Duration::from_millis(250));
    }
}
