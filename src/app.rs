//! Application supervisor
//!
//! Starts every configured device, keeping going when one fails, and stops
//! them all on shutdown.

use std::fmt::Write as _;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use crate::config::AppConfig;
use crate::device::Device;
use crate::error::{Error, Result};

/// All running devices
#[derive(Debug)]
pub struct Streamer {
    devices: Vec<Device>,
}

impl Streamer {
    /// Start every valid device in file order
    ///
    /// Fails with [`Error::NoDevicesStarted`] when none could be started.
    pub async fn start(config: &AppConfig) -> Result<Self> {
        let mut devices = Vec::with_capacity(config.devices.len());

        for device_config in &config.devices {
            let name = device_config.name.clone();
            match Device::start(device_config.clone(), &config.settings).await {
                Ok(device) => devices.push(device),
                Err(e) => {
                    tracing::error!(device = %name, error = %e, "Failed to start device");
                }
            }
        }

        Self::from_devices(devices)
    }

    /// Wrap devices that were started elsewhere
    pub fn from_devices(devices: Vec<Device>) -> Result<Self> {
        if devices.is_empty() {
            tracing::error!("No cameras started successfully");
            return Err(Error::NoDevicesStarted);
        }

        tracing::info!(count = devices.len(), "Cameras started");
        Ok(Self { devices })
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Access summary with one stream URL per device
    pub fn banner(&self, host: IpAddr) -> String {
        let rule = "=".repeat(60);
        let mut out = String::new();
        let _ = writeln!(out, "\n{rule}\nwebcam-streamer running\n{rule}");
        for device in &self.devices {
            let _ = writeln!(
                out,
                "  {}: http://{}:{}/stream",
                device.name(),
                host,
                device.local_addr().port()
            );
        }
        let _ = writeln!(out, "{rule}");
        out
    }

    /// Stop every device; idempotent
    pub async fn stop(&mut self) {
        for device in self.devices.iter_mut() {
            device.stop().await;
        }
    }
}

/// Address viewers should use to reach this host
///
/// The bind address when it is specific; otherwise the address of the
/// interface holding the default route, falling back to loopback.
pub fn host_address(bind: IpAddr) -> IpAddr {
    if !bind.is_unspecified() {
        return bind;
    }

    // Connecting a UDP socket sends nothing, it only selects a route
    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| {
            socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}
