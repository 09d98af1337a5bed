//! YAML configuration loading and per-camera validation
//!
//! The file has a `settings` block and a `cameras` list. Each camera entry is
//! deserialized and validated on its own, so one bad entry only removes that
//! camera; the rest are still returned.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::broadcast::DEFAULT_CAPACITY;

/// Default JPEG quality when a camera does not set one
pub const DEFAULT_QUALITY: u8 = 80;

/// Default pixel format requested from the capture device
pub const DEFAULT_INPUT_FORMAT: &str = "mjpeg";

/// Configuration loading and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("no 'cameras' section in config")]
    MissingCameras,

    #[error("'cameras' list is empty")]
    NoCameras,

    #[error("rotation must be 0, 90, 180 or 270, got {0}")]
    InvalidRotation(u32),

    #[error("quality must be between 0 and 100, got {0}")]
    InvalidQuality(u32),

    #[error("resolution must be non-zero, got {width}x{height}")]
    InvalidResolution { width: u32, height: u32 },

    #[error("framerate must be greater than 0")]
    InvalidFramerate,

    #[error("'{0}' must not be empty")]
    EmptyField(&'static str),

    #[error("port {port} is already used by camera '{owner}'")]
    DuplicatePort { port: u16, owner: String },
}

/// Global settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// TRACE, DEBUG, INFO, WARN/WARNING or ERROR
    pub log_level: String,

    /// Optional file receiving a copy of the log output
    pub log_file: Option<PathBuf>,

    /// Capture executable
    pub ffmpeg_path: String,

    /// Address every device server binds to
    pub bind_address: IpAddr,

    /// Frames a viewer may fall behind before its oldest frames are dropped
    pub broadcast_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
            log_file: None,
            ffmpeg_path: "ffmpeg".to_string(),
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            broadcast_capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Capture resolution in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Clockwise image rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    None,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn degrees(self) -> u32 {
        match self {
            Rotation::None => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// ffmpeg video filter implementing the rotation, if any
    pub fn filter(self) -> Option<&'static str> {
        match self {
            Rotation::None => None,
            Rotation::Deg90 => Some("transpose=1"),
            Rotation::Deg180 => Some("transpose=1,transpose=1"),
            Rotation::Deg270 => Some("transpose=2"),
        }
    }
}

impl TryFrom<u32> for Rotation {
    type Error = ConfigError;

    fn try_from(degrees: u32) -> Result<Self, Self::Error> {
        match degrees {
            0 => Ok(Rotation::None),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            other => Err(ConfigError::InvalidRotation(other)),
        }
    }
}

/// A camera entry as written in the file
#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    pub name: String,
    pub device: String,
    pub port: u16,
    pub resolution: Resolution,
    pub framerate: u32,
    #[serde(default)]
    pub rotation: u32,
    #[serde(default = "default_quality")]
    pub quality: u32,
    #[serde(default = "default_input_format")]
    pub input_format: String,
}

fn default_quality() -> u32 {
    DEFAULT_QUALITY as u32
}

fn default_input_format() -> String {
    DEFAULT_INPUT_FORMAT.to_string()
}

/// A validated camera, immutable once loaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub name: String,
    pub device: String,
    pub port: u16,
    pub resolution: Resolution,
    pub framerate: u32,
    pub rotation: Rotation,
    /// 0 to 100, higher is better
    pub quality: u8,
    pub input_format: String,
}

impl TryFrom<CameraConfig> for DeviceConfig {
    type Error = ConfigError;

    fn try_from(camera: CameraConfig) -> Result<Self, Self::Error> {
        let name = camera.name.trim();
        if name.is_empty() {
            return Err(ConfigError::EmptyField("name"));
        }
        let device = camera.device.trim();
        if device.is_empty() {
            return Err(ConfigError::EmptyField("device"));
        }
        if camera.input_format.trim().is_empty() {
            return Err(ConfigError::EmptyField("input_format"));
        }

        let Resolution { width, height } = camera.resolution;
        if width == 0 || height == 0 {
            return Err(ConfigError::InvalidResolution { width, height });
        }
        if camera.framerate == 0 {
            return Err(ConfigError::InvalidFramerate);
        }

        let quality = u8::try_from(camera.quality)
            .ok()
            .filter(|q| *q <= 100)
            .ok_or(ConfigError::InvalidQuality(camera.quality))?;

        Ok(Self {
            name: name.to_string(),
            device: device.to_string(),
            port: camera.port,
            resolution: camera.resolution,
            framerate: camera.framerate,
            rotation: Rotation::try_from(camera.rotation)?,
            quality,
            input_format: camera.input_format.trim().to_string(),
        })
    }
}

/// A camera entry that failed validation
#[derive(Debug)]
pub struct RejectedCamera {
    /// Position in the `cameras` list
    pub index: usize,
    /// Name, when the entry had a readable one
    pub name: Option<String>,
    pub error: ConfigError,
}

/// Loaded configuration
#[derive(Debug)]
pub struct AppConfig {
    pub settings: Settings,
    /// Valid cameras, in file order
    pub devices: Vec<DeviceConfig>,
    /// Entries that were skipped
    pub rejected: Vec<RejectedCamera>,
}

#[derive(Deserialize)]
struct RawConfig {
    #[serde(default)]
    settings: Option<Settings>,
    cameras: Option<Vec<serde_yaml::Value>>,
}

impl AppConfig {
    /// Load and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    /// Parse and validate configuration text
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_yaml::from_str(text)?;
        let cameras = raw.cameras.ok_or(ConfigError::MissingCameras)?;
        if cameras.is_empty() {
            return Err(ConfigError::NoCameras);
        }

        let mut devices: Vec<DeviceConfig> = Vec::new();
        let mut rejected = Vec::new();
        let mut ports: HashMap<u16, String> = HashMap::new();

        for (index, value) in cameras.into_iter().enumerate() {
            let name = value
                .get("name")
                .and_then(serde_yaml::Value::as_str)
                .map(str::to_string);

            match validate_camera(value, &ports) {
                Ok(device) => {
                    // Port 0 asks the OS for a free port, so it never collides
                    if device.port != 0 {
                        ports.insert(device.port, device.name.clone());
                    }
                    devices.push(device);
                }
                Err(error) => rejected.push(RejectedCamera { index, name, error }),
            }
        }

        Ok(Self {
            settings: raw.settings.unwrap_or_default(),
            devices,
            rejected,
        })
    }
}

fn validate_camera(
    value: serde_yaml::Value,
    ports: &HashMap<u16, String>,
) -> Result<DeviceConfig, ConfigError> {
    let camera: CameraConfig = serde_yaml::from_value(value)?;
    let device = DeviceConfig::try_from(camera)?;

    if let Some(owner) = ports.get(&device.port) {
        return Err(ConfigError::DuplicatePort {
            port: device.port,
            owner: owner.clone(),
        });
    }
    Ok(device)
}
