//! Capture command construction
//!
//! Builds the ffmpeg invocation that reads a V4L2 device and writes a
//! multipart JPEG stream to stdout.

use std::fmt;
use std::process::Stdio;

use tokio::process::Command;

use crate::config::DeviceConfig;

/// Best mjpeg `-q:v` value
const QSCALE_BEST: u32 = 2;

/// Worst mjpeg `-q:v` value
const QSCALE_WORST: u32 = 31;

/// Map quality 0..=100 (higher is better) onto mjpeg `-q:v` 31..=2 (lower is better)
pub fn qscale(quality: u8) -> u32 {
    let quality = u32::from(quality.min(100));
    QSCALE_WORST - quality * (QSCALE_WORST - QSCALE_BEST) / 100
}

/// Program and arguments for a capture process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl CaptureCommand {
    /// Any program whose stdout carries a multipart JPEG stream
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// The ffmpeg command for a configured device
    pub fn for_device(device: &DeviceConfig, ffmpeg_path: &str) -> Self {
        let mut args = input_args(
            &device.device,
            &device.input_format,
            device.resolution.width,
            device.resolution.height,
            device.framerate,
        );

        if let Some(filter) = device.rotation.filter() {
            args.push("-vf".to_string());
            args.push(filter.to_string());
        }

        args.extend([
            "-c:v".to_string(),
            "mjpeg".to_string(),
            "-q:v".to_string(),
            qscale(device.quality).to_string(),
            "-f".to_string(),
            "mpjpeg".to_string(),
            "pipe:1".to_string(),
        ]);

        Self {
            program: ffmpeg_path.to_string(),
            args,
        }
    }

    /// A tokio command with piped stdout and stderr, killed when dropped
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl fmt::Display for CaptureCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// V4L2 input arguments shared by streaming and probing
pub(crate) fn input_args(
    device: &str,
    input_format: &str,
    width: u32,
    height: u32,
    framerate: u32,
) -> Vec<String> {
    vec![
        "-f".to_string(),
        "v4l2".to_string(),
        "-input_format".to_string(),
        input_format.to_string(),
        "-video_size".to_string(),
        format!("{}x{}", width, height),
        "-framerate".to_string(),
        framerate.to_string(),
        "-i".to_string(),
        device.to_string(),
    ]
}
