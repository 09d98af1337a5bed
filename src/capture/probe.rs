//! One-off device probe
//!
//! Asks ffmpeg to grab a handful of frames with a given format, resolution and
//! framerate, and reports whether the device accepted them.

use std::process::Stdio;
use std::time::{Duration, Instant};

use super::command::{input_args, CaptureCommand};
use super::error::CaptureError;

/// Frames grabbed by a probe
pub const PROBE_FRAMES: u32 = 10;

/// How long a probe may run
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Parameters to try on a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    /// Device path, e.g. `/dev/video0`
    pub device: String,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Requested frames per second
    pub framerate: u32,
    /// v4l2 input format, e.g. `mjpeg` or `yuyv422`
    pub input_format: String,
    /// ffmpeg executable
    pub ffmpeg_path: String,
}

/// Result of a probe run
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    /// ffmpeg grabbed every frame and exited cleanly
    Success { elapsed: Duration, average_fps: f64 },
    /// ffmpeg exited with an error; `errors` holds its error lines
    Failed { exit_code: Option<i32>, errors: Vec<String> },
    /// ffmpeg was still running after [`PROBE_TIMEOUT`]
    TimedOut,
}

impl ProbeOutcome {
    /// Whether the device accepted the settings
    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Success { .. })
    }
}

impl ProbeRequest {
    /// Probe `device` at 1280x720, 30 fps, mjpeg input
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            width: 1280,
            height: 720,
            framerate: 30,
            input_format: "mjpeg".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }

    /// ffmpeg command that grabs [`PROBE_FRAMES`] and discards them
    pub fn command(&self) -> CaptureCommand {
        let mut args = input_args(
            &self.device,
            &self.input_format,
            self.width,
            self.height,
            self.framerate,
        );
        args.extend([
            "-vframes".to_string(),
            PROBE_FRAMES.to_string(),
            "-f".to_string(),
            "null".to_string(),
            "-".to_string(),
        ]);

        CaptureCommand {
            program: self.ffmpeg_path.clone(),
            args,
        }
    }

    /// Run the probe with the default timeout
    pub async fn run(&self) -> Result<ProbeOutcome, CaptureError> {
        run_probe(&self.command(), PROBE_TIMEOUT).await
    }

    /// Camera entry for the config file, ready to paste
    pub fn config_snippet(&self, name: &str, port: u16) -> String {
        let mut snippet = format!(
            "  - name: {name}\n    device: {device}\n    port: {port}\n    resolution:\n      width: {width}\n      height: {height}\n    framerate: {fps}\n    rotation: 0\n    quality: 80\n",
            name = name,
            device = self.device,
            port = port,
            width = self.width,
            height = self.height,
            fps = self.framerate,
        );
        if self.input_format != "mjpeg" {
            snippet.push_str(&format!("    input_format: {}\n", self.input_format));
        }
        snippet
    }
}

pub(crate) async fn run_probe(
    command: &CaptureCommand,
    limit: Duration,
) -> Result<ProbeOutcome, CaptureError> {
    tracing::debug!(command = %command, "Probing device");

    let mut cmd = command.to_command();
    cmd.stdout(Stdio::null());
    let child = cmd
        .spawn()
        .map_err(|e| CaptureError::launch(&command.program, e))?;

    let started = Instant::now();
    // The child is killed on drop when the timeout wins
    let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(output) => output?,
        Err(_) => return Ok(ProbeOutcome::TimedOut),
    };
    let elapsed = started.elapsed();

    if output.status.success() {
        let secs = elapsed.as_secs_f64();
        let average_fps = if secs > 0.0 {
            f64::from(PROBE_FRAMES) / secs
        } else {
            0.0
        };
        Ok(ProbeOutcome::Success {
            elapsed,
            average_fps,
        })
    } else {
        Ok(ProbeOutcome::Failed {
            exit_code: output.status.code(),
            errors: error_lines(&String::from_utf8_lossy(&output.stderr)),
        })
    }
}

/// Lines of ffmpeg output that mention an error
pub fn error_lines(stderr: &str) -> Vec<String> {
    stderr
        .lines()
        .map(str::trim)
        .filter(|line| {
            let lower = line.to_ascii_lowercase();
            lower.contains("error") || lower.contains("invalid")
        })
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_command() {
        let mut request = ProbeRequest::new("/dev/video2");
        request.width = 640;
        request.height = 480;
        request.framerate = 15;

        assert_eq!(
            request.command().to_string(),
            "ffmpeg -f v4l2 -input_format mjpeg -video_size 640x480 -framerate 15 \
             -i /dev/video2 -vframes 10 -f null -"
        );
    }

    #[test]
    fn test_error_lines() {
        let stderr = "ffmpeg version 6.0\n\
                      [video4linux2] ioctl(VIDIOC_S_FMT): Invalid argument\n\
                      frame=    1 fps=0.0\n\
                      /dev/video9: No such file or directory\n\
                      Error opening input files: No such device\n";

        assert_eq!(
            error_lines(stderr),
            vec![
                "[video4linux2] ioctl(VIDIOC_S_FMT): Invalid argument".to_string(),
                "Error opening input files: No such device".to_string(),
            ]
        );
    }

    #[test]
    fn test_config_snippet() {
        let request = ProbeRequest::new("/dev/video0");
        let snippet = request.config_snippet("camera_1", 8081);
        assert!(snippet.contains("device: /dev/video0"));
        assert!(snippet.contains("width: 1280"));
        assert!(!snippet.contains("input_format"));

        let mut yuyv = request.clone();
        yuyv.input_format = "yuyv422".to_string();
        assert!(yuyv
            .config_snippet("camera_1", 8081)
            .ends_with("    input_format: yuyv422\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_probe_outcomes() {
        let ok = CaptureCommand::new("sh", ["-c", "exit 0"]);
        let outcome = run_probe(&ok, Duration::from_secs(5)).await.unwrap();
        assert!(outcome.is_success());

        let failing = CaptureCommand::new(
            "sh",
            ["-c", "echo 'Error opening input' >&2; echo 'noise' >&2; exit 1"],
        );
        let outcome = run_probe(&failing, Duration::from_secs(5)).await.unwrap();
        assert_eq!(
            outcome,
            ProbeOutcome::Failed {
                exit_code: Some(1),
                errors: vec!["Error opening input".to_string()],
            }
        );

        let slow = CaptureCommand::new("sh", ["-c", "sleep 30"]);
        let outcome = run_probe(&slow, Duration::from_millis(200)).await.unwrap();
        assert_eq!(outcome, ProbeOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_run_probe_missing_ffmpeg() {
        let mut request = ProbeRequest::new("/dev/video0");
        request.ffmpeg_path = "/nonexistent/ffmpeg-for-tests".to_string();

        let err = request.run().await.unwrap_err();
        assert!(matches!(err, CaptureError::FfmpegNotFound { .. }));
    }
}
