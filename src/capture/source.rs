//! Capture process supervision
//!
//! A [`FrameSource`] owns at most one capture subprocess. Its stdout is handed
//! out once, to the broadcaster; its stderr is drained into the log so the
//! process never blocks on a full pipe.

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::task::JoinHandle;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Decoder, FramedRead};

use super::command::CaptureCommand;
use super::error::CaptureError;

/// Default grace period between SIGTERM and a forced kill
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on reaping a process after it was killed
const KILL_WAIT: Duration = Duration::from_secs(2);

/// How long stderr may keep flowing after the process exited
const STDERR_FLUSH: Duration = Duration::from_millis(500);

/// Longest stderr line kept for logging
const MAX_STDERR_LINE: usize = 4096;

/// Raw capture output handed to the broadcaster
pub type CaptureOutput = Box<dyn AsyncRead + Send + Unpin>;

/// Lifecycle of a capture process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// No process
    Stopped,
    /// Spawning the process
    Starting,
    /// Process spawned and not yet reaped
    Running,
    /// Waiting for the process to exit after a stop request
    Stopping,
}

/// Supervisor for one capture subprocess
#[derive(Debug)]
pub struct FrameSource {
    name: String,
    command: CaptureCommand,
    state: CaptureState,
    child: Option<Child>,
    output: Option<ChildStdout>,
    stderr_task: Option<JoinHandle<()>>,
    stop_timeout: Duration,
}

impl FrameSource {
    /// Create a stopped source for device `name`
    pub fn new(name: impl Into<String>, command: CaptureCommand) -> Self {
        Self {
            name: name.into(),
            command,
            state: CaptureState::Stopped,
            child: None,
            output: None,
            stderr_task: None,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    /// Override the SIGTERM grace period
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Launch the capture process
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        if self.state != CaptureState::Stopped {
            return Err(CaptureError::AlreadyRunning(self.name.clone()));
        }

        self.state = CaptureState::Starting;
        tracing::info!(device = %self.name, command = %self.command, "Starting capture process");

        let mut child = match self.command.to_command().spawn() {
            Ok(child) => child,
            Err(e) => {
                self.state = CaptureState::Stopped;
                let err = CaptureError::launch(&self.command.program, e);
                tracing::error!(device = %self.name, error = %err, "Capture process failed to start");
                return Err(err);
            }
        };

        self.output = child.stdout.take();
        self.stderr_task = child
            .stderr
            .take()
            .map(|stderr| drain_stderr(self.name.clone(), stderr));

        tracing::info!(device = %self.name, pid = ?child.id(), "Capture process running");

        self.child = Some(child);
        self.state = CaptureState::Running;
        Ok(())
    }

    /// Hand out the process output
    ///
    /// Only the first call after `start` gets the real stream; any other call
    /// gets an empty one. Reads after the process exits yield end-of-stream.
    pub fn take_output(&mut self) -> CaptureOutput {
        match self.output.take() {
            Some(stdout) => Box::new(stdout),
            None => Box::new(tokio::io::empty()),
        }
    }

    /// Stop the process: SIGTERM, wait for the grace period, then kill
    ///
    /// Idempotent; a stopped source returns immediately.
    pub async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            self.state = CaptureState::Stopped;
            return;
        };

        self.state = CaptureState::Stopping;
        self.output = None;
        let pid = child.id();
        tracing::info!(device = %self.name, pid = ?pid, "Stopping capture process");

        terminate(&mut child, pid);

        match tokio::time::timeout(self.stop_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(device = %self.name, status = %status, "Capture process exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(device = %self.name, error = %e, "Failed to wait for capture process");
            }
            Err(_) => {
                tracing::warn!(
                    device = %self.name,
                    timeout = ?self.stop_timeout,
                    "Capture process did not exit gracefully, killing"
                );
                if let Err(e) = child.start_kill() {
                    tracing::warn!(device = %self.name, error = %e, "Failed to kill capture process");
                }
                if tokio::time::timeout(KILL_WAIT, child.wait()).await.is_err() {
                    tracing::error!(device = %self.name, pid = ?pid, "Capture process could not be reaped");
                }
            }
        }

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        self.state = CaptureState::Stopped;
    }

    /// Collect a process whose output already ended
    ///
    /// Waits up to the grace period for the process to exit on its own and
    /// falls back to [`stop`](Self::stop) when it does not. Returns the exit
    /// status when the process exited by itself.
    pub async fn reap(&mut self) -> Option<ExitStatus> {
        let child = self.child.as_mut()?;

        let waited = tokio::time::timeout(self.stop_timeout, child.wait()).await;
        let status = match waited {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                tracing::warn!(device = %self.name, error = %e, "Failed to wait for capture process");
                self.stop().await;
                return None;
            }
            Err(_) => {
                tracing::warn!(device = %self.name, "Capture output ended but process is still running");
                self.stop().await;
                return None;
            }
        };

        tracing::warn!(device = %self.name, status = %status, "Capture process exited");
        self.child = None;
        self.output = None;
        if let Some(mut task) = self.stderr_task.take() {
            // Let the final ffmpeg messages reach the log
            if tokio::time::timeout(STDERR_FLUSH, &mut task).await.is_err() {
                task.abort();
            }
        }
        self.state = CaptureState::Stopped;
        Some(status)
    }

    /// Check whether the process exited on its own
    pub fn try_wait(&mut self) -> Option<ExitStatus> {
        let status = self.child.as_mut()?.try_wait().ok()??;

        tracing::warn!(device = %self.name, status = %status, "Capture process exited");
        self.child = None;
        self.state = CaptureState::Stopped;
        Some(status)
    }

    /// Current lifecycle state
    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Whether a process is spawned and not yet reaped
    pub fn is_running(&self) -> bool {
        self.state == CaptureState::Running
    }

    /// OS process id while running
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Device name used in logs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Command run on `start`
    pub fn command(&self) -> &CaptureCommand {
        &self.command
    }
}

/// Ask the child to exit
fn terminate(child: &mut Child, pid: Option<u32>) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = pid {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
        let _ = child;
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        let _ = child.start_kill();
    }
}

/// Log stderr at debug level until the pipe closes
///
/// ffmpeg separates progress updates with `\r`, so both terminators split lines.
fn drain_stderr(name: String, stderr: ChildStderr) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = FramedRead::new(stderr, StderrLines::new(name.clone()));

        while let Some(line) = lines.next().await {
            match line {
                Ok(line) if line.is_empty() => {}
                Ok(line) => {
                    tracing::debug!(device = %name, "ffmpeg: {}", String::from_utf8_lossy(&line));
                }
                Err(e) => {
                    tracing::debug!(device = %name, error = %e, "Capture stderr read failed");
                    return;
                }
            }
        }
    })
}

/// Line splitter for capture stderr
///
/// Lines longer than [`MAX_STDERR_LINE`] are skipped and splitting resumes at
/// the next terminator.
struct StderrLines {
    device: String,
    inner: AnyDelimiterCodec,
}

impl StderrLines {
    fn new(device: String) -> Self {
        Self {
            device,
            inner: AnyDelimiterCodec::new_with_max_length(
                b"\r\n".to_vec(),
                Vec::new(),
                MAX_STDERR_LINE,
            ),
        }
    }

    fn skip_overlong(
        &self,
        result: Result<Option<Bytes>, AnyDelimiterCodecError>,
    ) -> Result<Option<Option<Bytes>>, io::Error> {
        match result {
            Ok(line) => Ok(Some(line)),
            Err(AnyDelimiterCodecError::MaxChunkLengthExceeded) => {
                tracing::debug!(device = %self.device, "Skipping overlong ffmpeg stderr line");
                Ok(None)
            }
            Err(AnyDelimiterCodecError::Io(e)) => Err(e),
        }
    }
}

impl Decoder for StderrLines {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, io::Error> {
        loop {
            let result = self.inner.decode(buf);
            if let Some(line) = self.skip_overlong(result)? {
                return Ok(line);
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, io::Error> {
        loop {
            let result = self.inner.decode_eof(buf);
            if let Some(line) = self.skip_overlong(result)? {
                return Ok(line);
            }
        }
    }
}
