//! Spawn configuration for captured shell commands.
//!
//! Provides:
//! - A builder for the command, working directory and environment
//! - Buffer, polling and join tuning
//! - Sink selection for live relay

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::buffer::BufferLimits;
use super::pump::{PumpConfig, Sink};

/// Configuration options for a captured command.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Command line handed to the system shell.
    pub command: String,

    /// Working directory. Inherited from the caller when unset.
    pub working_dir: Option<PathBuf>,

    /// Environment variables to set (merged with current env).
    pub env: HashMap<String, String>,

    /// Bytes of output retained per stream.
    pub max_buffer_bytes: usize,

    /// Extra bytes evicted past the overflow (default: a quarter of the cap).
    pub evict_slack_bytes: Option<usize>,

    /// Bytes requested per pipe read (default: 8 KiB).
    pub read_chunk_size: usize,

    /// Sleep between polls while waiting (default: 100ms).
    pub poll_interval: Duration,

    /// How long to wait for a reader to drain after exit (default: 5s).
    pub join_timeout: Duration,

    /// Kill the child if the controller is dropped while it runs.
    pub kill_on_drop: bool,

    /// Token that interrupts `wait` when cancelled.
    pub cancel_token: Option<CancellationToken>,
}

impl CaptureOptions {
    /// Default sleep between polls.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

    /// Create new options for the given shell command.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            working_dir: None,
            env: HashMap::new(),
            max_buffer_bytes: BufferLimits::DEFAULT_MAX_BYTES,
            evict_slack_bytes: None,
            read_chunk_size: PumpConfig::DEFAULT_READ_CHUNK_SIZE,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            join_timeout: PumpConfig::DEFAULT_JOIN_TIMEOUT,
            kill_on_drop: false,
            cancel_token: None,
        }
    }

    /// Set the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set multiple environment variables.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in vars {
            self.env.insert(k.into(), v.into());
        }
        self
    }

    /// Set the per-stream buffer cap.
    pub const fn max_buffer_bytes(mut self, bytes: usize) -> Self {
        self.max_buffer_bytes = bytes;
        self
    }

    /// Set how much extra is evicted once the cap is exceeded.
    pub const fn evict_slack_bytes(mut self, bytes: usize) -> Self {
        self.evict_slack_bytes = Some(bytes);
        self
    }

    /// Set the pipe read size.
    pub const fn read_chunk_size(mut self, bytes: usize) -> Self {
        self.read_chunk_size = bytes;
        self
    }

    /// Set the sleep between polls in `wait`.
    pub const fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the reader join timeout.
    pub const fn join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Kill the child when the controller is dropped.
    pub const fn kill_on_drop(mut self, kill: bool) -> Self {
        self.kill_on_drop = kill;
        self
    }

    /// Interrupt `wait` when this token is cancelled.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    /// Buffer and reader tuning derived from these options.
    pub(crate) fn pump_config(&self) -> PumpConfig {
        let mut limits = BufferLimits::new(self.max_buffer_bytes);
        if let Some(slack) = self.evict_slack_bytes {
            limits = limits.with_slack(slack);
        }
        PumpConfig {
            limits,
            read_chunk_size: self.read_chunk_size.max(1),
            join_timeout: self.join_timeout,
        }
    }

    /// Shell invocation with stdout and stderr piped and stdin closed.
    pub(crate) fn build_command(&self) -> Command {
        let mut cmd = shell(&self.command);

        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(self.kill_on_drop);
        cmd
    }
}

#[cfg(unix)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

/// Where relayed stdout and stderr text goes.
///
/// Sinks are only ever written from the thread that calls `poll`/`wait`,
/// so they do not need to be `Send`.
pub struct Sinks {
    pub(crate) stdout: Option<Sink>,
    pub(crate) stderr: Option<Sink>,
}

impl Sinks {
    /// Relay to this process's own stdout and stderr.
    pub fn inherit() -> Self {
        Self {
            stdout: Some(Box::new(io::stdout())),
            stderr: Some(Box::new(io::stderr())),
        }
    }

    /// Capture only; relay nothing.
    pub fn discard() -> Self {
        Self {
            stdout: None,
            stderr: None,
        }
    }

    /// Relay stdout to `sink`.
    pub fn stdout(mut self, sink: impl io::Write + 'static) -> Self {
        self.stdout = Some(Box::new(sink));
        self
    }

    /// Relay stderr to `sink`.
    pub fn stderr(mut self, sink: impl io::Write + 'static) -> Self {
        self.stderr = Some(Box::new(sink));
        self
    }
}

impl Default for Sinks {
    fn default() -> Self {
        Self::inherit()
    }
}

impl std::fmt::Debug for Sinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sinks")
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = CaptureOptions::new("echo hi");
        assert_eq!(opts.command, "echo hi");
        assert_eq!(opts.max_buffer_bytes, 1024 * 1024);
        assert_eq!(opts.poll_interval, Duration::from_millis(100));
        assert_eq!(opts.join_timeout, Duration::from_secs(5));
        assert!(opts.working_dir.is_none());
        assert!(!opts.kill_on_drop);
    }

    #[test]
    fn test_builder_sets_fields() {
        let opts = CaptureOptions::new("make")
            .working_dir("/tmp")
            .env("A", "1")
            .envs([("B", "2"), ("C", "3")])
            .max_buffer_bytes(4096)
            .read_chunk_size(512)
            .poll_interval(Duration::from_millis(20))
            .join_timeout(Duration::from_millis(250))
            .kill_on_drop(true);

        assert_eq!(opts.working_dir, Some(PathBuf::from("/tmp")));
        assert_eq!(opts.env.len(), 3);
        assert_eq!(opts.env.get("B").map(String::as_str), Some("2"));
        assert_eq!(opts.read_chunk_size, 512);
        assert!(opts.kill_on_drop);
    }

    #[test]
    fn test_pump_config_default_slack() {
        let config = CaptureOptions::new("true").max_buffer_bytes(4000).pump_config();
        assert_eq!(config.limits.max_bytes, 4000);
        assert_eq!(config.limits.slack_bytes, 1000);
    }

    #[test]
    fn test_pump_config_explicit_slack() {
        let config = CaptureOptions::new("true")
            .max_buffer_bytes(4000)
            .evict_slack_bytes(10)
            .read_chunk_size(0)
            .pump_config();
        assert_eq!(config.limits.slack_bytes, 10);
        assert_eq!(config.read_chunk_size, 1);
    }

    #[test]
    fn test_sinks_overrides() {
        let sinks = Sinks::discard().stdout(Vec::<u8>::new());
        assert!(sinks.stdout.is_some());
        assert!(sinks.stderr.is_none());
        assert_eq!(format!("{sinks:?}"), "Sinks { stdout: true, stderr: false }");
    }
}
