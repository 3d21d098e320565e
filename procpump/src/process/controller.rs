//! A running shell command with live relay and capture of its output.

use std::fmt;
use std::process::ExitStatus;
use std::thread;
use std::time::{Duration, Instant};

use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::pump::StreamPump;
use super::runtime;
use super::spawn::{CaptureOptions, Sinks};
use crate::error::{Error, Result};

/// Sleep between status checks while reaping a killed child.
const KILL_REAP_INTERVAL: Duration = Duration::from_millis(10);

/// A shell command whose stdout and stderr are relayed live and captured.
///
/// Output reaches the sinks only from the thread calling [`poll`](Self::poll),
/// [`wait`](Self::wait) or [`kill`](Self::kill). The background readers only
/// fill buffers. Because sinks need not be `Send`, neither is this type.
///
/// # Example
///
/// ```rust,no_run
/// use procpump::{CaptureOptions, CapturingProcess, Sinks};
///
/// fn main() -> procpump::Result<()> {
///     let mut build = CapturingProcess::spawn(
///         CaptureOptions::new("cargo build").working_dir("/src/app"),
///         Sinks::inherit(),
///     )?;
///
///     if let Err(err) = build.check_wait() {
///         eprintln!("{err}\n{}", build.stderr());
///         return Err(err);
///     }
///     Ok(())
/// }
/// ```
pub struct CapturingProcess {
    command: String,
    child: Child,
    pid: Option<u32>,
    stdout: StreamPump,
    stderr: StreamPump,
    exit_code: Option<i32>,
    poll_interval: Duration,
    join_timeout: Duration,
    cancel: Option<CancellationToken>,
}

impl CapturingProcess {
    /// Run `command` with default options, relaying to this process's
    /// own stdout and stderr.
    pub fn new(command: impl Into<String>) -> Result<Self> {
        Self::spawn(CaptureOptions::new(command), Sinks::inherit())
    }

    /// Spawn the command and start capturing both streams.
    pub fn spawn(options: CaptureOptions, sinks: Sinks) -> Result<Self> {
        let runtime = runtime::handle().map_err(Error::Runtime)?;

        let mut child = {
            let _context = runtime.enter();
            options
                .build_command()
                .spawn()
                .map_err(|source| Error::Spawn {
                    command: options.command.clone(),
                    source,
                })?
        };
        let pid = child.id();
        debug!(command = %options.command, pid, "spawned");

        let missing = |stream: &str| Error::Process {
            command: options.command.clone(),
            action: "capture",
            source: std::io::Error::other(format!("{stream} was not piped")),
        };
        let stdout_pipe = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr_pipe = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        let config = options.pump_config();
        let Sinks {
            stdout: stdout_sink,
            stderr: stderr_sink,
        } = sinks;

        Ok(Self {
            stdout: StreamPump::start("stdout", stdout_pipe, stdout_sink, &config, &runtime),
            stderr: StreamPump::start("stderr", stderr_pipe, stderr_sink, &config, &runtime),
            command: options.command,
            child,
            pid,
            exit_code: None,
            poll_interval: options.poll_interval,
            join_timeout: options.join_timeout,
            cancel: options.cancel_token,
        })
    }

    /// Check for exit without blocking and relay any new output.
    ///
    /// On the first call that observes the exit, both readers are joined,
    /// so all output is captured by the time an exit code is returned.
    pub fn poll(&mut self) -> Result<Option<i32>> {
        if self.exit_code.is_none() {
            let status = self.child.try_wait().map_err(|source| Error::Process {
                command: self.command.clone(),
                action: "poll",
                source,
            })?;
            if let Some(status) = status {
                self.record_exit(status);
            }
        }
        self.stdout.pump();
        self.stderr.pump();
        Ok(self.exit_code)
    }

    /// Poll until the command exits or `timeout` elapses.
    ///
    /// Sleeps at most one poll interval at a time, so a cancelled token
    /// surfaces as [`Error::Interrupted`] promptly. Returns `None` on
    /// timeout; the command keeps running.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<Option<i32>> {
        let started = Instant::now();
        loop {
            if let Some(code) = self.poll()? {
                return Ok(Some(code));
            }
            if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
                debug!(command = %self.command, "wait interrupted");
                return Err(Error::Interrupted {
                    command: self.command.clone(),
                });
            }

            let nap = match timeout {
                Some(limit) => {
                    let elapsed = started.elapsed();
                    if elapsed >= limit {
                        return Ok(None);
                    }
                    (limit - elapsed).min(self.poll_interval)
                }
                None => self.poll_interval,
            };
            thread::sleep(nap);
        }
    }

    /// Wait for exit, then fail if the exit code is non-zero.
    pub fn check_wait(&mut self) -> Result<()> {
        self.wait(None)?;
        self.raise_on_error()
    }

    /// Fail with [`Error::NonZeroExit`] if the command exited non-zero.
    ///
    /// Does nothing while the command is still running.
    pub fn raise_on_error(&self) -> Result<()> {
        match self.exit_code {
            Some(code) if code != 0 => Err(Error::NonZeroExit {
                command: self.command.clone(),
                code,
                stdout: self.stdout(),
                stderr: self.stderr(),
            }),
            _ => Ok(()),
        }
    }

    /// Kill the command and join both readers.
    ///
    /// Safe to call repeatedly and after the command has exited.
    pub fn kill(&mut self) -> Result<()> {
        if self.exit_code.is_none() {
            if let Err(source) = self.child.start_kill() {
                // Fails if the child was already reaped; anything else is real.
                match self.child.try_wait() {
                    Ok(Some(status)) => self.record_exit(status),
                    _ => {
                        return Err(Error::Process {
                            command: self.command.clone(),
                            action: "kill",
                            source,
                        });
                    }
                }
            } else {
                debug!(command = %self.command, pid = self.pid, "killed");
            }
            self.reap_killed()?;
        }
        self.stdout.join_once();
        self.stderr.join_once();
        Ok(())
    }

    /// Give a killed child up to the join timeout to report its status.
    fn reap_killed(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.join_timeout;
        while self.poll()?.is_none() && Instant::now() < deadline {
            thread::sleep(KILL_REAP_INTERVAL);
        }
        Ok(())
    }

    fn record_exit(&mut self, status: ExitStatus) {
        let code = exit_code_of(status);
        debug!(command = %self.command, code, "exited");
        self.exit_code = Some(code);
        self.stdout.join_once();
        self.stderr.join_once();
    }

    /// All captured stdout.
    pub fn stdout(&self) -> String {
        self.stdout.snapshot()
    }

    /// All captured stderr.
    pub fn stderr(&self) -> String {
        self.stderr.snapshot()
    }

    /// Bytes of stdout evicted by the buffer cap.
    pub fn stdout_evicted(&self) -> u64 {
        self.stdout.evicted_bytes()
    }

    /// Bytes of stderr evicted by the buffer cap.
    pub fn stderr_evicted(&self) -> u64 {
        self.stderr.evicted_bytes()
    }

    /// Exit code, once observed. A Unix child killed by signal `N`
    /// reports `-N`.
    pub const fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Whether the exit has been observed.
    pub const fn is_finished(&self) -> bool {
        self.exit_code.is_some()
    }

    /// The shell command line.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// OS process id of the shell.
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }
}

impl fmt::Debug for CapturingProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapturingProcess")
            .field("command", &self.command)
            .field("pid", &self.pid)
            .field("exit_code", &self.exit_code)
            .finish_non_exhaustive()
    }
}

fn exit_code_of(status: ExitStatus) -> i32 {
    status.code().unwrap_or_else(|| signal_code(status))
}

#[cfg(unix)]
fn signal_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map_or(-1, |signal| -signal)
}

#[cfg(not(unix))]
fn signal_code(_status: ExitStatus) -> i32 {
    -1
}

/// Output of a command run to successful completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Captured {
    /// All captured stdout.
    pub stdout: String,
    /// All captured stderr.
    pub stderr: String,
}

/// Run a command to completion, relaying to `sinks`.
///
/// Fails with [`Error::NonZeroExit`] if the command exits non-zero.
pub fn run(options: CaptureOptions, sinks: Sinks) -> Result<Captured> {
    let mut process = CapturingProcess::spawn(options, sinks)?;
    process.check_wait()?;
    Ok(Captured {
        stdout: process.stdout(),
        stderr: process.stderr(),
    })
}
