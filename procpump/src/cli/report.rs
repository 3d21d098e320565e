//! JSON summary of a run, written with `--report`.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use procpump::CapturingProcess;
use serde::Serialize;

/// How the run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The command exited by itself.
    Exited,
    /// The command was killed after `--timeout`.
    TimedOut,
    /// The command was killed after Ctrl-C.
    Interrupted,
}

impl Outcome {
    /// Exit code for procpump itself.
    ///
    /// A child killed by signal N (reported as `-N`) maps to `128 + N`, as
    /// shells do.
    pub fn exit_code(self, child_code: Option<i32>) -> u8 {
        match self {
            Self::Exited => child_code
                .map(|code| if code < 0 { 128i32.saturating_sub(code) } else { code })
                .and_then(|code| u8::try_from(code).ok())
                .unwrap_or(1),
            Self::TimedOut => 124,
            Self::Interrupted => 130,
        }
    }
}

/// Everything known about a finished run.
#[derive(Debug, Serialize)]
pub struct CaptureReport {
    pub command: String,
    pub outcome: Outcome,
    pub exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub stdout_evicted_bytes: u64,
    pub stderr_evicted_bytes: u64,
    pub stdout: String,
    pub stderr: String,
}

impl CaptureReport {
    /// Snapshot a process that has finished or been killed.
    pub fn new(
        process: &CapturingProcess,
        outcome: Outcome,
        started_at: DateTime<Utc>,
        elapsed: Duration,
    ) -> Self {
        Self {
            command: process.command().to_string(),
            outcome,
            exit_code: process.exit_code(),
            started_at,
            finished_at: Utc::now(),
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            stdout_evicted_bytes: process.stdout_evicted(),
            stderr_evicted_bytes: process.stderr_evicted(),
            stdout: process.stdout(),
            stderr: process.stderr(),
        }
    }

    /// Write the report as pretty-printed JSON.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))
    }
}
