//! CLI command execution.

use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use procpump::{cancel_on_ctrl_c, CaptureOptions, CapturingProcess, Sinks};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::args::Cli;
use super::report::{CaptureReport, Outcome};

/// Run the command described by `cli` and map its result to our exit code.
pub fn execute(cli: &Cli) -> Result<ExitCode> {
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone()).context("Failed to install Ctrl-C handler")?;
    execute_with(cli, &cancel)
}

/// Like [`execute`], with `cancel` standing in for Ctrl-C.
fn execute_with(cli: &Cli, cancel: &CancellationToken) -> Result<ExitCode> {
    let command = cli.command_line();
    let mut options = CaptureOptions::new(&command)
        .max_buffer_bytes(cli.max_buffer)
        .join_timeout(cli.join_timeout())
        .cancel_token(cancel.clone());
    if let Some(ref dir) = cli.cwd {
        options = options.working_dir(dir);
    }
    let sinks = if cli.quiet {
        Sinks::discard()
    } else {
        Sinks::inherit()
    };

    let started_at = Utc::now();
    let clock = Instant::now();
    let mut process = CapturingProcess::spawn(options, sinks)
        .with_context(|| format!("Failed to start: {command}"))?;

    let outcome = match process.wait(cli.timeout) {
        // Ctrl-C reaches the whole process group, so the child usually
        // dies of SIGINT before the token is seen.
        Ok(Some(_)) if cancel.is_cancelled() => Outcome::Interrupted,
        Ok(Some(_)) => Outcome::Exited,
        Ok(None) => {
            debug!(command = %command, "timed out");
            process.kill().context("Failed to kill timed out command")?;
            Outcome::TimedOut
        }
        Err(err) if err.is_interrupted() => {
            process.kill().context("Failed to kill interrupted command")?;
            Outcome::Interrupted
        }
        Err(err) => return Err(err).context("Failed while waiting for command"),
    };
    // Stop the Ctrl-C listener.
    cancel.cancel();

    let report = CaptureReport::new(&process, outcome, started_at, clock.elapsed());
    if let Some(ref path) = cli.report {
        report.write_to(path)?;
    }

    match outcome {
        Outcome::Exited => {
            if let Err(err) = process.raise_on_error() {
                eprintln!("procpump: {err}");
                if let Some(n) = cli.tail {
                    print_tail(&report.stderr, n);
                }
            }
        }
        Outcome::TimedOut => eprintln!("procpump: `{command}` timed out and was killed"),
        Outcome::Interrupted => eprintln!("procpump: `{command}` interrupted"),
    }

    Ok(ExitCode::from(outcome.exit_code(process.exit_code())))
}

fn print_tail(stderr: &str, n: usize) {
    let lines = tail_lines(stderr, n);
    if lines.is_empty() {
        return;
    }
    eprintln!("--- last {} line(s) of stderr ---", lines.len());
    for line in lines {
        eprintln!("{line}");
    }
}

/// The last `n` lines of `text`.
fn tail_lines(text: &str, n: usize) -> Vec<&str> {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(n)..].to_vec()
}
