//! CLI argument definitions.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use procpump::BufferLimits;

/// procpump - run a shell command, streaming its output live while capturing it
#[derive(Parser, Debug)]
#[command(name = "procpump")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Working directory for the command
    #[arg(long, env = "PROCPUMP_CWD")]
    pub cwd: Option<PathBuf>,

    /// Kill the command after this many seconds (fractions allowed)
    #[arg(long, value_name = "SECS", value_parser = parse_seconds, env = "PROCPUMP_TIMEOUT")]
    pub timeout: Option<Duration>,

    /// Bytes of output kept per stream; older output is dropped beyond this
    #[arg(long, value_name = "BYTES", default_value_t = BufferLimits::DEFAULT_MAX_BYTES, env = "PROCPUMP_MAX_BUFFER")]
    pub max_buffer: usize,

    /// How long to wait for output to drain after the command exits
    #[arg(long, value_name = "MS", default_value_t = 5000, env = "PROCPUMP_JOIN_TIMEOUT_MS")]
    pub join_timeout_ms: u64,

    /// Capture output without relaying it
    #[arg(short, long)]
    pub quiet: bool,

    /// On failure, print the last N lines of captured stderr
    #[arg(long, value_name = "N")]
    pub tail: Option<usize>,

    /// Write a JSON report of the run to this path
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,

    /// Command to run (joined with spaces and handed to the shell)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true, num_args = 1..)]
    pub command: Vec<String>,
}

impl Cli {
    /// The command line handed to the shell.
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }

    /// Reader join timeout.
    pub const fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

fn parse_seconds(value: &str) -> Result<Duration, String> {
    let secs: f64 = value
        .parse()
        .map_err(|e| format!("invalid number of seconds '{value}': {e}"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("invalid timeout '{value}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_command_after_separator() {
        let cli = Cli::try_parse_from(["procpump", "--quiet", "--", "ls", "-la", "/tmp"]).unwrap();
        assert!(cli.quiet);
        assert_eq!(cli.command_line(), "ls -la /tmp");
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["procpump", "echo", "hi"]).unwrap();
        assert_eq!(cli.max_buffer, 1024 * 1024);
        assert_eq!(cli.join_timeout(), Duration::from_secs(5));
        assert!(cli.timeout.is_none());
        assert!(cli.tail.is_none());
        assert_eq!(cli.command, vec!["echo", "hi"]);
    }

    #[test]
    fn test_fractional_timeout() {
        let cli = Cli::try_parse_from(["procpump", "--timeout", "1.5", "--", "sleep", "5"]).unwrap();
        assert_eq!(cli.timeout, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_bad_timeout_rejected() {
        assert!(Cli::try_parse_from(["procpump", "--timeout", "soon", "--", "true"]).is_err());
        assert!(Cli::try_parse_from(["procpump", "--timeout", "-1", "--", "true"]).is_err());
    }

    #[test]
    fn test_command_required() {
        assert!(Cli::try_parse_from(["procpump", "--quiet"]).is_err());
    }
}
