//! procpump - run a shell command with live output and captured logs.
//!
//! The command's stdout and stderr are relayed to the terminal as they are
//! produced and captured at the same time, so a failing run can be
//! summarized (`--tail`) or archived (`--report`) after the fact.

mod cli;
mod logging;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use cli::{execute, Cli};

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_json)?;
    execute(&cli)
}
