//! CLI argument parsing and execution.

mod args;
mod commands;
mod report;

pub use args::Cli;
pub use commands::execute;
