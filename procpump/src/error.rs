//! Error types for captured processes.

use std::io;

use thiserror::Error;

/// Result type alias for process operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised while running a captured command.
#[derive(Debug, Error)]
pub enum Error {
    /// The runtime that drives stream readers could not be started.
    #[error("failed to start reader runtime: {0}")]
    Runtime(#[source] io::Error),

    /// The shell could not be launched.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    /// Querying or signalling the running process failed.
    #[error("failed to {action} `{command}`: {source}")]
    Process {
        command: String,
        action: &'static str,
        #[source]
        source: io::Error,
    },

    /// The command finished with a non-zero exit code.
    #[error("`{command}` exited with code {code}")]
    NonZeroExit {
        command: String,
        code: i32,
        stdout: String,
        stderr: String,
    },

    /// Waiting was cancelled before the command finished.
    #[error("interrupted while waiting for `{command}`")]
    Interrupted { command: String },
}

impl Error {
    /// Exit code carried by a [`Error::NonZeroExit`].
    pub const fn exit_code(&self) -> Option<i32> {
        match self {
            Self::NonZeroExit { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether this is an [`Error::Interrupted`].
    pub const fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted { .. })
    }
}
