//! Logging configuration using tracing

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the logging system.
///
/// Logs go to stderr. The default level is `warn` so that log lines stay
/// out of the relayed command output; `RUST_LOG` overrides it.
pub fn init(verbose: bool, json: bool) -> anyhow::Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()?;
    }

    Ok(())
}
