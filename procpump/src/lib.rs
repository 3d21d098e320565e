//! procpump - run shell commands while streaming and capturing their output.
//!
//! Standard process APIs make you choose between letting a child write
//! straight to the console and piping its output for later inspection.
//! procpump does both: output is relayed to caller-supplied sinks as it
//! arrives and kept in bounded per-stream buffers, so a failed command can
//! be reported together with what it printed.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use procpump::{CaptureOptions, CapturingProcess, Sinks};
//!
//! # fn main() -> procpump::Result<()> {
//! let mut tests = CapturingProcess::spawn(
//!     CaptureOptions::new("make test").join_timeout(Duration::from_secs(2)),
//!     Sinks::inherit(),
//! )?;
//!
//! match tests.wait(Some(Duration::from_secs(600)))? {
//!     Some(0) => println!("passed"),
//!     Some(code) => eprintln!("failed with {code}:\n{}", tests.stderr()),
//!     None => tests.kill()?,
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`process`] - stream pumps and the process controller
//! - [`error`] - error type shared by all operations

pub mod error;
pub mod process;

pub use error::{Error, Result};
pub use process::{
    cancel_on_ctrl_c, run, BufferLimits, CaptureOptions, Captured, CapturingProcess, PumpConfig,
    Sinks, StreamPump,
};
