//! Shell command execution with simultaneous live relay and capture.
//!
//! Each child gets one [`StreamPump`] per output stream. A pump's reader
//! task drains the pipe into a bounded buffer so the child never stalls on
//! a full pipe; the controlling thread relays new text to the sinks each
//! time it polls.

mod buffer;
mod controller;
mod pump;
mod runtime;
mod spawn;
#[cfg(test)]
mod testing;

pub use buffer::BufferLimits;
pub use controller::{run, Captured, CapturingProcess};
pub use pump::{PumpConfig, Sink, StreamPump};
pub use runtime::cancel_on_ctrl_c;
pub use spawn::{CaptureOptions, Sinks};
