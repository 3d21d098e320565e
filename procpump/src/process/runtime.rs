//! Shared runtime that drives stream reader tasks.
//!
//! The controlling API is blocking, so readers cannot run on the caller's
//! executor (a current-thread runtime would never get to them while the
//! caller sleeps in `wait`). They all live on one small multi-thread
//! runtime instead, built on first use and kept for the life of the process.

use std::io;
use std::sync::{Mutex, OnceLock, PoisonError};

use tokio::runtime::{Builder, Handle, Runtime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const READER_THREADS: usize = 2;

static RUNTIME: OnceLock<Runtime> = OnceLock::new();
static INIT: Mutex<()> = Mutex::new(());

/// Handle to the reader runtime, building it on first call.
pub(crate) fn handle() -> io::Result<Handle> {
    if let Some(runtime) = RUNTIME.get() {
        return Ok(runtime.handle().clone());
    }

    let _init = INIT.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(runtime) = RUNTIME.get() {
        return Ok(runtime.handle().clone());
    }

    let runtime = Builder::new_multi_thread()
        .worker_threads(READER_THREADS)
        .thread_name("procpump-reader")
        .enable_all()
        .build()?;
    debug!(threads = READER_THREADS, "started reader runtime");
    Ok(RUNTIME.get_or_init(|| runtime).handle().clone())
}

/// Cancel `token` when the user presses Ctrl-C.
///
/// The listener runs on the reader runtime and stops once the token is
/// cancelled by anyone.
pub fn cancel_on_ctrl_c(token: CancellationToken) -> io::Result<()> {
    handle()?.spawn(async move {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => match signal {
                Ok(()) => {
                    debug!("received Ctrl-C");
                    token.cancel();
                }
                Err(e) => warn!(error = %e, "could not listen for Ctrl-C"),
            },
            () = token.cancelled() => {}
        }
    });
    Ok(())
}
