//! One stream of a child process: a reader task that fills a bounded
//! buffer, and a pump that relays new text to a sink.
//!
//! The reader task never touches the sink. Only [`StreamPump::pump`] writes
//! to it, and that runs on whichever thread owns the pump. Sinks with
//! thread affinity (console handles, `Rc`-based writers) are therefore
//! safe to use, which is why [`Sink`] does not require `Send`.

use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::buffer::{BufferLimits, StreamBuffer, Utf8Decoder};

/// How long [`StreamPump::join_once`] waits for an aborted reader to drop.
const ABORT_SETTLE_TIMEOUT: Duration = Duration::from_secs(1);

/// Reader gives up after this many read errors in a row.
const MAX_CONSECUTIVE_READ_ERRORS: u32 = 16;

/// Pause between a failed read and the next attempt.
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Destination for relayed text.
pub type Sink = Box<dyn Write>;

/// Tuning for a [`StreamPump`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpConfig {
    /// Buffer cap and eviction slack.
    pub limits: BufferLimits,

    /// Bytes requested per read.
    pub read_chunk_size: usize,

    /// How long [`StreamPump::join_once`] waits for the reader before
    /// aborting it.
    pub join_timeout: Duration,
}

impl PumpConfig {
    /// Default read size.
    pub const DEFAULT_READ_CHUNK_SIZE: usize = 8 * 1024;

    /// Default join timeout.
    pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(5);
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            limits: BufferLimits::default(),
            read_chunk_size: Self::DEFAULT_READ_CHUNK_SIZE,
            join_timeout: Self::DEFAULT_JOIN_TIMEOUT,
        }
    }
}

/// State shared between the reader task and the pump.
struct Shared {
    state: Mutex<ReaderState>,
    done: Condvar,
}

struct ReaderState {
    buffer: StreamBuffer,
    finished: bool,
}

impl Shared {
    fn new(limits: BufferLimits) -> Self {
        Self {
            state: Mutex::new(ReaderState {
                buffer: StreamBuffer::new(limits),
                finished: false,
            }),
            done: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ReaderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn append(&self, stream: &'static str, text: &str) {
        let evicted = self.lock().buffer.append(text);
        if evicted > 0 {
            trace!(stream, evicted, "buffer trimmed");
        }
    }

    fn mark_finished(&self) {
        self.lock().finished = true;
        self.done.notify_all();
    }

    /// Block until the reader is done or `timeout` passes. Returns whether
    /// the reader finished.
    fn wait_finished(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = self
            .done
            .wait_timeout_while(guard, timeout, |state| !state.finished)
            .unwrap_or_else(PoisonError::into_inner);
        guard.finished
    }
}

/// Marks the reader finished however its task ends, abort included.
struct FinishGuard(Arc<Shared>);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.0.mark_finished();
    }
}

/// Reader task body: chunked reads into the shared buffer until EOF.
async fn read_stream<R>(stream: &'static str, mut source: R, shared: Arc<Shared>, chunk_size: usize)
where
    R: AsyncRead + Unpin,
{
    let _finished = FinishGuard(Arc::clone(&shared));
    let mut chunk = vec![0u8; chunk_size];
    let mut decoder = Utf8Decoder::default();
    let mut errors = 0u32;

    loop {
        match source.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                errors = 0;
                let text = decoder.decode(&chunk[..n]);
                if !text.is_empty() {
                    shared.append(stream, &text);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                errors += 1;
                if errors >= MAX_CONSECUTIVE_READ_ERRORS {
                    warn!(stream, error = %e, errors, "giving up after repeated read errors");
                    break;
                }
                warn!(stream, error = %e, "read failed, continuing");
                tokio::time::sleep(READ_ERROR_BACKOFF).await;
            }
        }
    }

    let tail = decoder.finish();
    if !tail.is_empty() {
        shared.append(stream, &tail);
    }
    debug!(stream, "reader reached end of stream");
}

/// Captures one output stream and relays it to a sink on demand.
pub struct StreamPump {
    name: &'static str,
    shared: Arc<Shared>,
    task: Option<JoinHandle<()>>,
    sink: Option<Sink>,
    join_timeout: Duration,
    final_text: Option<String>,
}

impl StreamPump {
    /// Start a reader task for `source` on `runtime`.
    ///
    /// With no sink, output is still captured; [`pump`](Self::pump) then
    /// only advances the read cursor.
    pub fn start<R>(
        name: &'static str,
        source: R,
        sink: Option<Sink>,
        config: &PumpConfig,
        runtime: &Handle,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let shared = Arc::new(Shared::new(config.limits));
        let task = runtime.spawn(read_stream(
            name,
            source,
            Arc::clone(&shared),
            config.read_chunk_size.max(1),
        ));

        Self {
            name,
            shared,
            task: Some(task),
            sink,
            join_timeout: config.join_timeout,
            final_text: None,
        }
    }

    /// Relay text buffered since the last pump to the sink.
    ///
    /// Every byte the reader captured reaches the sink exactly once, however
    /// far the backlog has grown past the buffer cap. The buffer lock is
    /// released before the sink is written.
    pub fn pump(&mut self) {
        let Some(text) = self.shared.lock().buffer.take_unread() else {
            return;
        };
        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.write_all(text.as_bytes()).and_then(|()| sink.flush()) {
                warn!(stream = self.name, error = %e, "failed to write to sink");
            }
        }
    }

    /// Wait for the reader to finish, then flush and freeze the output.
    ///
    /// A reader still blocked after the join timeout (for example because a
    /// grandchild holds the pipe open) is aborted. Calls after the first
    /// return immediately.
    pub fn join_once(&mut self) {
        if self.final_text.is_some() {
            return;
        }

        if !self.shared.wait_finished(self.join_timeout) {
            warn!(
                stream = self.name,
                timeout_ms = u64::try_from(self.join_timeout.as_millis()).unwrap_or(u64::MAX),
                "reader still blocked after join timeout, aborting it"
            );
            if let Some(task) = self.task.as_ref() {
                task.abort();
            }
            // The task may still be mid-append; it is gone once its guard drops.
            if !self.shared.wait_finished(ABORT_SETTLE_TIMEOUT) {
                warn!(stream = self.name, "aborted reader did not stop in time");
            }
        }
        self.task = None;

        self.pump();
        self.final_text = Some(self.shared.lock().buffer.snapshot());
    }

    /// Whether [`join_once`](Self::join_once) has completed.
    pub const fn is_joined(&self) -> bool {
        self.final_text.is_some()
    }

    /// Everything captured so far, independent of what has been pumped.
    pub fn snapshot(&self) -> String {
        match &self.final_text {
            Some(text) => text.clone(),
            None => self.shared.lock().buffer.snapshot(),
        }
    }

    /// Bytes evicted from this stream's buffer.
    pub fn evicted_bytes(&self) -> u64 {
        self.shared.lock().buffer.evicted()
    }

    /// Stream name used in log events.
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl Drop for StreamPump {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl fmt::Debug for StreamPump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamPump")
            .field("name", &self.name)
            .field("has_sink", &self.sink.is_some())
            .field("joined", &self.is_joined())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::thread;
    use std::time::Instant;

    use tokio::io::{AsyncWriteExt, ReadBuf};

    use super::*;
    use crate::process::runtime;
    use crate::process::testing::{BrokenSink, RecordingSink};

    fn start(source: impl AsyncRead + Unpin + Send + 'static, sink: Option<Sink>) -> StreamPump {
        start_with(source, sink, PumpConfig::default())
    }

    fn start_with(
        source: impl AsyncRead + Unpin + Send + 'static,
        sink: Option<Sink>,
        config: PumpConfig,
    ) -> StreamPump {
        StreamPump::start("test", source, sink, &config, &runtime::handle().unwrap())
    }

    #[test]
    fn test_join_relays_everything_once() {
        let sink = RecordingSink::default();
        let mut pump = start(Cursor::new(b"first\nsecond\n".to_vec()), Some(sink.boxed()));

        pump.join_once();
        assert_eq!(sink.text(), "first\nsecond\n");
        assert_eq!(pump.snapshot(), "first\nsecond\n");

        pump.join_once();
        pump.pump();
        assert_eq!(sink.text(), "first\nsecond\n");
    }

    #[test]
    fn test_sink_is_written_from_calling_thread() {
        let sink = RecordingSink::default();
        let mut pump = start(Cursor::new(vec![b'x'; 64 * 1024]), Some(sink.boxed()));

        let deadline = Instant::now() + Duration::from_secs(5);
        while sink.text().len() < 64 * 1024 && Instant::now() < deadline {
            pump.pump();
            thread::sleep(Duration::from_millis(5));
        }
        pump.join_once();

        let writers = sink.writers();
        assert!(!writers.is_empty());
        assert!(writers.iter().all(|id| *id == thread::current().id()));
    }

    #[test]
    fn test_without_sink_still_captures() {
        let mut pump = start(Cursor::new(b"quiet\n".to_vec()), None);
        pump.join_once();
        assert_eq!(pump.snapshot(), "quiet\n");
    }

    #[test]
    fn test_pump_before_data_is_noop() {
        let sink = RecordingSink::default();
        let (_writer, reader) = tokio::io::duplex(64);
        let mut pump = start(reader, Some(sink.boxed()));
        pump.pump();
        assert!(sink.writers().is_empty());
    }

    #[test]
    fn test_wedged_reader_is_aborted_after_timeout() {
        let handle = runtime::handle().unwrap();
        let (mut writer, reader) = tokio::io::duplex(64);
        handle.block_on(writer.write_all(b"partial")).unwrap();

        let sink = RecordingSink::default();
        let config = PumpConfig {
            join_timeout: Duration::from_millis(100),
            ..PumpConfig::default()
        };
        let mut pump = start_with(reader, Some(sink.boxed()), config);

        // Give the reader a moment to pick up what was written.
        let deadline = Instant::now() + Duration::from_secs(5);
        while pump.snapshot().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        // The writer stays open, so the reader never sees EOF.
        let started = Instant::now();
        pump.join_once();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(pump.is_joined());
        assert_eq!(sink.text(), "partial");
        assert_eq!(pump.snapshot(), "partial");
        // The aborted task has dropped before the text was frozen.
        assert!(pump.shared.lock().finished);
        drop(writer);
    }

    #[test]
    fn test_backlog_over_cap_reaches_sink_intact() {
        let config = PumpConfig {
            limits: BufferLimits::new(256),
            read_chunk_size: 64,
            ..PumpConfig::default()
        };
        let input: String = (0..2000).map(|i| format!("line {i}\n")).collect();
        let sink = RecordingSink::default();
        let mut pump = start_with(Cursor::new(input.clone().into_bytes()), Some(sink.boxed()), config);

        // Let the reader run well past the cap before anything is pumped.
        let deadline = Instant::now() + Duration::from_secs(5);
        while !pump.shared.lock().finished && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        pump.join_once();

        assert_eq!(sink.text(), input);
        let captured = pump.snapshot();
        assert!(captured.len() <= 256);
        assert!(input.ends_with(&captured));
        assert_eq!(pump.evicted_bytes(), (input.len() - captured.len()) as u64);
    }

    #[test]
    fn test_cap_bounds_captured_text() {
        let config = PumpConfig {
            limits: BufferLimits::new(1024),
            read_chunk_size: 100,
            ..PumpConfig::default()
        };
        let input: String = (0..1000).map(|i| format!("{i}\n")).collect();
        let mut pump = start_with(Cursor::new(input.into_bytes()), None, config);
        pump.join_once();

        let captured = pump.snapshot();
        assert!(captured.len() <= 1024);
        assert!(captured.ends_with("998\n999\n"));
        assert!(!captured.starts_with("0\n1\n"));
        assert!(pump.evicted_bytes() > 0);
    }

    #[test]
    fn test_sink_errors_do_not_stop_capture() {
        let mut pump = start(Cursor::new(b"still captured\n".to_vec()), Some(Box::new(BrokenSink)));
        pump.join_once();
        assert_eq!(pump.snapshot(), "still captured\n");
    }

    /// Fails `failures` times, then yields `data` once, then EOF.
    struct FlakySource {
        failures: u32,
        data: Option<&'static [u8]>,
    }

    impl AsyncRead for FlakySource {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.failures > 0 {
                self.failures -= 1;
                return Poll::Ready(Err(io::Error::other("flaky pipe")));
            }
            if let Some(data) = self.data.take() {
                buf.put_slice(data);
            }
            Poll::Ready(Ok(()))
        }
    }

    #[test]
    fn test_read_errors_are_skipped() {
        let source = FlakySource {
            failures: 3,
            data: Some(b"recovered\n"),
        };
        let mut pump = start(source, None);
        pump.join_once();
        assert_eq!(pump.snapshot(), "recovered\n");
    }

    #[test]
    fn test_reader_gives_up_on_endless_errors() {
        let source = FlakySource {
            failures: u32::MAX,
            data: Some(b"never read"),
        };
        let started = Instant::now();
        let mut pump = start(source, None);
        pump.join_once();
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(pump.snapshot(), "");
    }

    #[test]
    fn test_debug_output() {
        let pump = start(Cursor::new(Vec::new()), None);
        let debug = format!("{pump:?}");
        assert!(debug.contains("StreamPump"));
        assert!(debug.contains("test"));
    }
}
