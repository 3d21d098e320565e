//! Sinks for tests.

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;
use std::thread::{self, ThreadId};

use super::pump::Sink;

/// Sink that records what it was given and which thread wrote it.
///
/// Built on `Rc`, so it is not `Send` either.
#[derive(Clone, Default)]
pub struct RecordingSink {
    inner: Rc<RefCell<Recorded>>,
}

#[derive(Default)]
struct Recorded {
    text: String,
    writers: Vec<ThreadId>,
}

impl RecordingSink {
    pub fn boxed(&self) -> Sink {
        Box::new(self.clone())
    }

    pub fn text(&self) -> String {
        self.inner.borrow().text.clone()
    }

    pub fn writers(&self) -> Vec<ThreadId> {
        self.inner.borrow().writers.clone()
    }
}

impl Write for RecordingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut recorded = self.inner.borrow_mut();
        recorded.text.push_str(&String::from_utf8_lossy(buf));
        recorded.writers.push(thread::current().id());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Sink whose writes always fail.
pub struct BrokenSink;

impl Write for BrokenSink {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
