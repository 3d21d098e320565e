//! Bounded text buffer shared between a reader task and its pump.
//!
//! The buffer only grows from the back (reader side) and is only cut from
//! the front, once it exceeds [`BufferLimits::max_bytes`]. A read cursor
//! tracks how much of the buffered text has already been relayed to a sink,
//! and cuts never reach past it.

/// Size limits for a [`StreamBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLimits {
    /// Bytes retained before the oldest text is evicted.
    pub max_bytes: usize,

    /// Bytes evicted on top of the overflow, so that a buffer sitting at
    /// the cap is not trimmed again on every append.
    pub slack_bytes: usize,
}

impl BufferLimits {
    /// Default cap of 1 MiB per stream.
    pub const DEFAULT_MAX_BYTES: usize = 1024 * 1024;

    /// Limits with the given cap and a slack of a quarter of it.
    pub fn new(max_bytes: usize) -> Self {
        let max_bytes = max_bytes.max(1);
        Self {
            max_bytes,
            slack_bytes: max_bytes / 4,
        }
    }

    /// Override the slack. Clamped to the cap.
    pub fn with_slack(mut self, slack_bytes: usize) -> Self {
        self.slack_bytes = slack_bytes.min(self.max_bytes);
        self
    }
}

impl Default for BufferLimits {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_BYTES)
    }
}

/// Append-only text with front eviction and a relay cursor.
///
/// Only text before the read cursor is ever evicted, so everything appended
/// is handed out by [`take_unread`](Self::take_unread) exactly once. While
/// unrelayed text is pending the buffer may exceed the cap; it is trimmed
/// back under the cap as soon as that text has been taken.
///
/// Invariant: `read_cursor() <= len()` after every operation.
#[derive(Debug)]
pub(crate) struct StreamBuffer {
    text: String,
    read_cursor: usize,
    limits: BufferLimits,
    evicted: u64,
}

impl StreamBuffer {
    /// Create an empty buffer.
    pub const fn new(limits: BufferLimits) -> Self {
        Self {
            text: String::new(),
            read_cursor: 0,
            limits,
            evicted: 0,
        }
    }

    /// Append a chunk, evicting already relayed text if the cap is exceeded.
    ///
    /// Returns the number of bytes evicted.
    pub fn append(&mut self, chunk: &str) -> usize {
        self.text.push_str(chunk);
        self.trim()
    }

    /// Hand out everything past the read cursor and move the cursor to the
    /// end, then trim the buffer back under the cap.
    pub fn take_unread(&mut self) -> Option<String> {
        if self.read_cursor >= self.text.len() {
            return None;
        }
        let unread = self.text[self.read_cursor..].to_owned();
        self.read_cursor = self.text.len();
        self.trim();
        Some(unread)
    }

    /// Drop the overflow plus the configured slack from the front, rounded
    /// up to a character boundary and never past the read cursor.
    fn trim(&mut self) -> usize {
        if self.text.len() <= self.limits.max_bytes {
            return 0;
        }

        let overflow = self.text.len() - self.limits.max_bytes;
        let mut cut = (overflow + self.limits.slack_bytes).min(self.text.len());
        while !self.text.is_char_boundary(cut) {
            cut += 1;
        }
        // The cursor always sits on a character boundary.
        let cut = cut.min(self.read_cursor);
        if cut == 0 {
            return 0;
        }

        self.text.drain(..cut);
        self.read_cursor -= cut;
        self.evicted += cut as u64;
        cut
    }

    /// Copy of the whole buffered text, regardless of the read cursor.
    pub fn snapshot(&self) -> String {
        self.text.clone()
    }

    /// Buffered length in bytes.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.text.len()
    }

    /// Offset of the first byte not yet relayed.
    #[cfg(test)]
    pub const fn read_cursor(&self) -> usize {
        self.read_cursor
    }

    /// Total bytes evicted over the buffer's lifetime.
    pub const fn evicted(&self) -> u64 {
        self.evicted
    }
}

/// Incremental UTF-8 decoder for chunked reads.
///
/// A multi-byte character split across two reads is held back until the
/// rest of it arrives. Invalid sequences become U+FFFD.
#[derive(Debug, Default)]
pub(crate) struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Decode as much of `bytes` (plus any held-back prefix) as possible.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut out = String::with_capacity(self.pending.len());
        let mut start = 0;
        loop {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(valid) => {
                    out.push_str(valid);
                    start = self.pending.len();
                    break;
                }
                Err(err) => {
                    let valid_end = start + err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[start..valid_end]));
                    match err.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            start = valid_end + bad;
                        }
                        // Truncated character at the end: wait for more bytes.
                        None => {
                            start = valid_end;
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..start);
        out
    }

    /// Flush whatever is still held back at end of stream.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}
