// crates/core/src/tail.rs
//! Bounded in-memory buffers for captured process output.
//!
//! - [`TailBuffer`] keeps only the most recent bytes (what the parser and the
//!   live view need).
//! - [`LogBuffer`] keeps everything up to a cap, dropping the oldest text
//!   once the cap is exceeded.
//! - [`Utf8Decoder`] turns raw pipe reads into text without splitting a
//!   multi-byte character across two chunks.

/// Marker placed at the head of a [`LogBuffer`] once old output was dropped.
pub const TRUNCATION_MARKER: &str = "[... earlier output truncated ...]\n";

/// Keep the last `capacity` bytes of a text stream.
#[derive(Debug, Clone)]
pub struct TailBuffer {
    buf: String,
    capacity: usize,
}

impl TailBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: String::with_capacity(capacity.min(64 * 1024)),
            capacity: capacity.max(1),
        }
    }

    pub fn push_str(&mut self, chunk: &str) {
        self.buf.push_str(chunk);
        if self.buf.len() > self.capacity {
            let cut = ceil_char_boundary(&self.buf, self.buf.len() - self.capacity);
            self.buf.drain(..cut);
        }
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Full output capture with an upper bound.
///
/// Dropped text is skipped over by `start`; the backing string is only
/// compacted once the skipped prefix outgrows the cap.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    buf: String,
    start: usize,
    max_bytes: usize,
    truncated: bool,
}

impl LogBuffer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            buf: String::new(),
            start: 0,
            max_bytes: max_bytes.max(1),
            truncated: false,
        }
    }

    pub fn push_str(&mut self, chunk: &str) {
        self.buf.push_str(chunk);
        let kept = self.buf.len() - self.start;
        if kept > self.max_bytes {
            self.start = ceil_char_boundary(&self.buf, self.buf.len() - self.max_bytes);
            self.truncated = true;
        }
        if self.start > self.max_bytes {
            self.buf.drain(..self.start);
            self.start = 0;
        }
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// The captured text, prefixed with [`TRUNCATION_MARKER`] if anything was dropped.
    pub fn to_text(&self) -> String {
        if self.truncated {
            let mut out = String::with_capacity(TRUNCATION_MARKER.len() + self.as_str().len());
            out.push_str(TRUNCATION_MARKER);
            out.push_str(self.as_str());
            out
        } else {
            self.as_str().to_string()
        }
    }

    pub fn as_str(&self) -> &str {
        &self.buf[self.start..]
    }
}

/// Incremental lossy UTF-8 decoder for pipe reads.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes`, holding back an incomplete trailing character until
    /// the next call.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let valid_up_to = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            // Genuinely invalid bytes: decode lossily rather than stall.
            Err(_) => self.pending.len(),
        };
        let rest = self.pending.split_off(valid_up_to);
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending = rest;
        text
    }

    /// Flush whatever is still held back at end of stream.
    pub fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

fn ceil_char_boundary(s: &str, mut index: usize) -> usize {
    while index < s.len() && !s.is_char_boundary(index) {
        index += 1;
    }
    index.min(s.len())
}
