//! Newline-delimited JSON framing.
//!
//! Wire format:
//! ```text
//! ┌──────────────────────────────┬────┐
//! │ UTF-8 JSON object (1 object) │ \n │
//! └──────────────────────────────┴────┘
//! ```
//!
//! No length prefix, no escaping beyond JSON's own. The decoder accumulates
//! bytes until a LF, parses exactly one object per line, and tolerates
//! unknown keys (validation is the classifier's job). A line longer than
//! [`MAX_LINE_SIZE`] or an unparseable line is fatal to the session — the
//! caller resets the decoder on reconnect.

use core::fmt;

use serde_json::Value;

/// Maximum accepted line length (covers a 4 KiB FOTA chunk after base64
/// expansion plus JSON overhead).
pub const MAX_LINE_SIZE: usize = 8192;

// ── Error type ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// The peer closed the stream (EOF).
    Closed,
    /// A complete line was not a valid JSON object.
    BadFrame,
    /// A line exceeded [`MAX_LINE_SIZE`] before its terminator arrived.
    LineTooLong,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "stream closed"),
            Self::BadFrame => write!(f, "invalid JSON frame"),
            Self::LineTooLong => write!(f, "line exceeds {} bytes", MAX_LINE_SIZE),
        }
    }
}

// ── Decoder ──────────────────────────────────────────────────

/// Streaming line decoder.
///
/// Feed raw socket reads with [`push`](Self::push), then drain complete
/// frames with [`next_frame`](Self::next_frame) until it returns `None`.
pub struct LineDecoder {
    buf: heapless::Vec<u8, MAX_LINE_SIZE>,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LineDecoder {
    pub fn new() -> Self {
        Self {
            buf: heapless::Vec::new(),
        }
    }

    /// Append raw bytes to the accumulator.
    pub fn push(&mut self, data: &[u8]) -> Result<(), FrameError> {
        self.buf
            .extend_from_slice(data)
            .map_err(|()| FrameError::LineTooLong)
    }

    /// Pop the next complete frame, if a full line has been accumulated.
    pub fn next_frame(&mut self) -> Result<Option<Value>, FrameError> {
        let Some(pos) = self.buf.iter().position(|&b| b == b'\n') else {
            return Ok(None);
        };

        let parsed = serde_json::from_slice::<Value>(&self.buf[..pos]);

        // Drop the consumed line plus its terminator, keeping the tail.
        let tail: heapless::Vec<u8, MAX_LINE_SIZE> =
            heapless::Vec::from_slice(&self.buf[pos + 1..]).map_err(|()| FrameError::LineTooLong)?;
        self.buf = tail;

        match parsed {
            Ok(msg) if msg.is_object() => Ok(Some(msg)),
            _ => Err(FrameError::BadFrame),
        }
    }

    /// Discard buffered bytes (e.g. after a transport reconnect).
    pub fn reset(&mut self) {
        self.buf.clear();
    }
}

// ── Encoder ──────────────────────────────────────────────────

/// Serialize one message and append the line terminator.
pub fn encode_line(msg: &Value) -> Result<Vec<u8>, FrameError> {
    let mut bytes = serde_json::to_vec(msg).map_err(|_| FrameError::BadFrame)?;
    bytes.push(b'\n');
    Ok(bytes)
}

// ── Tests ────────────────────────────────────────────────────
