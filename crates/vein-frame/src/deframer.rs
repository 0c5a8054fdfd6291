use bytes::{Bytes, BytesMut};
use tracing::warn;

use crate::codec::{decode_frame, DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Result of feeding bytes into a [`Deframer`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Feed {
    /// Complete frame payloads, in stream order.
    pub frames: Vec<Bytes>,
    /// Bytes (headers included) consumed from the buffer by those frames.
    pub consumed: usize,
}

/// Reconstructs whole frames from an incrementally fed byte stream.
///
/// Unconsumed bytes are retained verbatim for the next call. Once a corrupt
/// length prefix has been seen the deframer is poisoned: every later call
/// fails, so the owner has no way to resynchronize by accident.
#[derive(Debug)]
pub struct Deframer {
    buf: BytesMut,
    max_payload: usize,
    poisoned: bool,
}

impl Deframer {
    /// Create a deframer with the default payload limit.
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD)
    }

    /// Create a deframer that rejects length prefixes above `max_payload`.
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_payload,
            poisoned: false,
        }
    }

    /// Append `bytes` and drain every frame that is now complete.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Feed> {
        self.extend(bytes)?;

        let mut feed = Feed::default();
        while let Some(frame) = self.next_frame()? {
            feed.consumed += HEADER_SIZE + frame.len();
            feed.frames.push(frame);
        }
        Ok(feed)
    }

    /// Append `bytes` without decoding.
    pub fn extend(&mut self, bytes: &[u8]) -> Result<()> {
        if self.poisoned {
            return Err(FrameError::Poisoned);
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Decode the next complete frame from the buffered bytes, if any.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>> {
        if self.poisoned {
            return Err(FrameError::Poisoned);
        }
        match decode_frame(&mut self.buf, self.max_payload) {
            Ok(frame) => Ok(frame),
            Err(err) => {
                if err.is_corrupt() {
                    warn!(error = %err, buffered = self.buf.len(), "corrupt frame header");
                    self.poisoned = true;
                }
                Err(err)
            }
        }
    }

    /// Number of bytes retained for a frame that is not yet complete.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Whether a corrupt frame has been seen.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Update maximum payload size for subsequent decoding.
    pub fn set_max_payload_size(&mut self, max_payload: usize) {
        self.max_payload = max_payload;
    }

    /// Current maximum payload size.
    pub fn max_payload_size(&self) -> usize {
        self.max_payload
    }
}

impl Default for Deframer {
    fn default() -> Self {
        Self::new()
    }
}
