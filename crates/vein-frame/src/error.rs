/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The length prefix exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The deframer already reported corruption and refuses further input.
    #[error("stream is corrupt; no further frames can be decoded")]
    Poisoned,

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

impl FrameError {
    /// Whether this error means the byte stream can no longer be trusted for framing.
    ///
    /// Corrupt streams must be closed, never resynchronized.
    pub fn is_corrupt(&self) -> bool {
        matches!(
            self,
            FrameError::PayloadTooLarge { .. } | FrameError::Poisoned
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
