use std::time::Duration;

use uuid::Uuid;

/// Errors raised by the packet codec.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The encoded packet ended before `field` was complete.
    #[error("packet truncated while reading {field}")]
    Truncated { field: &'static str },

    /// A string field was not valid UTF-8.
    #[error("packet field {field} is not valid utf-8")]
    InvalidUtf8 { field: &'static str },

    /// A string field does not fit its length prefix.
    #[error("packet field {field} too long ({len} bytes, max {max})")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    /// The correlation marker byte is not one of the known values.
    #[error("unknown correlation marker {0:#04x}")]
    InvalidCorrelationMarker(u8),

    /// The packet type tag is empty.
    #[error("packet type tag must not be empty")]
    EmptyType,
}

/// Errors that can occur in peer operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] vein_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] vein_frame::FrameError),

    /// Packet encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Handshake failed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// A blocking handshake step timed out.
    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),

    /// No reply arrived before the request deadline.
    #[error("no reply within {0:?}")]
    CorrelationTimeout(Duration),

    /// The connection carrying a request went away before the reply arrived.
    #[error("connection lost")]
    ConnectionLost,

    /// The connection is not (or no longer) accepting outbound packets.
    #[error("connection is not connected")]
    NotConnected,

    /// The relay target is not registered on the server.
    #[error("destination {0} not connected")]
    RelayDestinationUnreachable(Uuid),

    /// The remote side answered with something this layer did not expect.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A worker thread could not be started.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(std::io::Error),
}

pub type Result<T> = std::result::Result<T, PeerError>;
