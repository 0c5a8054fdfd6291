use std::io::{ErrorKind, Read};
use std::time::Instant;

use bytes::Bytes;
use vein_transport::NetStream;

use crate::codec::FrameConfig;
use crate::deframer::Deframer;
use crate::error::{FrameError, Result};

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete frames from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete frames.
pub struct FrameReader<T> {
    inner: T,
    deframer: Deframer,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            deframer: Deframer::with_max_payload(config.max_payload_size),
            config,
        }
    }

    /// Read the next complete frame payload (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_frame(&mut self) -> Result<Bytes> {
        self.read_frame_inner(None)
    }

    /// Like [`read_frame`](Self::read_frame), but gives up once `deadline`
    /// passes between reads, even if bytes keep trickling in.
    ///
    /// Fails with an `Io` error of kind `TimedOut`. Bytes of a partial frame
    /// stay buffered, so a later call can still complete it. A single read
    /// that blocks past the deadline is bounded only by the stream's own
    /// read timeout.
    pub fn read_frame_before(&mut self, deadline: Instant) -> Result<Bytes> {
        self.read_frame_inner(Some(deadline))
    }

    fn read_frame_inner(&mut self, deadline: Option<Instant>) -> Result<Bytes> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            if let Some(frame) = self.deframer.next_frame()? {
                return Ok(frame);
            }

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(FrameError::Io(ErrorKind::TimedOut.into()));
            }

            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.deframer.extend(&chunk[..read])?;
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    ///
    /// Any buffered bytes of an incomplete frame are discarded.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update maximum payload size for subsequent frame decoding.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
        self.deframer.set_max_payload_size(max_payload_size);
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameReader<NetStream> {
    /// Create a frame reader for `NetStream` and apply read timeout from config.
    pub fn with_config_net(inner: NetStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }

    /// Change the socket read timeout, e.g. after a handshake completes.
    pub fn set_read_timeout(&mut self, timeout: Option<std::time::Duration>) -> Result<()> {
        self.config.read_timeout = timeout;
        self.inner
            .set_read_timeout(timeout)
            .map_err(transport_to_frame_error)
    }
}

pub(crate) fn transport_to_frame_error(err: vein_transport::TransportError) -> FrameError {
    match err {
        vein_transport::TransportError::Io(io) | vein_transport::TransportError::Accept(io) => {
            FrameError::Io(io)
        }
        vein_transport::TransportError::Bind { source, .. }
        | vein_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
