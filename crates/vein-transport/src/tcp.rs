use std::fmt::Debug;
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::NetStream;

/// TCP listener transport.
///
/// Provides bind/accept over TCP and a blocking `connect` for clients.
/// Accepted streams are always switched back to blocking mode, even when the
/// listener itself polls in non-blocking mode.
pub struct TcpTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpTransport {
    /// Bind and listen on the first address `addr` resolves to.
    pub fn bind<A: ToSocketAddrs + Debug>(addr: A) -> Result<Self> {
        let addrs = resolve(&addr)?;
        let listener = TcpListener::bind(&addrs[..]).map_err(|e| TransportError::Bind {
            addr: describe(&addrs),
            source: e,
        })?;
        let local_addr = listener.local_addr()?;

        info!(%local_addr, "listening on tcp");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Switch the listener between blocking and polling accept.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.listener
            .set_nonblocking(nonblocking)
            .map_err(Into::into)
    }

    /// Accept an incoming connection (blocking unless the listener is non-blocking).
    pub fn accept(&self) -> Result<(NetStream, SocketAddr)> {
        let (stream, addr) = self.listener.accept().map_err(TransportError::Accept)?;
        stream.set_nonblocking(false)?;
        debug!(peer = %addr, "accepted connection");
        Ok((NetStream::from_tcp(stream), addr))
    }

    /// Accept a pending connection without blocking.
    ///
    /// Returns `Ok(None)` when no connection is waiting. The listener must have
    /// been switched to non-blocking mode with [`TcpTransport::set_nonblocking`].
    pub fn try_accept(&self) -> Result<Option<(NetStream, SocketAddr)>> {
        match self.accept() {
            Ok(accepted) => Ok(Some(accepted)),
            Err(TransportError::Accept(err))
                if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::Interrupted =>
            {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Connect to a listening TCP endpoint (blocking).
    pub fn connect<A: ToSocketAddrs + Debug>(addr: A) -> Result<NetStream> {
        let addrs = resolve(&addr)?;
        let stream = TcpStream::connect(&addrs[..]).map_err(|e| TransportError::Connect {
            addr: describe(&addrs),
            source: e,
        })?;
        debug!(addr = %describe(&addrs), "connected over tcp");
        Ok(NetStream::from_tcp(stream))
    }

    /// Connect with an upper bound on the time spent per resolved address.
    pub fn connect_timeout<A: ToSocketAddrs + Debug>(
        addr: A,
        timeout: Duration,
    ) -> Result<NetStream> {
        let addrs = resolve(&addr)?;
        let mut last_err = None;
        for candidate in &addrs {
            match TcpStream::connect_timeout(candidate, timeout) {
                Ok(stream) => {
                    debug!(addr = %candidate, "connected over tcp");
                    return Ok(NetStream::from_tcp(stream));
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(TransportError::Connect {
            addr: describe(&addrs),
            source: last_err
                .unwrap_or_else(|| std::io::Error::new(ErrorKind::NotFound, "no address")),
        })
    }

    /// The address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

fn resolve<A: ToSocketAddrs + Debug>(addr: &A) -> Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = addr
        .to_socket_addrs()
        .map_err(|_| TransportError::Unresolved(format!("{addr:?}")))?
        .collect();
    if addrs.is_empty() {
        return Err(TransportError::Unresolved(format!("{addr:?}")));
    }
    Ok(addrs)
}

fn describe(addrs: &[SocketAddr]) -> String {
    addrs
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
