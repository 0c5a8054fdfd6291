//! TCP transport abstraction for vein.
//!
//! This is the lowest layer of vein. It binds listeners, accepts and dials
//! persistent TCP connections, and hands out [`NetStream`] handles that the
//! framing layer reads from and writes to.

pub mod error;
pub mod stream;
pub mod tcp;

pub use error::{Result, TransportError};
pub use stream::NetStream;
pub use tcp::TcpTransport;
