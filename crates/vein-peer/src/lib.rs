//! Connections, dispatch, request/reply correlation and relay for vein.
//!
//! This is the layer applications talk to. A [`Server`] accepts clients and
//! relays between them; a [`Client`] dials a server. Both route incoming
//! packets to handlers registered by type tag, and both can block on a
//! correlated reply with `send_and_await_reply`.

pub mod client;
pub mod codec;
pub mod connection;
pub mod correlation;
pub mod dispatcher;
pub mod error;
pub mod handshake;
pub mod packet;
pub mod registry;
pub mod relay;
pub mod server;

pub use client::{Client, ClientBuilder, ClientConfig};
pub use codec::{BinaryCodec, PacketCodec};
pub use connection::{Connection, ConnectionConfig, ConnectionState, DisconnectReason, Identity};
pub use correlation::{CorrelationTable, ExpirySweeper, PendingReply, Reply, RequestContext};
pub use dispatcher::{
    Dispatch, Dispatcher, Handler, HandlerContext, HandlerError, HandlerMap, HandlerResult,
};
pub use error::{CodecError, PeerError, Result};
pub use handshake::{
    handshake_client, handshake_client_with_config, read_handshake_request, send_handshake_response, HandshakeConfig, HandshakeRequest,
    HandshakeResponse, HandshakeResult, MAX_USERNAME_LEN,
};
pub use packet::{
    Correlation, Packet, PING, PONG, RELAY, RELAY_OK, RELAY_REJECTED, RELAY_UNREACHABLE,
    RESERVED_PREFIX,
};
pub use registry::ConnectionRegistry;
pub use relay::RelayRequest;
pub use server::{Server, ServerBuilder, ServerConfig};
