//! Length-prefixed TCP messaging with request/reply correlation and relay.
//!
//! vein moves typed packets between a hub server and its clients over
//! persistent TCP connections. Replies are matched to requests by
//! correlation id, and the server can forward packets between clients.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP listeners, dialing and stream handles
//! - [`frame`]: Length-prefixed framing and the incremental deframer
//! - [`peer`]: Packets, connections, dispatch, correlation, server and client

/// Re-export transport types.
pub mod transport {
    pub use vein_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use vein_frame::*;
}

/// Re-export peer types.
pub mod peer {
    pub use vein_peer::*;
}

pub use vein_peer::{
    Client, ClientBuilder, Connection, HandlerContext, HandlerResult, Packet, PeerError, Reply,
    Server, ServerBuilder,
};
