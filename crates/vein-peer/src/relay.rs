//! Server-mediated forwarding between connections.
//!
//! A client asks for a relay with a [`RELAY`] packet whose payload is
//!
//! ```text
//! ┌────────────────┬──────────────────────────────┐
//! │ destination id │ codec-encoded inner packet   │
//! │ (16B)          │ (rest)                       │
//! └────────────────┴──────────────────────────────┘
//! ```
//!
//! Correlated relay requests are answered with [`RELAY_OK`],
//! [`RELAY_UNREACHABLE`] or [`RELAY_REJECTED`]. Failures are reported back
//! even for uncorrelated requests, as plain packets.

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::codec::PacketCodec;
use crate::connection::Identity;
use crate::dispatcher::{HandlerContext, HandlerMap, HandlerResult};
use crate::error::{CodecError, PeerError, Result};
use crate::packet::{Correlation, Packet, RELAY, RELAY_OK, RELAY_REJECTED, RELAY_UNREACHABLE};
use crate::registry::ConnectionRegistry;

const DESTINATION_LEN: usize = 16;

/// Decoded body of a [`RELAY`] packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRequest {
    /// Connection the inner packet is for.
    pub to: Uuid,
    /// The packet to forward.
    pub packet: Packet,
}

impl RelayRequest {
    pub fn new(to: Uuid, packet: Packet) -> Self {
        Self { to, packet }
    }

    /// Encode into a [`RELAY`] payload.
    pub fn encode(&self, codec: &dyn PacketCodec) -> std::result::Result<Bytes, CodecError> {
        let inner = codec.encode(&self.packet)?;
        let mut dst = BytesMut::with_capacity(DESTINATION_LEN + inner.len());
        dst.put_slice(self.to.as_bytes());
        dst.put_slice(&inner);
        Ok(dst.freeze())
    }

    /// Decode a [`RELAY`] payload.
    pub fn decode(
        codec: &dyn PacketCodec,
        mut payload: Bytes,
    ) -> std::result::Result<Self, CodecError> {
        if payload.len() < DESTINATION_LEN {
            return Err(CodecError::Truncated {
                field: "relay destination",
            });
        }
        let head = payload.split_to(DESTINATION_LEN);
        let mut raw = [0u8; DESTINATION_LEN];
        raw.copy_from_slice(&head);
        Ok(Self {
            to: Uuid::from_bytes(raw),
            packet: codec.decode(payload)?,
        })
    }
}

/// Forward `packet` to `to` as coming from `from`.
///
/// The forwarded copy is one-way: its correlation is cleared.
pub(crate) fn forward(
    registry: &ConnectionRegistry,
    from: &Identity,
    to: Uuid,
    mut packet: Packet,
) -> Result<()> {
    let Some(destination) = registry.get(&to) else {
        warn!(
            from = %from.id,
            to = %to,
            packet_type = %packet.packet_type,
            "relay destination not connected"
        );
        return Err(PeerError::RelayDestinationUnreachable(to));
    };

    packet.sender_id = from.id;
    packet.sender_username = from.username.clone();
    packet.correlation = None;

    let packet_type = packet.packet_type.clone();
    destination.send(packet).map_err(|err| match err {
        PeerError::NotConnected => PeerError::RelayDestinationUnreachable(to),
        other => other,
    })?;
    debug!(from = %from.id, to = %to, %packet_type, "relayed packet");
    Ok(())
}

/// Install the server's [`RELAY`] handler.
pub(crate) fn install_relay_handler(
    handlers: &mut HandlerMap,
    registry: Arc<ConnectionRegistry>,
    codec: Arc<dyn PacketCodec>,
) {
    let relay = move |packet: &Packet, ctx: &HandlerContext<'_>| -> HandlerResult {
        let correlated = matches!(packet.correlation, Some(Correlation::Request(_)));
        let request = match RelayRequest::decode(codec.as_ref(), packet.payload.clone()) {
            Ok(request) => request,
            Err(err) => {
                warn!(
                    connection_id = %ctx.connection().id(),
                    error = %err,
                    "malformed relay request"
                );
                ctx.reply(packet, RELAY_REJECTED, err.to_string())?;
                return Ok(());
            }
        };

        let origin = Identity::new(ctx.connection().id(), ctx.connection().username());
        let to = request.to;
        let (answer, body) = match forward(&registry, &origin, to, request.packet) {
            Ok(()) => (RELAY_OK, Bytes::new()),
            Err(PeerError::RelayDestinationUnreachable(_)) => {
                (RELAY_UNREACHABLE, Bytes::copy_from_slice(to.as_bytes()))
            }
            Err(err) => (RELAY_REJECTED, Bytes::from(err.to_string())),
        };
        if correlated || answer != RELAY_OK {
            ctx.reply(packet, answer, body)?;
        }
        Ok(())
    };
    handlers.register_builtin(RELAY, relay);
}

/// Install client handlers that log relay failures arriving as plain packets.
///
/// Correlated answers never get here; they resolve the waiting request.
pub(crate) fn install_relay_failure_log(handlers: &mut HandlerMap) {
    let unreachable = |packet: &Packet, ctx: &HandlerContext<'_>| -> HandlerResult {
        let to = Uuid::from_slice(&packet.payload).unwrap_or_default();
        warn!(connection_id = %ctx.connection().id(), %to, "relay destination not connected");
        Ok(())
    };
    let rejected = |packet: &Packet, ctx: &HandlerContext<'_>| -> HandlerResult {
        warn!(
            connection_id = %ctx.connection().id(),
            reason = %String::from_utf8_lossy(&packet.payload),
            "relay rejected by server"
        );
        Ok(())
    };
    handlers.register_builtin(RELAY_UNREACHABLE, unreachable);
    handlers.register_builtin(RELAY_REJECTED, rejected);
}
