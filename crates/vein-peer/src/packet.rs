use bytes::Bytes;
use uuid::Uuid;

/// Prefix reserved for packet types handled by vein itself.
pub const RESERVED_PREFIX: &str = "vein.";
/// Liveness check; answered with [`PONG`] carrying the same payload.
pub const PING: &str = "vein.ping";
/// Answer to [`PING`].
pub const PONG: &str = "vein.pong";
/// Ask the server to forward an inner packet to another connection.
pub const RELAY: &str = "vein.relay";
/// The server forwarded the relayed packet.
pub const RELAY_OK: &str = "vein.relay.ok";
/// The relay destination is not connected.
pub const RELAY_UNREACHABLE: &str = "vein.relay.unreachable";
/// The relay request could not be decoded.
pub const RELAY_REJECTED: &str = "vein.relay.rejected";

/// Correlation marker carried by a packet.
///
/// Requests and replies share the identifier; the marker tells the receiving
/// dispatcher whether to run a handler or complete a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Correlation {
    /// The sender is waiting for a reply carrying this id.
    Request(Uuid),
    /// This packet answers the request with this id.
    Reply(Uuid),
}

impl Correlation {
    /// The correlation identifier.
    pub fn id(&self) -> Uuid {
        match self {
            Correlation::Request(id) | Correlation::Reply(id) => *id,
        }
    }
}

/// One self-describing message exchanged over a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Message type tag used for handler lookup.
    pub packet_type: String,
    /// Identity of the originating connection. Nil until stamped on send.
    pub sender_id: Uuid,
    /// Username of the originating connection, possibly empty.
    pub sender_username: String,
    /// Request/reply correlation, if any.
    pub correlation: Option<Correlation>,
    /// Opaque application payload.
    pub payload: Bytes,
}

impl Packet {
    /// Create an uncorrelated packet with no sender identity yet.
    pub fn new(packet_type: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            packet_type: packet_type.into(),
            sender_id: Uuid::nil(),
            sender_username: String::new(),
            correlation: None,
            payload: payload.into(),
        }
    }

    /// Set the sender identity.
    pub fn with_sender(mut self, sender_id: Uuid, sender_username: impl Into<String>) -> Self {
        self.sender_id = sender_id;
        self.sender_username = sender_username.into();
        self
    }

    /// Set the correlation marker.
    pub fn with_correlation(mut self, correlation: Correlation) -> Self {
        self.correlation = Some(correlation);
        self
    }

    /// The correlation identifier, whether request or reply.
    pub fn correlation_id(&self) -> Option<Uuid> {
        self.correlation.map(|c| c.id())
    }

    /// Whether this packet answers an earlier request.
    pub fn is_reply(&self) -> bool {
        matches!(self.correlation, Some(Correlation::Reply(_)))
    }

    /// Build the reply to this packet.
    ///
    /// Returns `None` when this packet is not a correlated request.
    pub fn reply(&self, packet_type: impl Into<String>, payload: impl Into<Bytes>) -> Option<Self> {
        match self.correlation {
            Some(Correlation::Request(id)) => {
                Some(Packet::new(packet_type, payload).with_correlation(Correlation::Reply(id)))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_packet_has_no_identity() {
        let packet = Packet::new("CHAT", "hi");
        assert!(packet.sender_id.is_nil());
        assert!(packet.sender_username.is_empty());
        assert!(packet.correlation.is_none());
        assert!(!packet.is_reply());
    }

    #[test]
    fn reply_keeps_request_id() {
        let id = Uuid::new_v4();
        let request = Packet::new("ECHO", "x").with_correlation(Correlation::Request(id));

        let reply = request.reply("ECHO", "y").unwrap();
        assert_eq!(reply.correlation, Some(Correlation::Reply(id)));
        assert!(reply.is_reply());
        assert_eq!(reply.correlation_id(), Some(id));
    }

    #[test]
    fn uncorrelated_packets_cannot_be_replied_to() {
        let packet = Packet::new("ECHO", "x");
        assert!(packet.reply("ECHO", "y").is_none());

        let reply = Packet::new("ECHO", "x").with_correlation(Correlation::Reply(Uuid::new_v4()));
        assert!(reply.reply("ECHO", "y").is_none());
    }

    #[test]
    fn equality_is_structural() {
        let sender = Uuid::new_v4();
        let a = Packet::new("T", "p").with_sender(sender, "alice");
        let b = Packet::new("T", "p").with_sender(sender, "alice");
        assert_eq!(a, b);
    }
}
