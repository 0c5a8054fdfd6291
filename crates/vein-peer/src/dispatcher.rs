use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, error, warn};

use crate::connection::Connection;
use crate::correlation::CorrelationTable;
use crate::error::Result;
use crate::packet::{Correlation, Packet, PING, PONG, RESERVED_PREFIX};

/// Error type handlers may return; logged at the dispatch boundary.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of a handler invocation.
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// Application callback for packets of one type tag.
///
/// Handlers run on the read loop of the connection the packet arrived on, so
/// packets from one connection are handled one at a time, in order. A handler
/// must not wait for a reply on that same connection: the loop that would
/// deliver the reply is the one it is blocking.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, packet: &Packet, ctx: &HandlerContext<'_>) -> HandlerResult;
}

impl<F> Handler for F
where
    F: Fn(&Packet, &HandlerContext<'_>) -> HandlerResult + Send + Sync + 'static,
{
    fn handle(&self, packet: &Packet, ctx: &HandlerContext<'_>) -> HandlerResult {
        self(packet, ctx)
    }
}

/// What a handler gets to work with besides the packet.
pub struct HandlerContext<'a> {
    connection: &'a Connection,
    origin: Option<Connection>,
}

impl<'a> HandlerContext<'a> {
    /// The connection the packet arrived on.
    pub fn connection(&self) -> &Connection {
        self.connection
    }

    /// The connection the packet is known to have come from.
    ///
    /// On a server this is always the arriving connection. On a client the
    /// sender may be any peer behind the server, so it is `None`.
    pub fn origin(&self) -> Option<&Connection> {
        self.origin.as_ref()
    }

    /// Answer `request` over the arriving connection.
    ///
    /// Correlated requests get a reply carrying their id; uncorrelated ones
    /// get a plain packet back.
    pub fn reply(
        &self,
        request: &Packet,
        packet_type: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Result<()> {
        let packet_type = packet_type.into();
        let payload = payload.into();
        let packet = match request.reply(packet_type.clone(), payload.clone()) {
            Some(reply) => reply,
            None => Packet::new(packet_type, payload),
        };
        self.connection.send(packet)
    }
}

/// Static tag → handler mapping, populated before traffic starts.
#[derive(Clone, Default)]
pub struct HandlerMap {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `packet_type`, replacing any earlier one.
    ///
    /// Types under [`RESERVED_PREFIX`] belong to vein's own control traffic;
    /// registering one is refused with a warning and leaves the map unchanged.
    pub fn register(&mut self, packet_type: impl Into<String>, handler: impl Handler) {
        let packet_type = packet_type.into();
        if packet_type.starts_with(RESERVED_PREFIX) {
            warn!(%packet_type, "packet type is reserved; handler not registered");
            return;
        }
        if self
            .handlers
            .insert(packet_type.clone(), Arc::new(handler))
            .is_some()
        {
            debug!(%packet_type, "handler replaced");
        }
    }

    /// Install one of vein's own handlers for a reserved type.
    pub(crate) fn register_builtin(&mut self, packet_type: &str, handler: impl Handler) {
        self.handlers.insert(packet_type.to_string(), Arc::new(handler));
    }

    /// Look up the handler for a tag.
    pub fn get(&self, packet_type: &str) -> Option<&Arc<dyn Handler>> {
        self.handlers.get(packet_type)
    }

    /// Whether a handler is registered for a tag.
    pub fn contains(&self, packet_type: &str) -> bool {
        self.handlers.contains_key(packet_type)
    }

    /// Number of registered tags.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<&String> = self.handlers.keys().collect();
        tags.sort();
        f.debug_struct("HandlerMap").field("tags", &tags).finish()
    }
}

/// Where a dispatched packet ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A reply completed its pending request.
    Resolved,
    /// A reply arrived for a request that is no longer pending.
    LateReply,
    /// A handler ran to completion.
    Handled,
    /// No handler is registered for the type tag.
    NoHandler,
    /// The handler returned an error or panicked.
    HandlerFault,
}

/// Routes decoded packets to the correlation table or a handler.
pub struct Dispatcher {
    handlers: HandlerMap,
    table: Arc<CorrelationTable>,
    authenticate_senders: bool,
}

impl Dispatcher {
    /// Create a dispatcher over a frozen handler map.
    pub fn new(handlers: HandlerMap, table: Arc<CorrelationTable>) -> Self {
        Self {
            handlers,
            table,
            authenticate_senders: false,
        }
    }

    /// Treat the arriving connection as the only possible sender.
    ///
    /// Servers use this: the sender fields of every inbound packet are
    /// overwritten with the connection's id and username, so a client cannot
    /// speak for another one.
    pub fn authenticating_senders(mut self) -> Self {
        self.authenticate_senders = true;
        self
    }

    /// The correlation table replies are routed to.
    pub fn table(&self) -> &Arc<CorrelationTable> {
        &self.table
    }

    /// The registered handlers.
    pub fn handlers(&self) -> &HandlerMap {
        &self.handlers
    }

    /// Route one packet that arrived on `connection`.
    ///
    /// Never fails: every outcome is local to this packet.
    pub fn dispatch(&self, mut packet: Packet, connection: &Connection) -> Dispatch {
        if self.authenticate_senders {
            packet.sender_id = connection.id();
            packet.sender_username = connection.username().to_string();
        }

        if let Some(Correlation::Reply(id)) = packet.correlation {
            if self.table.resolve(id, packet) {
                return Dispatch::Resolved;
            }
            warn!(
                connection_id = %connection.id(),
                correlation_id = %id,
                "dropping reply with no pending request"
            );
            return Dispatch::LateReply;
        }

        let Some(handler) = self.handlers.get(&packet.packet_type) else {
            warn!(
                connection_id = %connection.id(),
                packet_type = %packet.packet_type,
                "no handler for type {}; dropping packet",
                packet.packet_type
            );
            return Dispatch::NoHandler;
        };

        let ctx = HandlerContext {
            connection,
            origin: self.authenticate_senders.then(|| connection.clone()),
        };

        match catch_unwind(AssertUnwindSafe(|| handler.handle(&packet, &ctx))) {
            Ok(Ok(())) => {
                debug!(
                    connection_id = %connection.id(),
                    packet_type = %packet.packet_type,
                    "packet handled"
                );
                Dispatch::Handled
            }
            Ok(Err(err)) => {
                warn!(
                    connection_id = %connection.id(),
                    packet_type = %packet.packet_type,
                    error = %err,
                    "handler failed; packet dropped"
                );
                Dispatch::HandlerFault
            }
            Err(panic) => {
                error!(
                    connection_id = %connection.id(),
                    packet_type = %packet.packet_type,
                    panic = panic_message(panic.as_ref()),
                    "handler panicked; packet dropped"
                );
                Dispatch::HandlerFault
            }
        }
    }

}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("handlers", &self.handlers)
            .field("pending", &self.table.len())
            .finish()
    }
}

/// Built-in answer to [`PING`].
pub(crate) fn install_ping_responder(handlers: &mut HandlerMap) {
    let pong = |packet: &Packet, ctx: &HandlerContext<'_>| -> HandlerResult {
        ctx.reply(packet, PONG, packet.payload.clone())?;
        Ok(())
    };
    handlers.register_builtin(PING, pong);
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "<non-string panic>"
    }
}
