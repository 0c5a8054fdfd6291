use std::fmt::Debug;
use std::net::{SocketAddr, ToSocketAddrs};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};
use uuid::Uuid;
use vein_transport::{NetStream, TcpTransport};

use crate::codec::{BinaryCodec, PacketCodec};
use crate::connection::{
    enter_runtime, framed, Connection, ConnectionConfig, DisconnectReason, Identity,
};
use crate::correlation::{CorrelationTable, ExpirySweeper};
use crate::dispatcher::{install_ping_responder, Dispatcher, Handler, HandlerMap};
use crate::error::{PeerError, Result};
use crate::handshake::{read_handshake_request, send_handshake_response, HandshakeConfig};
use crate::packet::Packet;
use crate::registry::ConnectionRegistry;
use crate::relay::{forward, install_relay_handler};

/// How long `stop()` waits, in total, for connections to wind down.
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Username stamped on packets the server originates.
    pub username: String,
    /// Settings applied to every accepted connection.
    pub connection: ConnectionConfig,
    /// Handshake negotiation settings.
    pub handshake: HandshakeConfig,
    /// How often overdue requests are expired.
    pub sweep_interval: Duration,
    /// How often the accept loop polls for new sockets and for shutdown.
    pub accept_poll_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            username: "server".to_string(),
            connection: ConnectionConfig::default(),
            handshake: HandshakeConfig::default(),
            sweep_interval: Duration::from_millis(50),
            accept_poll_interval: Duration::from_millis(25),
        }
    }
}

type ConnectedCallback = Arc<dyn Fn(&Connection) + Send + Sync>;
type DisconnectedCallback = Arc<dyn Fn(&Connection, &DisconnectReason) + Send + Sync>;

/// Builder for [`Server`].
///
/// ```no_run
/// use vein_peer::{HandlerContext, HandlerResult, Packet, ServerBuilder};
///
/// let server = ServerBuilder::new()
///     .register_handler("ECHO", |packet: &Packet, ctx: &HandlerContext<'_>| -> HandlerResult {
///         ctx.reply(packet, "ECHO", packet.payload.clone())?;
///         Ok(())
///     })
///     .listen("127.0.0.1:53802")?;
/// println!("listening on {}", server.local_addr());
/// # Ok::<(), vein_peer::PeerError>(())
/// ```
pub struct ServerBuilder {
    config: ServerConfig,
    codec: Arc<dyn PacketCodec>,
    handlers: HandlerMap,
    on_connected: Option<ConnectedCallback>,
    on_disconnected: Option<DisconnectedCallback>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            codec: Arc::new(BinaryCodec),
            handlers: HandlerMap::new(),
            on_connected: None,
            on_disconnected: None,
        }
    }

    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_codec(mut self, codec: impl PacketCodec) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Register `handler` for `packet_type`. Handlers are fixed once listening.
    pub fn register_handler(
        mut self,
        packet_type: impl Into<String>,
        handler: impl Handler,
    ) -> Self {
        self.handlers.register(packet_type, handler);
        self
    }

    /// Called after a client completes its handshake and is registered.
    pub fn on_client_connected(
        mut self,
        callback: impl Fn(&Connection) + Send + Sync + 'static,
    ) -> Self {
        self.on_connected = Some(Arc::new(callback));
        self
    }

    /// Called once per client after it has been removed from the registry.
    pub fn on_client_disconnected(
        mut self,
        callback: impl Fn(&Connection, &DisconnectReason) + Send + Sync + 'static,
    ) -> Self {
        self.on_disconnected = Some(Arc::new(callback));
        self
    }

    /// Bind `addr` and start accepting clients.
    pub fn listen<A: ToSocketAddrs + Debug>(self, addr: A) -> Result<Server> {
        let transport = TcpTransport::bind(addr)?;
        transport.set_nonblocking(true)?;
        let local_addr = transport.local_addr();

        let table = Arc::new(CorrelationTable::new());
        let registry = Arc::new(ConnectionRegistry::new());

        let mut handlers = self.handlers;
        install_ping_responder(&mut handlers);
        install_relay_handler(&mut handlers, Arc::clone(&registry), Arc::clone(&self.codec));
        let dispatcher =
            Arc::new(Dispatcher::new(handlers, Arc::clone(&table)).authenticating_senders());

        let sweeper = ExpirySweeper::spawn(&table, self.config.sweep_interval)?;

        let id = Uuid::new_v4();
        let shared = Arc::new(Shared {
            identity: Identity::new(id, self.config.username.clone()),
            config: self.config,
            codec: self.codec,
            dispatcher,
            registry,
            table,
            running: AtomicBool::new(true),
            on_connected: self.on_connected,
            on_disconnected: self.on_disconnected,
        });

        let accept_shared = Arc::clone(&shared);
        let accept = thread::Builder::new()
            .name("vein-accept".to_string())
            .spawn(move || accept_loop(accept_shared, transport))
            .map_err(PeerError::Spawn)?;

        info!(addr = %local_addr, server_id = %id, "server listening");

        Ok(Server {
            shared,
            local_addr,
            accept: Some(accept),
            sweeper: Some(sweeper),
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct Shared {
    identity: Identity,
    config: ServerConfig,
    codec: Arc<dyn PacketCodec>,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<ConnectionRegistry>,
    table: Arc<CorrelationTable>,
    running: AtomicBool,
    on_connected: Option<ConnectedCallback>,
    on_disconnected: Option<DisconnectedCallback>,
}

/// A listening hub: accepts clients, dispatches their packets and relays between them.
pub struct Server {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    accept: Option<JoinHandle<()>>,
    sweeper: Option<ExpirySweeper>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// The server's own identity, stamped on packets it originates.
    pub fn id(&self) -> Uuid {
        self.shared.identity.id
    }

    /// The bound address (useful after binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether the accept loop is still running.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Forward `packet` to `to`, stamped as sent by `from`.
    ///
    /// `from` may be a connected client or the server itself. Fails with
    /// `RelayDestinationUnreachable` when `to` is not connected.
    pub fn relay(&self, from: Uuid, to: Uuid, packet: Packet) -> Result<()> {
        let origin = if from == self.id() {
            self.shared.identity.clone()
        } else {
            let username = self
                .shared
                .registry
                .get(&from)
                .map(|conn| conn.username().to_string())
                .unwrap_or_default();
            Identity::new(from, username)
        };
        forward(&self.shared.registry, &origin, to, packet)
    }

    /// Send `packet` to every client not in `excluding`. Returns how many were queued.
    pub fn broadcast(&self, packet: &Packet, excluding: &[Uuid]) -> usize {
        self.shared.registry.broadcast(packet, excluding)
    }

    /// Send `packet` to one client.
    pub fn send_to(&self, id: Uuid, packet: Packet) -> Result<()> {
        let connection = self
            .shared
            .registry
            .get(&id)
            .ok_or(PeerError::NotConnected)?;
        connection.send(packet)
    }

    /// The live connection registered under `id`.
    pub fn connection(&self, id: Uuid) -> Option<Connection> {
        self.shared.registry.get(&id)
    }

    pub fn connection_ids(&self) -> Vec<Uuid> {
        self.shared.registry.ids()
    }

    pub fn connection_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Requests the server itself is waiting on.
    pub fn pending_requests(&self) -> usize {
        self.shared.table.len()
    }

    /// Stop accepting, disconnect every client and stop background threads.
    ///
    /// Idempotent. Disconnect notifications have fired by the time this
    /// returns, unless a client took longer than a short grace period.
    pub fn stop(&mut self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) && self.accept.is_none() {
            return;
        }

        if let Some(accept) = self.accept.take() {
            accept.thread().unpark();
            if accept.join().is_err() {
                error!("accept loop panicked");
            }
        }

        let connections = self.shared.registry.snapshot();
        self.shared.registry.disconnect_all();
        let deadline = Instant::now() + STOP_GRACE;
        for connection in &connections {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !connection.wait_disconnected(remaining) {
                warn!(connection_id = %connection.id(), "connection did not close in time");
            }
        }

        if let Some(mut sweeper) = self.sweeper.take() {
            sweeper.stop();
        }

        info!(addr = %self.local_addr, "server stopped");
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("id", &self.id())
            .field("local_addr", &self.local_addr)
            .field("connections", &self.connection_count())
            .field("running", &self.is_running())
            .finish()
    }
}

fn accept_loop(shared: Arc<Shared>, transport: TcpTransport) {
    let poll = shared.config.accept_poll_interval;
    while shared.running.load(Ordering::Acquire) {
        match transport.try_accept() {
            Ok(Some((stream, peer))) => {
                debug!(%peer, "accepted socket");
                let admit_shared = Arc::clone(&shared);
                let spawned = thread::Builder::new()
                    .name("vein-handshake".to_string())
                    .spawn(move || admit(admit_shared, stream, peer));
                if let Err(err) = spawned {
                    warn!(%peer, error = %err, "could not spawn handshake thread");
                }
            }
            Ok(None) => thread::park_timeout(poll),
            Err(err) => {
                warn!(error = %err, "accept failed");
                thread::park_timeout(poll);
            }
        }
    }
    debug!("accept loop exited");
}

fn admit(shared: Arc<Shared>, stream: NetStream, peer: SocketAddr) {
    let connection = match handshake(&shared, stream) {
        Ok(connection) => connection,
        Err(err) => {
            warn!(%peer, error = %err, "client rejected");
            return;
        }
    };

    // Lost a race with stop(): its snapshot may not include this connection.
    if !shared.running.load(Ordering::Acquire) {
        connection.disconnect();
        return;
    }

    info!(
        connection_id = %connection.id(),
        %peer,
        username = connection.username(),
        "client connected"
    );

    if let Some(callback) = &shared.on_connected {
        if catch_unwind(AssertUnwindSafe(|| callback(&connection))).is_err() {
            warn!(connection_id = %connection.id(), "on_client_connected panicked");
        }
    }
}

fn handshake(shared: &Arc<Shared>, stream: NetStream) -> Result<Connection> {
    let config = &shared.config;
    let (mut reader, mut writer) = framed(stream, &config.connection, &config.handshake)?;

    let mut connection_id = Uuid::new_v4();
    while connection_id == shared.identity.id || shared.registry.contains(&connection_id) {
        connection_id = Uuid::new_v4();
    }

    let request = match read_handshake_request(&mut reader, &config.handshake) {
        Ok(request) => request,
        Err(err) => {
            let _ = reader.get_ref().shutdown();
            return Err(err);
        }
    };
    enter_runtime(&mut reader, &config.connection)?;

    let connection = Connection::new(
        connection_id,
        shared.identity.clone(),
        request.username,
        reader.get_ref(),
        &config.connection,
        Arc::clone(&shared.codec),
        Arc::clone(&shared.dispatcher),
    )?;

    // Registered before the client learns its id, so anything the client
    // does with that id can already be routed.
    shared.registry.insert(connection.clone());
    if let Err(err) =
        send_handshake_response(&mut writer, connection_id, shared.identity.id, &config.handshake)
    {
        shared.registry.remove(&connection_id);
        let _ = reader.get_ref().shutdown();
        return Err(err);
    }

    let registry = Arc::clone(&shared.registry);
    let notify = shared.on_disconnected.clone();
    connection.on_disconnected(move |connection, reason| {
        registry.remove(&connection.id());
        info!(connection_id = %connection.id(), %reason, "client disconnected");
        if let Some(notify) = notify {
            notify(connection, reason);
        }
    });

    if let Err(err) = connection.start(reader, writer) {
        shared.registry.remove(&connection_id);
        return Err(err);
    }
    Ok(connection)
}
