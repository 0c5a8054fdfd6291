use std::fmt::Debug;
use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;
use vein_transport::TcpTransport;

use crate::codec::{BinaryCodec, PacketCodec};
use crate::connection::{
    enter_runtime, framed, Connection, ConnectionConfig, DisconnectReason, Identity,
};
use crate::correlation::{CorrelationTable, ExpirySweeper, Reply};
use crate::dispatcher::{install_ping_responder, Dispatcher, Handler, HandlerMap};
use crate::error::{PeerError, Result};
use crate::handshake::{handshake_client_with_config, HandshakeConfig};
use crate::packet::{Packet, PING, PONG, RELAY, RELAY_OK, RELAY_REJECTED, RELAY_UNREACHABLE};
use crate::relay::{install_relay_failure_log, RelayRequest};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Username announced during the handshake. May be empty.
    pub username: String,
    /// Settings for the server connection.
    pub connection: ConnectionConfig,
    /// Handshake negotiation settings.
    pub handshake: HandshakeConfig,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// How long `relay()` waits for the server's acknowledgement.
    pub relay_timeout: Duration,
    /// How often overdue requests are expired.
    pub sweep_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            connection: ConnectionConfig::default(),
            handshake: HandshakeConfig::default(),
            connect_timeout: Duration::from_secs(5),
            relay_timeout: Duration::from_secs(5),
            sweep_interval: Duration::from_millis(50),
        }
    }
}

type DisconnectedCallback = Box<dyn FnOnce(&Connection, &DisconnectReason) + Send>;

/// Builder for [`Client`].
pub struct ClientBuilder {
    config: ClientConfig,
    codec: Arc<dyn PacketCodec>,
    handlers: HandlerMap,
    on_disconnected: Option<DisconnectedCallback>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            codec: Arc::new(BinaryCodec),
            handlers: HandlerMap::new(),
            on_disconnected: None,
        }
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.config.username = username.into();
        self
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_codec(mut self, codec: impl PacketCodec) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Register `handler` for packets the server pushes or relays.
    pub fn register_handler(
        mut self,
        packet_type: impl Into<String>,
        handler: impl Handler,
    ) -> Self {
        self.handlers.register(packet_type, handler);
        self
    }

    /// Called once when the server connection ends, for whatever reason.
    pub fn on_disconnected(
        mut self,
        callback: impl FnOnce(&Connection, &DisconnectReason) + Send + 'static,
    ) -> Self {
        self.on_disconnected = Some(Box::new(callback));
        self
    }

    /// Dial `addr`, perform the handshake and start the connection.
    pub fn connect<A: ToSocketAddrs + Debug>(self, addr: A) -> Result<Client> {
        let config = self.config;
        let stream = TcpTransport::connect_timeout(&addr, config.connect_timeout)?;
        let (mut reader, mut writer) = framed(stream, &config.connection, &config.handshake)?;

        let greeting = match handshake_client_with_config(
            &mut reader,
            &mut writer,
            &config.username,
            &config.handshake,
        ) {
            Ok(greeting) => greeting,
            Err(err) => {
                let _ = reader.get_ref().shutdown();
                return Err(err);
            }
        };
        enter_runtime(&mut reader, &config.connection)?;

        let table = Arc::new(CorrelationTable::new());
        let mut handlers = self.handlers;
        install_ping_responder(&mut handlers);
        install_relay_failure_log(&mut handlers);
        let dispatcher = Arc::new(Dispatcher::new(handlers, Arc::clone(&table)));
        let sweeper = ExpirySweeper::spawn(&table, config.sweep_interval)?;

        let connection = Connection::new(
            greeting.connection_id,
            Identity::new(greeting.connection_id, config.username.clone()),
            String::new(),
            reader.get_ref(),
            &config.connection,
            Arc::clone(&self.codec),
            dispatcher,
        )?;
        if let Some(callback) = self.on_disconnected {
            connection.on_disconnected(callback);
        }
        connection.start(reader, writer)?;

        info!(
            connection_id = %greeting.connection_id,
            server_id = %greeting.server_id,
            addr = ?addr,
            username = %config.username,
            "connected"
        );

        Ok(Client {
            connection,
            server_id: greeting.server_id,
            protocol_version: greeting.protocol_version,
            config,
            codec: self.codec,
            table,
            sweeper: Mutex::new(Some(sweeper)),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A connection to a vein server, able to send, request and relay.
pub struct Client {
    connection: Connection,
    server_id: Uuid,
    protocol_version: String,
    config: ClientConfig,
    codec: Arc<dyn PacketCodec>,
    table: Arc<CorrelationTable>,
    sweeper: Mutex<Option<ExpirySweeper>>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Connect with default settings and `username`.
    pub fn connect<A: ToSocketAddrs + Debug>(addr: A, username: &str) -> Result<Self> {
        ClientBuilder::new().username(username).connect(addr)
    }

    /// The server-assigned identifier, stamped as sender on every packet.
    pub fn id(&self) -> Uuid {
        self.connection.id()
    }

    pub fn server_id(&self) -> Uuid {
        self.server_id
    }

    pub fn username(&self) -> &str {
        &self.config.username
    }

    /// Protocol version agreed during the handshake.
    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    /// The underlying server connection.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Queue a fire-and-forget packet.
    pub fn send(&self, packet: Packet) -> Result<()> {
        self.connection.send(packet)
    }

    /// Send a correlated request and block until its reply or `timeout`.
    pub fn send_and_await_reply(&self, packet: Packet, timeout: Duration) -> Result<Reply> {
        self.connection.send_and_await_reply(packet, timeout)
    }

    /// Ask the server to forward `packet` to client `to`.
    ///
    /// Returns once the server has accepted or refused the relay. The
    /// forwarded copy is one-way; `to` sees this client as its sender.
    pub fn relay(&self, to: Uuid, packet: Packet) -> Result<()> {
        let payload = RelayRequest::new(to, packet).encode(self.codec.as_ref())?;
        let answer = self
            .connection
            .send_and_await_reply(Packet::new(RELAY, payload), self.config.relay_timeout)?;

        match answer.packet_type() {
            RELAY_OK => Ok(()),
            RELAY_UNREACHABLE => Err(PeerError::RelayDestinationUnreachable(to)),
            RELAY_REJECTED => Err(PeerError::Protocol(format!(
                "relay rejected: {}",
                String::from_utf8_lossy(answer.payload())
            ))),
            other => Err(PeerError::Protocol(format!(
                "unexpected relay answer '{other}'"
            ))),
        }
    }

    /// Round-trip a ping through the server.
    pub fn ping(&self, timeout: Duration) -> Result<Duration> {
        let nonce = Uuid::new_v4();
        let started = Instant::now();
        let answer = self.connection.send_and_await_reply(
            Packet::new(PING, Bytes::copy_from_slice(nonce.as_bytes())),
            timeout,
        )?;
        let rtt = started.elapsed();

        if answer.packet_type() != PONG || answer.payload().as_ref() != nonce.as_bytes() {
            return Err(PeerError::Protocol(format!(
                "unexpected ping answer '{}'",
                answer.packet_type()
            )));
        }
        debug!(connection_id = %self.id(), ?rtt, "ping");
        Ok(rtt)
    }

    /// Requests this client is still waiting on.
    pub fn pending_requests(&self) -> usize {
        self.table.len()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Close the connection, flushing queued packets first. Idempotent.
    pub fn disconnect(&self) {
        self.connection.disconnect();
        let grace = self
            .config
            .connection
            .write_timeout
            .unwrap_or(Duration::from_secs(5));
        self.connection.wait_disconnected(grace);
        if let Some(mut sweeper) = self.sweeper.lock().take() {
            sweeper.stop();
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id())
            .field("server_id", &self.server_id)
            .field("username", &self.config.username)
            .field("state", &self.connection.state())
            .finish()
    }
}
