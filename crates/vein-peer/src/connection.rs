//! One duplex stream presented as a packet-level API.
//!
//! Each started connection owns two threads. The read loop feeds frames to
//! the codec and the [`Dispatcher`], one packet at a time. The write loop
//! drains an ordered outbound queue, so [`Connection::send`] only enqueues
//! and concurrent senders never interleave partial frames.

use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;
use vein_frame::{FrameConfig, FrameError, FrameReader, FrameWriter, DEFAULT_MAX_PAYLOAD};
use vein_transport::NetStream;

use crate::codec::PacketCodec;
use crate::correlation::{deadline_after, CorrelationTable, Reply, RequestContext};
use crate::dispatcher::Dispatcher;
use crate::error::{PeerError, Result};
use crate::handshake::HandshakeConfig;
use crate::packet::{Correlation, Packet};

/// Lifecycle of a connection. No transition leaves `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, loops not running yet.
    Connecting,
    /// Handshake done, loops running.
    Connected,
    /// Shutting down; no new sends are accepted.
    Closing,
    /// The read loop has exited and the stream is closed.
    Disconnected,
}

/// Why a connection went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` was called on this side.
    Local,
    /// The remote side closed the stream.
    RemoteClosed,
    /// A read or write failed.
    Transport(String),
    /// The remote side sent something that cannot be framed or decoded.
    Protocol(String),
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::Local => f.write_str("closed locally"),
            DisconnectReason::RemoteClosed => f.write_str("closed by remote"),
            DisconnectReason::Transport(err) => write!(f, "transport failure: {err}"),
            DisconnectReason::Protocol(err) => write!(f, "protocol violation: {err}"),
        }
    }
}

/// Per-connection runtime settings.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Largest encoded packet accepted in either direction.
    pub max_payload_size: usize,
    /// Socket write timeout; a stalled peer fails the connection after this.
    pub write_timeout: Option<Duration>,
    /// Disable Nagle's algorithm.
    pub nodelay: bool,
    /// How long a local disconnect keeps flushing already queued packets.
    pub drain_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            write_timeout: Some(Duration::from_secs(10)),
            nodelay: true,
            drain_timeout: Duration::from_secs(2),
        }
    }
}

/// Identity stamped on packets this side originates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: Uuid,
    pub username: String,
}

impl Identity {
    pub fn new(id: Uuid, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
        }
    }
}

type DisconnectCallback = Box<dyn FnOnce(&Connection, &DisconnectReason) + Send>;

struct Lifecycle {
    state: ConnectionState,
    reason: Option<DisconnectReason>,
    notified: bool,
}

struct Inner {
    id: Uuid,
    local: Identity,
    remote_username: String,
    peer_addr: Option<SocketAddr>,
    max_payload_size: usize,
    drain_timeout: Duration,
    drain_deadline: Mutex<Option<Instant>>,
    stream: NetStream,
    codec: Arc<dyn PacketCodec>,
    dispatcher: Arc<Dispatcher>,
    lifecycle: Mutex<Lifecycle>,
    lifecycle_changed: Condvar,
    outbound: Mutex<Option<Sender<Bytes>>>,
    last_activity: Mutex<Instant>,
    on_disconnected: Mutex<Option<DisconnectCallback>>,
}

/// Shared handle to one live (or dead) connection.
///
/// Cloning is cheap; all clones refer to the same connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Wrap `stream`; the caller hands the framed halves to [`Connection::start`].
    pub(crate) fn new(
        id: Uuid,
        local: Identity,
        remote_username: String,
        stream: &NetStream,
        config: &ConnectionConfig,
        codec: Arc<dyn PacketCodec>,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(Inner {
                id,
                local,
                remote_username,
                peer_addr: stream.peer_addr().ok(),
                max_payload_size: config.max_payload_size,
                drain_timeout: config.drain_timeout,
                drain_deadline: Mutex::new(None),
                stream: stream.try_clone()?,
                codec,
                dispatcher,
                lifecycle: Mutex::new(Lifecycle {
                    state: ConnectionState::Connecting,
                    reason: None,
                    notified: false,
                }),
                lifecycle_changed: Condvar::new(),
                outbound: Mutex::new(None),
                last_activity: Mutex::new(Instant::now()),
                on_disconnected: Mutex::new(None),
            }),
        })
    }

    /// Register the notification fired exactly once when the connection ends.
    ///
    /// Replaces any earlier registration. If the connection already ended,
    /// the callback runs immediately on the calling thread.
    pub fn on_disconnected(
        &self,
        callback: impl FnOnce(&Connection, &DisconnectReason) + Send + 'static,
    ) {
        let ended = {
            let life = self.inner.lifecycle.lock();
            if life.notified {
                life.reason.clone()
            } else {
                *self.inner.on_disconnected.lock() = Some(Box::new(callback));
                return;
            }
        };
        let reason = ended.unwrap_or(DisconnectReason::Local);
        callback(self, &reason);
    }

    /// Spawn the read and write loops and move to `Connected`.
    pub(crate) fn start(
        &self,
        reader: FrameReader<NetStream>,
        writer: FrameWriter<NetStream>,
    ) -> Result<()> {
        let (tx, rx) = mpsc::channel();
        {
            let mut life = self.inner.lifecycle.lock();
            if life.state != ConnectionState::Connecting {
                return Err(PeerError::NotConnected);
            }
            *self.inner.outbound.lock() = Some(tx);
            life.state = ConnectionState::Connected;
        }
        self.inner.lifecycle_changed.notify_all();

        let writer_conn = self.clone();
        let spawned = thread::Builder::new()
            .name(thread_name("write", self.id()))
            .spawn(move || write_loop(writer_conn, writer, rx));
        if let Err(err) = spawned {
            self.close(DisconnectReason::Transport(err.to_string()));
            self.finish();
            return Err(PeerError::Spawn(err));
        }

        let reader_conn = self.clone();
        let spawned = thread::Builder::new()
            .name(thread_name("read", self.id()))
            .spawn(move || read_loop(reader_conn, reader));
        if let Err(err) = spawned {
            self.close(DisconnectReason::Transport(err.to_string()));
            self.finish();
            return Err(PeerError::Spawn(err));
        }

        debug!(connection_id = %self.id(), peer = ?self.peer_addr(), "connection started");
        Ok(())
    }

    /// Queue `packet` for delivery and return.
    ///
    /// A nil sender id is stamped with this side's identity. Packets sent on
    /// one connection reach the remote dispatcher in the order sent.
    pub fn send(&self, packet: Packet) -> Result<()> {
        let packet = self.stamp(packet);
        let encoded = self.inner.codec.encode(&packet)?;
        if encoded.len() > self.inner.max_payload_size {
            return Err(PeerError::Frame(FrameError::PayloadTooLarge {
                size: encoded.len(),
                max: self.inner.max_payload_size,
            }));
        }

        {
            let outbound = self.inner.outbound.lock();
            let tx = outbound.as_ref().ok_or(PeerError::NotConnected)?;
            tx.send(encoded).map_err(|_| PeerError::NotConnected)?;
        }

        debug!(
            connection_id = %self.id(),
            packet_type = %packet.packet_type,
            correlation_id = ?packet.correlation_id(),
            "packet queued"
        );
        Ok(())
    }

    /// Send `packet` as a correlated request and block until its reply.
    ///
    /// Fails with `CorrelationTimeout` after `timeout`, or `ConnectionLost`
    /// as soon as this connection goes away. Must not be called from a
    /// handler running on this same connection.
    pub fn send_and_await_reply(&self, packet: Packet, timeout: Duration) -> Result<Reply> {
        let mut packet = self.stamp(packet);
        let pending =
            self.table()
                .begin_request(self.id(), RequestContext::of(&packet), timeout);
        packet.correlation = Some(Correlation::Request(pending.correlation_id()));

        if !self.is_connected() {
            return Err(PeerError::NotConnected);
        }
        self.send(packet)?;
        pending.wait()
    }

    /// Close the connection. Idempotent.
    ///
    /// Packets already queued are flushed before the stream closes; pending
    /// requests on this connection fail with `ConnectionLost` right away.
    pub fn disconnect(&self) {
        self.close(DisconnectReason::Local);
    }

    /// Block until the read loop has exited, up to `timeout`.
    ///
    /// Returns whether the connection reached `Disconnected`. Must not be
    /// called from a handler running on this connection.
    pub fn wait_disconnected(&self, timeout: Duration) -> bool {
        let mut life = self.inner.lifecycle.lock();
        let _ = self.inner.lifecycle_changed.wait_while_for(
            &mut life,
            |life| life.state != ConnectionState::Disconnected,
            timeout,
        );
        life.state == ConnectionState::Disconnected
    }

    /// Connection identifier, shared by both ends.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Identity stamped on packets originated through this connection.
    pub fn local_identity(&self) -> &Identity {
        &self.inner.local
    }

    /// Remote socket address, if it was known at creation.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer_addr
    }

    /// Username the remote side announced during the handshake.
    pub fn username(&self) -> &str {
        &self.inner.remote_username
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.inner.lifecycle.lock().state
    }

    /// Why the connection is closing or closed, once known.
    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.inner.lifecycle.lock().reason.clone()
    }

    /// Whether the connection accepts outbound packets.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// When a frame was last read or written.
    pub fn last_activity(&self) -> Instant {
        *self.inner.last_activity.lock()
    }

    fn table(&self) -> &Arc<CorrelationTable> {
        self.inner.dispatcher.table()
    }

    fn stamp(&self, mut packet: Packet) -> Packet {
        if packet.sender_id.is_nil() {
            packet.sender_id = self.inner.local.id;
            packet.sender_username = self.inner.local.username.clone();
        }
        packet
    }

    fn touch(&self) {
        *self.inner.last_activity.lock() = Instant::now();
    }

    /// Move to `Closing`. The first reason wins.
    pub(crate) fn close(&self, reason: DisconnectReason) {
        let graceful = reason == DisconnectReason::Local;
        let never_started = {
            let mut life = self.inner.lifecycle.lock();
            match life.state {
                ConnectionState::Closing | ConnectionState::Disconnected => return,
                state => {
                    life.state = ConnectionState::Closing;
                    life.reason = Some(reason);
                    state == ConnectionState::Connecting
                }
            }
        };
        self.inner.lifecycle_changed.notify_all();

        if graceful && !never_started {
            *self.inner.drain_deadline.lock() = Some(deadline_after(self.inner.drain_timeout));
            if let Err(err) = self.inner.stream.set_write_timeout(Some(self.inner.drain_timeout)) {
                debug!(connection_id = %self.id(), error = %err, "drain timeout not applied");
            }
        }

        // The write loop exits once the queue is drained and the sender gone.
        drop(self.inner.outbound.lock().take());
        self.table().fail_all_for(self.id());

        if never_started {
            self.shutdown_stream();
            self.finish();
        } else if graceful {
            // Wakes the read loop now; the write loop shuts the rest down
            // after draining.
            if let Err(err) = self.inner.stream.shutdown_read() {
                debug!(connection_id = %self.id(), error = %err, "read shutdown failed");
            }
        } else {
            self.shutdown_stream();
        }
    }

    fn drain_expired(&self) -> bool {
        self.inner
            .drain_deadline
            .lock()
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Release everything and move to `Disconnected`. Runs once, from the read loop.
    fn finish(&self) {
        let (reason, callback) = {
            let mut life = self.inner.lifecycle.lock();
            if life.notified {
                return;
            }
            life.notified = true;
            let reason = life.reason.clone().unwrap_or(DisconnectReason::Local);
            (reason, self.inner.on_disconnected.lock().take())
        };

        if reason != DisconnectReason::Local {
            self.shutdown_stream();
        }
        self.table().fail_all_for(self.id());

        info!(
            connection_id = %self.id(),
            peer = ?self.peer_addr(),
            %reason,
            "connection closed"
        );

        if let Some(callback) = callback {
            if catch_unwind(AssertUnwindSafe(|| callback(self, &reason))).is_err() {
                warn!(connection_id = %self.id(), "disconnect callback panicked");
            }
        }

        self.inner.lifecycle.lock().state = ConnectionState::Disconnected;
        self.inner.lifecycle_changed.notify_all();
    }

    fn shutdown_stream(&self) {
        if let Err(err) = self.inner.stream.shutdown() {
            debug!(connection_id = %self.id(), error = %err, "stream shutdown failed");
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("username", &self.inner.remote_username)
            .field("peer_addr", &self.inner.peer_addr)
            .field("state", &self.state())
            .finish()
    }
}

/// Longest single blocking read while the handshake is in progress.
const HANDSHAKE_POLL: Duration = Duration::from_millis(100);

/// Wrap a fresh stream in frame reader/writer halves for the handshake.
///
/// Until [`enter_runtime`] is called the reader accepts at most
/// `max_handshake_payload` bytes per frame and each blocking read returns
/// within a short poll slice, so the handshake deadline is checked often.
pub(crate) fn framed(
    stream: NetStream,
    config: &ConnectionConfig,
    handshake: &HandshakeConfig,
) -> Result<(FrameReader<NetStream>, FrameWriter<NetStream>)> {
    stream.set_nodelay(config.nodelay)?;
    let write_half = stream.try_clone()?;
    let reader = FrameReader::with_config_net(
        stream,
        FrameConfig {
            max_payload_size: handshake.max_handshake_payload.min(config.max_payload_size),
            read_timeout: Some(handshake.timeout.clamp(Duration::from_millis(1), HANDSHAKE_POLL)),
            write_timeout: config.write_timeout,
        },
    )?;
    let writer = FrameWriter::with_config_net(
        write_half,
        FrameConfig {
            max_payload_size: config.max_payload_size,
            read_timeout: None,
            write_timeout: config.write_timeout,
        },
    )?;
    Ok((reader, writer))
}

/// Lift the handshake limits once negotiation succeeded: reads block
/// indefinitely and frames up to the runtime payload cap are accepted.
pub(crate) fn enter_runtime(
    reader: &mut FrameReader<NetStream>,
    config: &ConnectionConfig,
) -> Result<()> {
    reader.set_read_timeout(None)?;
    reader.set_max_payload_size(config.max_payload_size);
    Ok(())
}

fn read_loop(conn: Connection, mut reader: FrameReader<NetStream>) {
    let reason = loop {
        let frame = match reader.read_frame() {
            Ok(frame) => frame,
            Err(FrameError::ConnectionClosed) => break DisconnectReason::RemoteClosed,
            Err(err) if err.is_corrupt() => {
                warn!(connection_id = %conn.id(), error = %err, "corrupt frame stream");
                break DisconnectReason::Protocol(err.to_string());
            }
            Err(err) => break DisconnectReason::Transport(err.to_string()),
        };
        conn.touch();

        if conn.state() != ConnectionState::Connected {
            break DisconnectReason::Local;
        }

        match conn.inner.codec.decode(frame) {
            Ok(packet) => {
                conn.inner.dispatcher.dispatch(packet, &conn);
            }
            Err(err) => {
                warn!(connection_id = %conn.id(), error = %err, "undecodable packet");
                break DisconnectReason::Protocol(err.to_string());
            }
        }
    };

    conn.close(reason);
    conn.finish();
}

fn write_loop(conn: Connection, mut writer: FrameWriter<NetStream>, rx: Receiver<Bytes>) {
    for payload in rx.iter() {
        if conn.drain_expired() {
            warn!(
                connection_id = %conn.id(),
                dropped = rx.try_iter().count() + 1,
                "drain timed out; dropping queued packets"
            );
            break;
        }
        if let Err(err) = writer.send(&payload) {
            warn!(connection_id = %conn.id(), error = %err, "write failed");
            conn.close(DisconnectReason::Transport(err.to_string()));
            conn.shutdown_stream();
            return;
        }
        conn.touch();
    }

    // Queue closed by a local disconnect, flushed or out of drain time.
    let _ = writer.flush();
    conn.shutdown_stream();
}

fn thread_name(role: &str, id: Uuid) -> String {
    let id = id.simple().to_string();
    format!("vein-{role}-{}", &id[..8])
}

#[cfg(test)]
mod tests {
    use std::net::{TcpListener, TcpStream};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use vein_transport::TcpTransport;

    use super::*;
    use crate::codec::BinaryCodec;
    use crate::dispatcher::{HandlerContext, HandlerMap, HandlerResult};

    fn net_pair() -> (NetStream, NetStream) {
        let transport = TcpTransport::bind("127.0.0.1:0").unwrap();
        let addr = transport.local_addr();
        let client = TcpTransport::connect(addr).unwrap();
        let (server, _) = transport.accept().unwrap();
        (client, server)
    }

    fn open(stream: NetStream, id: Uuid, name: &str, handlers: HandlerMap) -> Connection {
        let config = ConnectionConfig::default();
        let table = Arc::new(CorrelationTable::new());
        let dispatcher = Arc::new(Dispatcher::new(handlers, table));
        let conn = Connection::new(
            id,
            Identity::new(Uuid::new_v4(), name),
            "remote".to_string(),
            &stream,
            &config,
            Arc::new(BinaryCodec),
            dispatcher,
        )
        .unwrap();
        let (mut reader, writer) = framed(stream, &config, &HandshakeConfig::default()).unwrap();
        enter_runtime(&mut reader, &config).unwrap();
        conn.start(reader, writer).unwrap();
        conn
    }

    fn echo_handlers() -> HandlerMap {
        let mut handlers = HandlerMap::new();
        handlers.register("ECHO", |packet: &Packet, ctx: &HandlerContext<'_>| -> HandlerResult {
            ctx.reply(packet, "ECHO", packet.payload.clone())?;
            Ok(())
        });
        handlers
    }

    fn pair(a: HandlerMap, b: HandlerMap) -> (Connection, Connection) {
        let (left, right) = net_pair();
        let id = Uuid::new_v4();
        (open(left, id, "alice", a), open(right, id, "bob", b))
    }

    #[test]
    fn request_reply_roundtrip() {
        let (client, server) = pair(HandlerMap::new(), echo_handlers());
        assert!(client.is_connected());

        let reply = client
            .send_and_await_reply(Packet::new("ECHO", "hello"), Duration::from_secs(2))
            .unwrap();
        assert_eq!(reply.payload().as_ref(), b"hello");
        assert_eq!(reply.request.packet_type, "ECHO");
        assert_eq!(reply.request.sender_username, "alice");
        assert_eq!(reply.packet.sender_username, "bob");

        client.disconnect();
        assert!(server.wait_disconnected(Duration::from_secs(2)));
    }

    #[test]
    fn sends_arrive_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut handlers = HandlerMap::new();
        let sink = Arc::clone(&seen);
        handlers.register("SEQ", move |packet: &Packet, _: &HandlerContext<'_>| -> HandlerResult {
            sink.lock().push(packet.payload.clone());
            Ok(())
        });
        let (client, server) = pair(HandlerMap::new(), handlers);

        for i in 0..200u32 {
            client.send(Packet::new("SEQ", i.to_be_bytes().to_vec())).unwrap();
        }
        client.disconnect();
        assert!(server.wait_disconnected(Duration::from_secs(5)));

        let seen = seen.lock();
        assert_eq!(seen.len(), 200);
        for (i, payload) in seen.iter().enumerate() {
            assert_eq!(payload.as_ref(), (i as u32).to_be_bytes());
        }
    }

    #[test]
    fn disconnect_is_idempotent_and_notifies_once() {
        let (client, _server) = pair(HandlerMap::new(), HandlerMap::new());
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        client.on_disconnected(move |_, reason| {
            assert_eq!(*reason, DisconnectReason::Local);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        client.disconnect();
        client.disconnect();
        assert!(client.wait_disconnected(Duration::from_secs(2)));
        client.disconnect();

        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(matches!(
            client.send(Packet::new("X", "")),
            Err(PeerError::NotConnected)
        ));
    }

    #[test]
    fn remote_close_is_reported() {
        let (client, server) = pair(HandlerMap::new(), HandlerMap::new());
        server.disconnect();

        assert!(client.wait_disconnected(Duration::from_secs(2)));
        assert_eq!(
            client.disconnect_reason(),
            Some(DisconnectReason::RemoteClosed)
        );
    }

    #[test]
    fn pending_request_fails_fast_on_disconnect() {
        let (client, _server) = pair(HandlerMap::new(), HandlerMap::new());
        let waiter = {
            let client = client.clone();
            thread::spawn(move || {
                let started = Instant::now();
                let result =
                    client.send_and_await_reply(Packet::new("NOBODY", ""), Duration::from_secs(30));
                (result, started.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(50));
        client.disconnect();

        let (result, elapsed) = waiter.join().unwrap();
        assert!(matches!(result, Err(PeerError::ConnectionLost)));
        assert!(elapsed < Duration::from_secs(2));
    }

    #[test]
    fn local_disconnect_is_prompt_while_peer_stalls() {
        let mut stalling = HandlerMap::new();
        stalling.register("STALL", |_: &Packet, _: &HandlerContext<'_>| -> HandlerResult {
            thread::sleep(Duration::from_secs(4));
            Ok(())
        });
        let (client, _server) = pair(HandlerMap::new(), stalling);

        client.send(Packet::new("STALL", "")).unwrap();
        let chunk = vec![0u8; 1024 * 1024];
        for _ in 0..40 {
            client.send(Packet::new("BULK", chunk.clone())).unwrap();
        }
        thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        client.disconnect();
        assert!(client.wait_disconnected(Duration::from_secs(1)));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(client.disconnect_reason(), Some(DisconnectReason::Local));
    }

    #[test]
    fn garbage_bytes_close_with_protocol_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let raw = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            use std::io::Write;
            // Length prefix far beyond the maximum payload.
            socket.write_all(&[0xFF, 0xFF, 0xFF, 0xFF, 1, 2, 3]).unwrap();
            socket
        });

        let stream = TcpTransport::connect(addr).unwrap();
        let conn = open(stream, Uuid::new_v4(), "alice", HandlerMap::new());
        let _socket: TcpStream = raw.join().unwrap();

        assert!(conn.wait_disconnected(Duration::from_secs(2)));
        assert!(matches!(
            conn.disconnect_reason(),
            Some(DisconnectReason::Protocol(_))
        ));
    }

    #[test]
    fn oversized_packet_rejected_before_queueing() {
        let (left, right) = net_pair();
        let config = ConnectionConfig {
            max_payload_size: 64,
            ..ConnectionConfig::default()
        };
        let dispatcher = Arc::new(Dispatcher::new(
            HandlerMap::new(),
            Arc::new(CorrelationTable::new()),
        ));
        let conn = Connection::new(
            Uuid::new_v4(),
            Identity::new(Uuid::new_v4(), ""),
            String::new(),
            &left,
            &config,
            Arc::new(BinaryCodec),
            dispatcher,
        )
        .unwrap();
        let (mut reader, writer) = framed(left, &config, &HandshakeConfig::default()).unwrap();
        enter_runtime(&mut reader, &config).unwrap();
        conn.start(reader, writer).unwrap();

        let err = conn.send(Packet::new("BIG", vec![0u8; 128])).unwrap_err();
        assert!(matches!(
            err,
            PeerError::Frame(FrameError::PayloadTooLarge { max: 64, .. })
        ));
        assert!(conn.is_connected());
        drop(right);
    }

    #[test]
    fn disconnect_before_start_finishes_immediately() {
        let (left, _right) = net_pair();
        let dispatcher = Arc::new(Dispatcher::new(
            HandlerMap::new(),
            Arc::new(CorrelationTable::new()),
        ));
        let conn = Connection::new(
            Uuid::new_v4(),
            Identity::new(Uuid::new_v4(), ""),
            String::new(),
            &left,
            &ConnectionConfig::default(),
            Arc::new(BinaryCodec),
            dispatcher,
        )
        .unwrap();
        assert_eq!(conn.state(), ConnectionState::Connecting);

        conn.disconnect();
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        let (reader, writer) =
            framed(left, &ConnectionConfig::default(), &HandshakeConfig::default()).unwrap();
        assert!(matches!(conn.start(reader, writer), Err(PeerError::NotConnected)));
    }

    #[test]
    fn reason_display() {
        assert_eq!(DisconnectReason::Local.to_string(), "closed locally");
        assert_eq!(
            DisconnectReason::Protocol("bad".into()).to_string(),
            "protocol violation: bad"
        );
    }
}
