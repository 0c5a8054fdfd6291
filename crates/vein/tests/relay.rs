use std::sync::mpsc::{self, Receiver};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vein::peer::DisconnectReason;
use vein::{Client, ClientBuilder, HandlerContext, HandlerResult, Packet, PeerError, ServerBuilder};

/// A client that forwards every `type_tag` packet it receives into a channel.
fn collector(
    addr: std::net::SocketAddr,
    username: &str,
    type_tag: &str,
) -> (Client, Receiver<Packet>) {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let client = ClientBuilder::new()
        .username(username)
        .register_handler(
            type_tag,
            move |packet: &Packet, _: &HandlerContext<'_>| -> HandlerResult {
                tx.lock().map_err(|_| "poisoned")?.send(packet.clone())?;
                Ok(())
            },
        )
        .connect(addr)
        .unwrap();
    (client, rx)
}

#[test]
fn relayed_packet_carries_origin_identity() {
    let server = ServerBuilder::new().listen("127.0.0.1:0").unwrap();
    let alice = Client::connect(server.local_addr(), "alice").unwrap();
    let (bob, inbox) = collector(server.local_addr(), "bob", "CHAT");

    let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
    alice
        .relay(bob.id(), Packet::new("CHAT", payload.clone()))
        .expect("bob is connected");

    let received = inbox.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(received.packet_type, "CHAT");
    assert_eq!(received.sender_id, alice.id());
    assert_eq!(received.sender_username, "alice");
    assert_eq!(received.payload.as_ref(), payload.as_slice());
    assert_eq!(received.correlation, None);
}

#[test]
fn relay_strips_forged_sender_and_correlation() {
    let server = ServerBuilder::new().listen("127.0.0.1:0").unwrap();
    let alice = Client::connect(server.local_addr(), "alice").unwrap();
    let (bob, inbox) = collector(server.local_addr(), "bob", "CHAT");

    let forged = Packet::new("CHAT", "trust me")
        .with_sender(uuid::Uuid::new_v4(), "mallory")
        .with_correlation(vein::peer::Correlation::Request(uuid::Uuid::new_v4()));
    alice.relay(bob.id(), forged).unwrap();

    let received = inbox.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(received.sender_id, alice.id());
    assert_eq!(received.sender_username, "alice");
    assert!(received.correlation.is_none());
}

#[test]
fn relay_to_unknown_destination_is_reported() {
    let server = ServerBuilder::new().listen("127.0.0.1:0").unwrap();
    let alice = Client::connect(server.local_addr(), "alice").unwrap();
    let nobody = uuid::Uuid::new_v4();

    let err = alice.relay(nobody, Packet::new("CHAT", "hello?")).unwrap_err();
    assert!(matches!(err, PeerError::RelayDestinationUnreachable(id) if id == nobody), "{err:?}");
    assert!(alice.is_connected());
}

#[test]
fn relay_to_departed_client_is_reported() {
    let (gone_tx, gone_rx) = mpsc::channel();
    let server = ServerBuilder::new()
        .on_client_disconnected(move |conn, reason: &DisconnectReason| {
            let _ = gone_tx.send((conn.id(), reason.clone()));
        })
        .listen("127.0.0.1:0")
        .unwrap();
    let alice = Client::connect(server.local_addr(), "alice").unwrap();
    let bob = Client::connect(server.local_addr(), "bob").unwrap();
    let bob_id = bob.id();

    drop(bob);
    let (id, reason) = gone_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(id, bob_id);
    assert_eq!(reason, DisconnectReason::RemoteClosed);

    let err = alice.relay(bob_id, Packet::new("CHAT", "")).unwrap_err();
    assert!(matches!(err, PeerError::RelayDestinationUnreachable(_)));
}

#[test]
fn server_relays_on_behalf_of_a_client() {
    let server = ServerBuilder::new().listen("127.0.0.1:0").unwrap();
    let alice = Client::connect(server.local_addr(), "alice").unwrap();
    let (bob, inbox) = collector(server.local_addr(), "bob", "CHAT");

    server
        .relay(alice.id(), bob.id(), Packet::new("CHAT", "via hub"))
        .unwrap();
    let received = inbox.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(received.sender_id, alice.id());
    assert_eq!(received.sender_username, "alice");

    server
        .relay(server.id(), bob.id(), Packet::new("CHAT", "from hub"))
        .unwrap();
    let received = inbox.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(received.sender_id, server.id());
    assert_eq!(received.sender_username, "server");
}

#[test]
fn broadcast_skips_excluded_clients() {
    let server = ServerBuilder::new().listen("127.0.0.1:0").unwrap();
    let (_alice, alice_inbox) = collector(server.local_addr(), "alice", "NEWS");
    let (_bob, bob_inbox) = collector(server.local_addr(), "bob", "NEWS");
    let (carol, carol_inbox) = collector(server.local_addr(), "carol", "NEWS");

    let queued = server.broadcast(&Packet::new("NEWS", "extra"), &[carol.id()]);
    assert_eq!(queued, 2);

    for inbox in [&alice_inbox, &bob_inbox] {
        let packet = inbox.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(packet.payload.as_ref(), b"extra");
        assert_eq!(packet.sender_id, server.id());
    }
    assert!(carol_inbox.recv_timeout(Duration::from_millis(200)).is_err());
}

#[test]
fn server_handlers_see_the_real_sender() {
    let server = ServerBuilder::new()
        .register_handler(
            "WHO",
            |packet: &Packet, ctx: &HandlerContext<'_>| -> HandlerResult {
                let origin = ctx.origin().map(|conn| conn.id()).ok_or("no origin")?;
                let answer = format!("{origin} {} {}", packet.sender_id, packet.sender_username);
                ctx.reply(packet, "WHO", answer)?;
                Ok(())
            },
        )
        .listen("127.0.0.1:0")
        .unwrap();
    let alice = Client::connect(server.local_addr(), "alice").unwrap();
    let bob = Client::connect(server.local_addr(), "bob").unwrap();

    let forged = Packet::new("WHO", "").with_sender(bob.id(), "bob");
    let reply = alice.send_and_await_reply(forged, Duration::from_secs(2)).unwrap();

    assert_eq!(
        String::from_utf8_lossy(reply.payload()),
        format!("{0} {0} alice", alice.id())
    );
    assert!(bob.is_connected());
}

#[test]
fn built_in_relay_cannot_be_replaced() {
    let hijacked = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hijacked);
    let server = ServerBuilder::new()
        .register_handler(
            vein::peer::RELAY,
            move |_: &Packet, _: &HandlerContext<'_>| -> HandlerResult {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        )
        .listen("127.0.0.1:0")
        .unwrap();
    let alice = Client::connect(server.local_addr(), "alice").unwrap();
    let (bob, inbox) = collector(server.local_addr(), "bob", "CHAT");

    alice.relay(bob.id(), Packet::new("CHAT", "still relayed")).unwrap();

    let received = inbox.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(received.payload.as_ref(), b"still relayed");
    assert_eq!(hijacked.load(Ordering::SeqCst), 0);
}
