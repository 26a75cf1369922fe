//! Edge case tests for limits, malformed traffic and lifecycle corners

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::Bytes;
use peerlink::config::EndpointConfig;
use peerlink::core::packet::{Opcode, OutgoingPacket, PacketBody, PacketHeader};
use peerlink::core::wire::{self, ObjectSerializer, Serializable};
use peerlink::protocol::handshake::HandshakeState;
use peerlink::transport::local::{LocalNetwork, LocalTransport};
use peerlink::transport::Transport;
use peerlink::utils::cookies::CookieJar;
use peerlink::{Cookie, Endpoint, PeerId, ProtocolError};
use tokio::sync::mpsc::UnboundedReceiver;

struct Text(String);

impl Serializable for Text {
    fn serialize(&self, ser: &mut ObjectSerializer) {
        ser.write_str(&self.0);
    }
}

/// Peer 2, driven by hand: its transport stays attached while this lives.
struct Remote {
    _transport: LocalTransport,
    inbox: UnboundedReceiver<Bytes>,
}

impl Remote {
    fn next_packet(&mut self) -> String {
        String::from_utf8(self.inbox.try_recv().unwrap().to_vec()).unwrap()
    }

    fn is_quiet(&mut self) -> bool {
        self.inbox.try_recv().is_err()
    }
}

/// Endpoint under test (peer 1) plus a scripted peer 2.
fn scripted(config: EndpointConfig) -> (LocalNetwork, Endpoint<LocalTransport>, Remote) {
    let net = LocalNetwork::new();
    let (transport, _inbox) = net.attach(PeerId(1));
    let endpoint = Endpoint::new(&config, transport, CookieJar::with_seed(9)).unwrap();

    let (mut remote, inbox) = net.attach(PeerId(2));
    remote.register_handler(config.message_id).unwrap();
    let remote = Remote {
        _transport: remote,
        inbox,
    };
    (net, endpoint, remote)
}

#[test]
fn test_packet_exactly_at_ceiling() {
    let cookie = Cookie::new(5).unwrap();
    let text = Text("x".repeat(40));
    let packet = OutgoingPacket::new(Opcode::Payload, PeerId(1), Some(cookie), PacketBody::Object(&text));
    let size = packet.encode().len();

    assert!(packet.encode_checked(size).is_ok());
    assert_eq!(
        packet.encode_checked(size - 1).unwrap_err(),
        ProtocolError::OversizedPacket { size, limit: size - 1 }
    );
}

#[test]
fn test_queued_send_checked_against_widest_cookie() {
    let config = EndpointConfig {
        max_packet_size: 128,
        ..EndpointConfig::default()
    };
    let (_net, mut endpoint, _remote) = scripted(config);
    let key = endpoint.open(PeerId(2)).unwrap();

    let worst = |len: usize| {
        let body = wire::to_string(&Text("y".repeat(len)));
        OutgoingPacket::new(Opcode::Payload, PeerId(1), None, PacketBody::Raw(&body)).worst_case_len()
    };
    let fits = (0..128).rev().find(|&len| worst(len) <= 128).unwrap();

    endpoint.send(key, &Text("y".repeat(fits)), true).unwrap();
    let err = endpoint.send(key, &Text("y".repeat(fits + 1)), true).unwrap_err();
    assert!(matches!(err, ProtocolError::OversizedPacket { limit: 128, .. }));
    assert_eq!(endpoint.connection(key).unwrap().queued(), 1);
}

#[test]
fn test_empty_payload_string_survives() {
    let (_net, mut endpoint, mut remote) = scripted(EndpointConfig::default());
    let key = endpoint.open(PeerId(2)).unwrap();
    let _syn = remote.next_packet();

    endpoint.send(key, &Text(String::new()), true).unwrap();
    endpoint.handle_message(format!("{{ 0 2 {} {{ 31337 }} }}", key.incoming.get()).as_bytes());

    assert_eq!(remote.next_packet(), "{ 1 1 31337 }");
    let flushed = remote.next_packet();
    let header = PacketHeader::parse(&flushed).unwrap();
    assert_eq!(header.body, r#"{ "" }"#);
}

#[test]
fn test_malformed_handshake_packets() {
    let (_net, mut endpoint, mut remote) = scripted(EndpointConfig::default());
    for packet in [
        "{ 0 2 0 }",
        "{ 0 2 0 N }",
        "{ 0 2 0 { } }",
        "{ 0 2 0 { -1 } }",
        "{ 0 2 0 { 12 } trailing",
        "{ 0 2 0 { 12 } } junk",
        "{ 3 2 0 }",
        "{ 0 -2 0 { 12 } }",
        "",
        "{",
    ] {
        endpoint.handle_message(packet.as_bytes());
    }

    assert_eq!(endpoint.pending_count(), 0);
    assert!(remote.is_quiet());
    let snapshot = endpoint.metrics().snapshot();
    assert_eq!(snapshot.packets_received, 10);
    assert_eq!(snapshot.packets_malformed + snapshot.anomalies, 10);
}

#[test]
fn test_ack_with_foreign_cookie_is_ignored() {
    let (_net, mut endpoint, mut remote) = scripted(EndpointConfig::default());
    let key = endpoint.open(PeerId(2)).unwrap();
    let _syn = remote.next_packet();

    let forged = key.incoming.get().wrapping_add(1).max(1);
    endpoint.handle_message(format!("{{ 1 2 {forged} }}").as_bytes());
    endpoint.handle_message(format!("{{ 1 3 {} }}", key.incoming.get()).as_bytes());

    assert_eq!(endpoint.connection(key).unwrap().state(), HandshakeState::Requesting);
    assert_eq!(endpoint.metrics().snapshot().packets_dropped, 2);
}

#[test]
fn test_established_rejects_repeat_handshake() {
    let (_net, mut endpoint, mut remote) = scripted(EndpointConfig::default());
    let key = endpoint.open(PeerId(2)).unwrap();
    let _syn = remote.next_packet();
    let syn_reply = format!("{{ 0 2 {} {{ 4242 }} }}", key.incoming.get());
    endpoint.handle_message(syn_reply.as_bytes());
    assert!(endpoint.is_established(PeerId(2)));

    endpoint.handle_message(syn_reply.as_bytes());
    endpoint.handle_message(format!("{{ 1 2 {} }}", key.incoming.get()).as_bytes());

    let conn = endpoint.get(PeerId(2)).unwrap();
    assert_eq!(conn.outgoing_cookie(), Cookie::new(4242));
    assert_eq!(endpoint.metrics().snapshot().anomalies, 2);
}

#[test]
fn test_send_after_shutdown() {
    let (_net, mut endpoint, _remote) = scripted(EndpointConfig::default());
    let key = endpoint.open(PeerId(2)).unwrap();
    endpoint.shutdown();

    assert_eq!(
        endpoint.send(key, &Text("late".into()), true).unwrap_err(),
        ProtocolError::EndpointClosed
    );
    assert_eq!(
        endpoint.broadcast(&Text("late".into()), true).unwrap_err(),
        ProtocolError::EndpointClosed
    );
    assert_eq!(endpoint.cookies().in_use(), 0);
}

#[test]
fn test_open_to_absent_peer_fails_and_releases_cookie() {
    let (_net, mut endpoint, _remote) = scripted(EndpointConfig::default());
    let err = endpoint.open(PeerId(77)).unwrap_err();
    assert!(matches!(err, ProtocolError::TransportError(_)));
    assert_eq!(endpoint.pending_count(), 0);
    assert_eq!(endpoint.cookies().in_use(), 0);
}
