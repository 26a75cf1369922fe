//! Stress tests: many peers on one server

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::Bytes;
use peerlink::config::EndpointConfig;
use peerlink::core::wire::{ObjectSerializer, Serializable};
use peerlink::transport::local::{LocalNetwork, LocalTransport};
use peerlink::utils::cookies::CookieJar;
use peerlink::{Endpoint, PeerId};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;

const PEERS: u64 = 200;

struct Tick(u32);

impl Serializable for Tick {
    fn serialize(&self, ser: &mut ObjectSerializer) {
        ser.write(&self.0);
    }
}

struct Node {
    endpoint: Endpoint<LocalTransport>,
    inbox: UnboundedReceiver<Bytes>,
}

impl Node {
    fn drain(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(bytes) = self.inbox.try_recv() {
            self.endpoint.handle_message(&bytes);
            handled += 1;
        }
        handled
    }
}

fn node(net: &LocalNetwork, id: u64, config: &EndpointConfig) -> Node {
    let (transport, inbox) = net.attach(PeerId(id));
    let endpoint = Endpoint::new(config, transport, CookieJar::with_seed(id)).unwrap();
    Node { endpoint, inbox }
}

fn settle(server: &mut Node, clients: &mut [Node]) {
    loop {
        let mut handled = server.drain();
        for client in clients.iter_mut() {
            handled += client.drain();
        }
        if handled == 0 {
            break;
        }
    }
}

fn connected_swarm(config: &EndpointConfig) -> (LocalNetwork, Node, Vec<Node>) {
    let net = LocalNetwork::new();
    let mut server = node(&net, 0, config);
    let mut clients: Vec<Node> = (1..=PEERS).map(|id| node(&net, id, config)).collect();
    for client in clients.iter_mut() {
        client.endpoint.open(PeerId(0)).unwrap();
    }
    settle(&mut server, &mut clients);
    (net, server, clients)
}

#[test]
fn test_many_clients_connect() {
    let (_net, server, clients) = connected_swarm(&EndpointConfig::default());

    assert_eq!(server.endpoint.established_count(), PEERS as usize);
    assert_eq!(server.endpoint.pending_count(), 0);
    assert!(clients.iter().all(|c| c.endpoint.is_established(PeerId(0))));

    let cookies: HashSet<_> = server.endpoint.established().map(|c| c.incoming_cookie()).collect();
    assert_eq!(cookies.len(), PEERS as usize);
    assert_eq!(server.endpoint.cookies().in_use(), PEERS as usize);

    let snapshot = server.endpoint.metrics().snapshot();
    assert_eq!(snapshot.handshakes_completed, PEERS);
    assert_eq!(snapshot.anomalies, 0);
    assert_eq!(snapshot.packets_malformed, 0);
}

#[test]
fn test_broadcast_reaches_every_client() {
    let (_net, mut server, mut clients) = connected_swarm(&EndpointConfig::default());

    let received = Arc::new(AtomicUsize::new(0));
    for client in clients.iter_mut() {
        let counter = received.clone();
        client.endpoint.on_payload(move |_, _| {
            counter.fetch_add(1, Ordering::Relaxed);
        });
    }

    for round in 0..10 {
        let sent = server.endpoint.broadcast(&Tick(round), false).unwrap();
        assert_eq!(sent, PEERS as usize);
    }
    settle(&mut server, &mut clients);

    assert_eq!(received.load(Ordering::Relaxed), 10 * PEERS as usize);
}

#[test]
fn test_cleanup_releases_departed_peers() {
    let config = EndpointConfig {
        cleanup_interval: Duration::from_secs(1),
        ..EndpointConfig::default()
    };
    let (net, mut server, mut clients) = connected_swarm(&config);

    // Every other client leaves the session.
    let departed = clients.len() / 2;
    let mut index = 0;
    clients.retain(|_| {
        index += 1;
        index % 2 == 0
    });
    assert_eq!(clients.len(), PEERS as usize - departed);

    let now = Instant::now();
    assert_eq!(server.endpoint.update(now, &net), 0);
    let later = now + Duration::from_secs(2);
    assert_eq!(server.endpoint.update(later, &net), departed);
    assert_eq!(server.endpoint.update(later, &net), 0);

    assert_eq!(server.endpoint.established_count(), clients.len());
    assert_eq!(server.endpoint.cookies().in_use(), clients.len());
    assert_eq!(server.endpoint.metrics().snapshot().connections_cleaned, departed as u64);

    // Remaining clients can still reconnect.
    for client in clients.iter_mut().take(10) {
        client.endpoint.open(PeerId(0)).unwrap();
    }
    settle(&mut server, &mut clients);
    assert_eq!(server.endpoint.established_count(), clients.len());
    assert_eq!(server.endpoint.cookies().in_use(), clients.len());
}
