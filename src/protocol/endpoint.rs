//! # Network Endpoint
//!
//! The per-node object bound to the transport. It owns the pending and
//! established directories, allocates cookies, demultiplexes inbound packets
//! and prunes connections whose peer has left the session.
//!
//! ## Inbound dispatch
//! 1. Parse the envelope. Failures are logged and the packet dropped.
//! 2. `SYN` with cookie 0 is a connection request, unless it is our own
//!    request echoed back by the transport.
//! 3. Otherwise look the key `(sender, cookie)` up in the established
//!    directory, then in the pending one.
//! 4. Anything else is an echo of our own traffic or stale, and is dropped.
//!
//! Nothing raised while handling a received packet escapes
//! [`Endpoint::handle_message`]; explicit calls such as [`Endpoint::open`]
//! and [`Endpoint::send`] return typed errors.
//!
//! ## Example
//! ```rust
//! use peerlink::config::EndpointConfig;
//! use peerlink::protocol::endpoint::Endpoint;
//! use peerlink::protocol::types::PeerId;
//! use peerlink::transport::local::LocalNetwork;
//! use peerlink::utils::cookies::CookieJar;
//!
//! let net = LocalNetwork::new();
//! let jar = CookieJar::with_seed(1);
//! let config = EndpointConfig::default();
//! let (client_tx, mut client_rx) = net.attach(PeerId(1));
//! let (server_tx, mut server_rx) = net.attach(PeerId(2));
//! let mut client = Endpoint::new(&config, client_tx, jar.clone()).unwrap();
//! let mut server = Endpoint::new(&config, server_tx, jar).unwrap();
//!
//! client.open(PeerId(2)).unwrap();
//! // Pump until both inboxes are quiet.
//! loop {
//!     let mut moved = false;
//!     while let Ok(bytes) = server_rx.try_recv() {
//!         server.handle_message(&bytes);
//!         moved = true;
//!     }
//!     while let Ok(bytes) = client_rx.try_recv() {
//!         client.handle_message(&bytes);
//!         moved = true;
//!     }
//!     if !moved {
//!         break;
//!     }
//! }
//!
//! assert!(client.is_established(PeerId(2)));
//! assert!(server.is_established(PeerId(1)));
//! ```

use crate::config::EndpointConfig;
use crate::core::packet::{check_size, Opcode, OutgoingPacket, PacketBody, PacketHeader, SynBody};
use crate::core::wire::{self, Serializable};
use crate::error::{ProtocolError, Result};
use crate::protocol::connection::{Connection, DataHandler};
use crate::protocol::directory::ConnectionDirectory;
use crate::protocol::handshake::{self, EstablishedStep, HandshakeState, PendingStep};
use crate::protocol::types::{ConnectionKey, Cookie, PeerId};
use crate::transport::{PeerRoster, Transport};
use crate::utils::cookies::CookieJar;
use crate::utils::metrics::Metrics;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, trace, warn};

/// Subscriber fired after every promotion to established.
pub type CompletionHandler = Box<dyn FnMut(&Connection) + Send>;

/// Cancellation handle returned by the subscribe calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    id: u64,
    /// `None` for endpoint-level subscriptions.
    scope: Option<ConnectionKey>,
}

impl Subscription {
    pub fn connection(&self) -> Option<ConnectionKey> {
        self.scope
    }
}

pub struct Endpoint<T: Transport> {
    config: EndpointConfig,
    transport: T,
    local_id: PeerId,
    cookies: CookieJar,
    pending: ConnectionDirectory,
    established: ConnectionDirectory,
    completion_handlers: BTreeMap<u64, CompletionHandler>,
    payload_handlers: BTreeMap<u64, DataHandler>,
    next_subscription: u64,
    last_cleanup: Instant,
    metrics: Arc<Metrics>,
    closed: bool,
}

impl<T: Transport> Endpoint<T> {
    /// Registers the inbound handler with the transport.
    pub fn new(config: &EndpointConfig, mut transport: T, cookies: CookieJar) -> Result<Self> {
        transport.register_handler(config.message_id)?;
        let local_id = transport.local_id();
        info!(local = %local_id, message_id = config.message_id, "Endpoint up");

        Ok(Self {
            config: config.clone(),
            transport,
            local_id,
            cookies,
            pending: ConnectionDirectory::new(),
            established: ConnectionDirectory::unique(),
            completion_handlers: BTreeMap::new(),
            payload_handlers: BTreeMap::new(),
            next_subscription: 0,
            last_cleanup: Instant::now(),
            metrics: Arc::new(Metrics::new()),
            closed: false,
        })
    }

    /// Report into a shared collector instead of a private one.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn local_id(&self) -> PeerId {
        self.local_id
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(ProtocolError::EndpointClosed);
        }
        Ok(())
    }

    /// Starts a handshake with `peer`, replacing any connection to it.
    #[instrument(skip(self), fields(local = %self.local_id))]
    pub fn open(&mut self, peer: PeerId) -> Result<ConnectionKey> {
        self.ensure_open()?;

        for key in self.established.keys_for(peer) {
            debug!(%key, "Superseding established connection");
            self.metrics.connection_superseded();
            self.dispose(&key);
        }
        for key in self.pending.keys_for(peer) {
            self.dispose(&key);
        }

        let incoming = self.cookies.allocate()?;
        let offer = SynBody { offered: incoming };
        if let Err(e) = self.transmit(peer, &OutgoingPacket::syn(self.local_id, None, &offer), true) {
            self.cookies.release(incoming);
            return Err(e);
        }

        let conn = Connection::requesting(peer, incoming);
        let key = conn.key();
        if let Err(e) = self.pending.insert(conn) {
            self.cookies.release(incoming);
            return Err(e);
        }
        self.metrics.handshake_started();
        debug!(%peer, cookie = %incoming, "Connection requested");
        Ok(key)
    }

    /// Sends a payload, or queues it until the peer's cookie is known.
    pub fn send(&mut self, key: ConnectionKey, message: &dyn Serializable, reliable: bool) -> Result<()> {
        self.ensure_open()?;
        let outgoing = self
            .connection(key)
            .ok_or(ProtocolError::UnknownConnection(key))?
            .outgoing_cookie();

        match outgoing {
            Some(cookie) => {
                let packet = OutgoingPacket::new(
                    Opcode::Payload,
                    self.local_id,
                    Some(cookie),
                    PacketBody::Object(message),
                );
                self.transmit(key.peer, &packet, reliable)
            }
            None => {
                let body = self.encode_queued(message)?;
                if let Some(conn) = self.connection_mut(key) {
                    conn.enqueue(body, reliable);
                    trace!(%key, queued = conn.queued(), "Payload queued until handshake completes");
                }
                Ok(())
            }
        }
    }

    /// Sends over the established connection to `peer`.
    pub fn send_to(&mut self, peer: PeerId, message: &dyn Serializable, reliable: bool) -> Result<()> {
        let key = self
            .established
            .first_for(peer)
            .map(Connection::key)
            .ok_or(ProtocolError::NotConnected(peer))?;
        self.send(key, message, reliable)
    }

    /// Sends to every established connection and returns how many took it.
    ///
    /// The body is encoded and size-checked once. Transport failures for a
    /// single peer are logged and skipped.
    pub fn broadcast(&mut self, message: &dyn Serializable, reliable: bool) -> Result<usize> {
        self.ensure_open()?;
        let body = self.encode_queued(message)?;

        let mut sent = 0;
        for key in self.established.keys() {
            let Some(conn) = self.established.get_mut(&key) else {
                continue;
            };
            let Some(cookie) = conn.outgoing_cookie() else {
                conn.enqueue(body.clone(), reliable);
                sent += 1;
                continue;
            };

            let packet = OutgoingPacket::new(Opcode::Payload, self.local_id, Some(cookie), PacketBody::Raw(&body));
            match self.transmit(key.peer, &packet, reliable) {
                Ok(()) => sent += 1,
                Err(e) => error!(peer = %key.peer, error = %e, "Broadcast send failed"),
            }
        }
        Ok(sent)
    }

    /// Closes a pending or established connection.
    pub fn close(&mut self, key: ConnectionKey) -> bool {
        self.dispose(&key).is_some()
    }

    /// The established connection to `peer`.
    pub fn get(&self, peer: PeerId) -> Option<&Connection> {
        self.established.first_for(peer)
    }

    pub fn is_established(&self, peer: PeerId) -> bool {
        self.established.first_for(peer).is_some()
    }

    /// A connection in either directory.
    pub fn connection(&self, key: ConnectionKey) -> Option<&Connection> {
        self.established.get(&key).or_else(|| self.pending.get(&key))
    }

    fn connection_mut(&mut self, key: ConnectionKey) -> Option<&mut Connection> {
        if self.established.contains(&key) {
            self.established.get_mut(&key)
        } else {
            self.pending.get_mut(&key)
        }
    }

    pub fn established(&self) -> impl Iterator<Item = &Connection> {
        self.established.iter()
    }

    pub fn pending(&self) -> impl Iterator<Item = &Connection> {
        self.pending.iter()
    }

    pub fn established_count(&self) -> usize {
        self.established.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Subscribes to payloads arriving on one connection.
    pub fn subscribe<F>(&mut self, key: ConnectionKey, handler: F) -> Result<Subscription>
    where
        F: FnMut(&Connection, &str) + Send + 'static,
    {
        let id = self.next_subscription;
        let conn = self
            .connection_mut(key)
            .ok_or(ProtocolError::UnknownConnection(key))?;
        conn.add_handler(id, Box::new(handler) as DataHandler);
        self.next_subscription += 1;
        Ok(Subscription { id, scope: Some(key) })
    }

    /// Subscribes to every handshake completion on this endpoint.
    pub fn on_established<F>(&mut self, handler: F) -> Subscription
    where
        F: FnMut(&Connection) + Send + 'static,
    {
        let id = self.next_subscription;
        self.next_subscription += 1;
        self.completion_handlers.insert(id, Box::new(handler));
        Subscription { id, scope: None }
    }

    /// Subscribes to payloads arriving on any established connection.
    ///
    /// Runs after the connection's own subscribers, so it also sees payloads
    /// flushed in the same burst as the handshake.
    pub fn on_payload<F>(&mut self, handler: F) -> Subscription
    where
        F: FnMut(&Connection, &str) + Send + 'static,
    {
        let id = self.next_subscription;
        self.next_subscription += 1;
        self.payload_handlers.insert(id, Box::new(handler));
        Subscription { id, scope: None }
    }

    /// False if the subscription or its connection is already gone.
    pub fn unsubscribe(&mut self, subscription: Subscription) -> bool {
        match subscription.scope {
            Some(key) => self
                .connection_mut(key)
                .is_some_and(|conn| conn.remove_handler(subscription.id)),
            None => {
                self.completion_handlers.remove(&subscription.id).is_some()
                    || self.payload_handlers.remove(&subscription.id).is_some()
            }
        }
    }

    /// Entry point for bytes delivered by the transport. Never fails.
    pub fn handle_message(&mut self, bytes: &[u8]) {
        if self.closed {
            trace!(size = bytes.len(), "Endpoint closed, message ignored");
            return;
        }
        self.metrics.packet_received(bytes.len());

        if bytes.len() > self.config.max_packet_size {
            self.metrics.packet_malformed();
            warn!(size = bytes.len(), limit = self.config.max_packet_size, "Oversized packet dropped");
            return;
        }

        if let Err(e) = self.dispatch(bytes) {
            if e.is_malformed() {
                self.metrics.packet_malformed();
                warn!(error = %e, size = bytes.len(), "Malformed packet dropped");
            } else if e.is_anomaly() {
                self.metrics.anomaly();
                warn!(error = %e, "Protocol anomaly");
            } else {
                error!(error = %e, "Failed to handle packet");
            }
        }
    }

    fn dispatch(&mut self, bytes: &[u8]) -> Result<()> {
        let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)?;
        if self.config.trace_packets {
            trace!(packet = %text, "Packet received");
        }
        let header = PacketHeader::parse(text)?;

        if header.opcode == Opcode::Syn && header.cookie == 0 {
            let offered = header.syn_offer()?;
            if self.config.loopback_filter && header.sender == self.local_id && self.owns_cookie(offered) {
                trace!(cookie = %offered, "Ignoring our own connection request");
                self.metrics.packet_dropped();
                return Ok(());
            }
            return self.accept(header.sender, offered);
        }

        let Some(cookie) = header.cookie() else {
            trace!(peer = %header.sender, opcode = ?header.opcode, "Dropping packet without cookie");
            self.metrics.packet_dropped();
            return Ok(());
        };

        let key = ConnectionKey::new(header.sender, cookie);
        if self.established.contains(&key) {
            self.on_established_packet(key, &header)
        } else if self.pending.contains(&key) {
            self.on_pending_packet(key, &header)
        } else {
            // The transport shows us our own traffic when a local player is present.
            trace!(%key, opcode = ?header.opcode, "Dropping packet for unknown connection");
            self.metrics.packet_dropped();
            Ok(())
        }
    }

    fn owns_cookie(&self, cookie: Cookie) -> bool {
        self.pending
            .iter()
            .chain(self.established.iter())
            .any(|conn| conn.incoming_cookie() == cookie)
    }

    /// Answers a connection request with our own SYN.
    ///
    /// A repeated request re-sends the reply of the connection it already
    /// created, so retransmissions never grow the pending set.
    fn accept(&mut self, peer: PeerId, offered: Cookie) -> Result<()> {
        if let Some(incoming) = self.responding_to(peer, offered) {
            trace!(%peer, cookie = %incoming, "Repeated connection request, replying again");
            let offer = SynBody { offered: incoming };
            return self.transmit(peer, &OutgoingPacket::syn(self.local_id, Some(offered), &offer), true);
        }

        let incoming = self.cookies.allocate()?;
        let offer = SynBody { offered: incoming };
        if let Err(e) = self.transmit(peer, &OutgoingPacket::syn(self.local_id, Some(offered), &offer), true) {
            self.cookies.release(incoming);
            return Err(e);
        }

        if let Err(e) = self.pending.insert(Connection::responding(peer, incoming, offered)) {
            self.cookies.release(incoming);
            return Err(e);
        }
        debug!(%peer, cookie = %incoming, "Connection request accepted");
        Ok(())
    }

    fn responding_to(&self, peer: PeerId, offered: Cookie) -> Option<Cookie> {
        self.pending
            .keys_for(peer)
            .into_iter()
            .filter_map(|key| self.pending.get(&key))
            .find(|conn| conn.state() == HandshakeState::Responding && conn.outgoing_cookie() == Some(offered))
            .map(Connection::incoming_cookie)
    }

    fn on_pending_packet(&mut self, key: ConnectionKey, header: &PacketHeader<'_>) -> Result<()> {
        let state = self
            .pending
            .get(&key)
            .ok_or(ProtocolError::UnknownConnection(key))?
            .state();

        match handshake::pending_step(state, header)? {
            PendingStep::Confirm { offered } => {
                self.confirm(key, offered);
                self.complete(key)
            }
            PendingStep::Promote { deliver } => {
                self.complete(key)?;
                if deliver {
                    self.deliver(key, header.body);
                }
                Ok(())
            }
        }
    }

    fn on_established_packet(&mut self, key: ConnectionKey, header: &PacketHeader<'_>) -> Result<()> {
        let outgoing = self.established.get(&key).and_then(Connection::outgoing_cookie);
        match handshake::established_step(outgoing, header)? {
            EstablishedStep::Deliver => self.deliver(key, header.body),
            EstablishedStep::AdoptCookie { offered } => self.confirm(key, offered),
        }
        Ok(())
    }

    /// Learns the peer's cookie, ACKs it and flushes the queue.
    fn confirm(&mut self, key: ConnectionKey, offered: Cookie) {
        let Some(conn) = self.connection_mut(key) else {
            return;
        };
        conn.adopt(offered);

        if let Err(e) = self.transmit(key.peer, &OutgoingPacket::ack(self.local_id, offered), true) {
            warn!(%key, error = %e, "Failed to send ACK");
        }
        self.flush(key, offered);
    }

    fn flush(&mut self, key: ConnectionKey, cookie: Cookie) {
        let Some(queue) = self.connection_mut(key).map(Connection::take_queue) else {
            return;
        };
        if queue.is_empty() {
            return;
        }

        debug!(%key, count = queue.len(), "Flushing queued payloads");
        for queued in queue {
            let packet = OutgoingPacket::new(
                Opcode::Payload,
                self.local_id,
                Some(cookie),
                PacketBody::Raw(&queued.body),
            );
            if let Err(e) = self.transmit(key.peer, &packet, queued.reliable) {
                error!(%key, error = %e, "Failed to send queued payload");
            }
        }
    }

    /// Moves a pending connection to established, replacing every other
    /// connection to the same peer.
    fn complete(&mut self, key: ConnectionKey) -> Result<()> {
        let mut conn = self
            .pending
            .remove(&key)
            .ok_or(ProtocolError::UnknownConnection(key))?;
        conn.promote();

        for other in self.pending.keys_for(key.peer) {
            self.dispose(&other);
        }
        for old in self.established.keys_for(key.peer) {
            info!(peer = %key.peer, old = %old.incoming, new = %key.incoming, "Superseding established connection");
            self.metrics.connection_superseded();
            self.dispose(&old);
        }

        self.established.insert(conn)?;
        self.metrics.handshake_completed();
        info!(peer = %key.peer, cookie = %key.incoming, "Connection established");

        let mut handlers = std::mem::take(&mut self.completion_handlers);
        if let Some(conn) = self.established.get(&key) {
            for handler in handlers.values_mut() {
                handler(conn);
            }
        }
        self.completion_handlers = handlers;
        Ok(())
    }

    fn deliver(&mut self, key: ConnectionKey, body: &str) {
        let Some(conn) = self.established.get_mut(&key) else {
            return;
        };
        conn.deliver(body);
        if self.payload_handlers.is_empty() {
            return;
        }

        let mut handlers = std::mem::take(&mut self.payload_handlers);
        if let Some(conn) = self.established.get(&key) {
            for handler in handlers.values_mut() {
                handler(conn, body);
            }
        }
        self.payload_handlers = handlers;
    }

    /// Removes a connection, releases its cookie and drops its subscribers
    /// and queued sends.
    fn dispose(&mut self, key: &ConnectionKey) -> Option<Connection> {
        let mut conn = self.established.remove(key).or_else(|| self.pending.remove(key))?;
        self.cookies.release(conn.incoming_cookie());
        conn.detach();
        self.metrics.connection_closed();
        debug!(%key, state = ?conn.state(), "Connection closed");
        Some(conn)
    }

    /// Encodes a body that may sit in a queue until the peer's cookie is
    /// known, checking it against the widest cookie that could be stamped.
    fn encode_queued(&self, message: &dyn Serializable) -> Result<String> {
        let body = wire::to_string(message);
        let sized = OutgoingPacket::new(Opcode::Payload, self.local_id, None, PacketBody::Raw(&body));
        if let Err(e) = check_size(sized.worst_case_len(), self.config.max_packet_size) {
            self.metrics.oversized_send();
            return Err(e);
        }
        Ok(body)
    }

    fn transmit(&mut self, dest: PeerId, packet: &OutgoingPacket<'_>, reliable: bool) -> Result<()> {
        let text = packet.encode_checked(self.config.max_packet_size).inspect_err(|e| {
            if matches!(e, ProtocolError::OversizedPacket { .. }) {
                self.metrics.oversized_send();
            }
        })?;
        if self.config.trace_packets {
            trace!(%dest, packet = %text, "Packet sent");
        }

        self.transport
            .send_to(self.config.message_id, text.as_bytes(), dest, reliable)?;
        self.metrics.packet_sent(text.len());
        Ok(())
    }

    /// Closes every connection whose peer is no longer on the roster.
    pub fn clean_connections(&mut self, roster: &dyn PeerRoster) -> usize {
        let stale: Vec<ConnectionKey> = self
            .established
            .iter()
            .chain(self.pending.iter())
            .filter(|conn| !roster.is_present(conn.peer()))
            .map(Connection::key)
            .collect();

        for key in &stale {
            let name = roster.display_name(key.peer);
            info!(peer = %key.peer, name = name.as_deref().unwrap_or("?"), "Dropping connection to departed peer");
            self.metrics.connection_cleaned();
            self.dispose(key);
        }
        stale.len()
    }

    /// Runs roster cleanup once per `cleanup_interval`.
    pub fn update(&mut self, now: Instant, roster: &dyn PeerRoster) -> usize {
        if self.closed || now.saturating_duration_since(self.last_cleanup) < self.config.cleanup_interval {
            return 0;
        }
        self.last_cleanup = now;
        let cleaned = self.clean_connections(roster);
        if cleaned > 0 {
            info!(cleaned, remaining = self.established.len(), "Connection cleanup finished");
        }
        cleaned
    }

    /// Unregisters from the transport, then closes every connection.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.transport.unregister_handler(self.config.message_id);
        self.completion_handlers.clear();
        self.payload_handlers.clear();

        let keys: Vec<ConnectionKey> = self.established.keys().into_iter().chain(self.pending.keys()).collect();
        for key in &keys {
            self.dispose(key);
        }
        info!(local = %self.local_id, closed = keys.len(), "Endpoint shut down");
    }
}

impl<T: Transport> Drop for Endpoint<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<T: Transport> fmt::Debug for Endpoint<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("local_id", &self.local_id)
            .field("pending", &self.pending.len())
            .field("established", &self.established.len())
            .field("closed", &self.closed)
            .finish()
    }
}
