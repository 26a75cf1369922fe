//! One authenticated channel to one peer.
//!
//! A connection is owned by exactly one of the endpoint's directories and is
//! only ever lent out by reference. While the peer's cookie is unknown,
//! payloads are queued here in send order and flushed once it is learned.

use crate::protocol::handshake::HandshakeState;
use crate::protocol::types::{ConnectionKey, Cookie, PeerId};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;

/// Data-arrival subscriber: the connection and the unparsed payload text.
pub type DataHandler = Box<dyn FnMut(&Connection, &str) + Send>;

/// A payload waiting for the peer's cookie, body already encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct QueuedSend {
    pub(crate) body: String,
    pub(crate) reliable: bool,
}

pub struct Connection {
    peer: PeerId,
    incoming: Cookie,
    outgoing: Option<Cookie>,
    state: HandshakeState,
    queue: VecDeque<QueuedSend>,
    handlers: BTreeMap<u64, DataHandler>,
}

impl Connection {
    /// We initiated; the peer's cookie arrives with its SYN.
    pub(crate) fn requesting(peer: PeerId, incoming: Cookie) -> Self {
        Self::with_state(peer, incoming, None, HandshakeState::Requesting)
    }

    /// The peer initiated and offered `outgoing`.
    pub(crate) fn responding(peer: PeerId, incoming: Cookie, outgoing: Cookie) -> Self {
        Self::with_state(peer, incoming, Some(outgoing), HandshakeState::Responding)
    }

    fn with_state(peer: PeerId, incoming: Cookie, outgoing: Option<Cookie>, state: HandshakeState) -> Self {
        Self {
            peer,
            incoming,
            outgoing,
            state,
            queue: VecDeque::new(),
            handlers: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> ConnectionKey {
        ConnectionKey::new(self.peer, self.incoming)
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// Cookie we chose; the peer stamps it on everything it sends us.
    pub fn incoming_cookie(&self) -> Cookie {
        self.incoming
    }

    /// Cookie the peer chose, once learned.
    pub fn outgoing_cookie(&self) -> Option<Cookie> {
        self.outgoing
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn is_established(&self) -> bool {
        self.state == HandshakeState::Established
    }

    /// Payloads held back until the peer's cookie is known.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub(crate) fn promote(&mut self) {
        self.state = HandshakeState::Established;
    }

    pub(crate) fn adopt(&mut self, outgoing: Cookie) {
        self.outgoing = Some(outgoing);
    }

    pub(crate) fn enqueue(&mut self, body: String, reliable: bool) {
        self.queue.push_back(QueuedSend { body, reliable });
    }

    pub(crate) fn take_queue(&mut self) -> VecDeque<QueuedSend> {
        std::mem::take(&mut self.queue)
    }

    pub(crate) fn add_handler(&mut self, id: u64, handler: DataHandler) {
        self.handlers.insert(id, handler);
    }

    pub(crate) fn remove_handler(&mut self, id: u64) -> bool {
        self.handlers.remove(&id).is_some()
    }

    /// Runs every data-arrival subscriber in subscription order.
    pub(crate) fn deliver(&mut self, body: &str) {
        let mut handlers = std::mem::take(&mut self.handlers);
        for handler in handlers.values_mut() {
            handler(self, body);
        }
        self.handlers = handlers;
    }

    /// Drops subscribers and queued sends.
    pub(crate) fn detach(&mut self) {
        self.handlers.clear();
        self.queue.clear();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("incoming", &self.incoming)
            .field("outgoing", &self.outgoing)
            .field("state", &self.state)
            .field("queued", &self.queue.len())
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn cookie(v: u64) -> Cookie {
        Cookie::new(v).unwrap()
    }

    #[test]
    fn test_requesting_has_no_outgoing() {
        let conn = Connection::requesting(PeerId(2), cookie(10));
        assert_eq!(conn.state(), HandshakeState::Requesting);
        assert_eq!(conn.outgoing_cookie(), None);
        assert_eq!(conn.key(), ConnectionKey::new(PeerId(2), cookie(10)));
    }

    #[test]
    fn test_queue_is_fifo() {
        let mut conn = Connection::requesting(PeerId(2), cookie(10));
        conn.enqueue("{ a }".into(), true);
        conn.enqueue("{ b }".into(), false);
        let drained: Vec<String> = conn.take_queue().into_iter().map(|q| q.body).collect();
        assert_eq!(drained, vec!["{ a }", "{ b }"]);
        assert_eq!(conn.queued(), 0);
    }

    #[test]
    fn test_handlers_see_connection_and_body() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut conn = Connection::responding(PeerId(4), cookie(1), cookie(2));
        let sink = seen.clone();
        conn.add_handler(0, Box::new(move |c: &Connection, body: &str| {
            sink.lock().unwrap().push((c.peer(), body.to_string()));
        }));

        conn.deliver("{ hello }");
        assert_eq!(conn.handler_count(), 1);
        assert_eq!(seen.lock().unwrap().as_slice(), &[(PeerId(4), "{ hello }".to_string())]);

        assert!(conn.remove_handler(0));
        conn.deliver("{ again }");
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
