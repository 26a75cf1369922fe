//! In-memory datagram network.
//!
//! Every [`LocalTransport`] attached under a peer id gets its own inbox. A
//! message sent to a peer is delivered to each transport on that node that
//! registered the message id, which is how a host that is also a player ends
//! up with a server endpoint and a client endpoint seeing the same traffic.
//!
//! With loopback enabled the network also echoes every send back to the
//! sender's own node, reproducing the behaviour of the game host's transport.

use crate::error::{ProtocolError, Result};
use crate::protocol::types::PeerId;
use crate::transport::{PeerRoster, Transport};
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace};

#[derive(Debug)]
struct Slot {
    id: u64,
    inbox: UnboundedSender<Bytes>,
    handlers: HashSet<u16>,
}

#[derive(Debug, Default)]
struct NetworkState {
    nodes: HashMap<PeerId, Vec<Slot>>,
    next_slot: u64,
    loopback: bool,
    partitions: HashSet<(PeerId, PeerId)>,
    sent: u64,
}

impl NetworkState {
    fn deliver(&self, dest: PeerId, message_id: u16, payload: &Bytes) -> usize {
        let Some(slots) = self.nodes.get(&dest) else {
            return 0;
        };
        slots
            .iter()
            .filter(|slot| slot.handlers.contains(&message_id))
            .filter(|slot| slot.inbox.send(payload.clone()).is_ok())
            .count()
    }

    fn slot_mut(&mut self, peer: PeerId, id: u64) -> Option<&mut Slot> {
        self.nodes.get_mut(&peer)?.iter_mut().find(|slot| slot.id == id)
    }
}

fn link(a: PeerId, b: PeerId) -> (PeerId, PeerId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Cloneable handle to a shared in-memory network.
#[derive(Debug, Clone, Default)]
pub struct LocalNetwork {
    inner: Arc<Mutex<NetworkState>>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Echo every send back to the sender's node.
    pub fn with_loopback(self, enabled: bool) -> Self {
        self.state().loopback = enabled;
        self
    }

    /// Adds a transport for `peer` and returns it with its inbox.
    pub fn attach(&self, peer: PeerId) -> (LocalTransport, UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state();
        let id = state.next_slot;
        state.next_slot += 1;
        state.nodes.entry(peer).or_default().push(Slot {
            id,
            inbox: tx,
            handlers: HashSet::new(),
        });
        debug!(%peer, slot = id, "Transport attached");

        let transport = LocalTransport {
            peer,
            slot: id,
            network: self.clone(),
        };
        (transport, rx)
    }

    /// Drops all traffic between `a` and `b` while set.
    pub fn set_partitioned(&self, a: PeerId, b: PeerId, partitioned: bool) {
        let mut state = self.state();
        if partitioned {
            state.partitions.insert(link(a, b));
        } else {
            state.partitions.remove(&link(a, b));
        }
    }

    /// Total sends accepted, including ones dropped by a partition.
    pub fn sent_count(&self) -> u64 {
        self.state().sent
    }

    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.state().nodes.keys().copied().collect();
        peers.sort();
        peers
    }

    fn state(&self) -> MutexGuard<'_, NetworkState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn detach(&self, peer: PeerId, slot: u64) {
        let mut state = self.state();
        if let Some(slots) = state.nodes.get_mut(&peer) {
            slots.retain(|s| s.id != slot);
            if slots.is_empty() {
                state.nodes.remove(&peer);
            }
        }
        debug!(%peer, slot, "Transport detached");
    }
}

/// The network doubles as a roster: a peer is present while attached.
impl PeerRoster for LocalNetwork {
    fn is_present(&self, peer: PeerId) -> bool {
        self.state().nodes.contains_key(&peer)
    }
}

/// One endpoint's attachment to a [`LocalNetwork`]. Detaches on drop.
#[derive(Debug)]
pub struct LocalTransport {
    peer: PeerId,
    slot: u64,
    network: LocalNetwork,
}

impl LocalTransport {
    pub fn network(&self) -> &LocalNetwork {
        &self.network
    }
}

impl Transport for LocalTransport {
    fn local_id(&self) -> PeerId {
        self.peer
    }

    fn register_handler(&mut self, message_id: u16) -> Result<()> {
        let mut state = self.network.inner.lock().map_err(|_| ProtocolError::LockPoisoned)?;
        let slot = state
            .slot_mut(self.peer, self.slot)
            .ok_or_else(|| ProtocolError::TransportError(format!("Peer {} is detached", self.peer)))?;
        slot.handlers.insert(message_id);
        Ok(())
    }

    fn unregister_handler(&mut self, message_id: u16) {
        let mut state = self.network.state();
        if let Some(slot) = state.slot_mut(self.peer, self.slot) {
            slot.handlers.remove(&message_id);
        }
    }

    fn send_to(&mut self, message_id: u16, bytes: &[u8], dest: PeerId, _reliable: bool) -> Result<()> {
        let mut state = self.network.inner.lock().map_err(|_| ProtocolError::LockPoisoned)?;
        if !state.nodes.contains_key(&dest) {
            return Err(ProtocolError::TransportError(format!("Unknown destination peer {dest}")));
        }
        state.sent += 1;

        if state.partitions.contains(&link(self.peer, dest)) {
            trace!(from = %self.peer, to = %dest, "Partitioned, message dropped");
            return Ok(());
        }

        let payload = Bytes::copy_from_slice(bytes);
        let delivered = state.deliver(dest, message_id, &payload);
        if state.loopback && dest != self.peer {
            state.deliver(self.peer, message_id, &payload);
        }
        trace!(from = %self.peer, to = %dest, size = bytes.len(), delivered, "Message sent");
        Ok(())
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        self.network.detach(self.peer, self.slot);
    }
}
