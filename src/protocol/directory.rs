//! Connection directory: connections indexed by key and by peer.

use crate::error::{ProtocolError, Result};
use crate::protocol::connection::Connection;
use crate::protocol::types::{ConnectionKey, PeerId};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Default)]
pub struct ConnectionDirectory {
    by_key: HashMap<ConnectionKey, Connection>,
    by_peer: HashMap<PeerId, BTreeSet<ConnectionKey>>,
    unique_per_peer: bool,
}

impl ConnectionDirectory {
    /// A directory that may hold several connections per peer.
    pub fn new() -> Self {
        Self::default()
    }

    /// A directory that holds at most one connection per peer.
    pub fn unique() -> Self {
        Self {
            unique_per_peer: true,
            ..Self::default()
        }
    }

    /// Fails if the key is taken, or if the directory is unique and the peer
    /// already has a connection.
    pub fn insert(&mut self, conn: Connection) -> Result<()> {
        let key = conn.key();
        let peer_has_conn = self.by_peer.get(&key.peer).is_some_and(|keys| !keys.is_empty());
        if self.by_key.contains_key(&key) || (self.unique_per_peer && peer_has_conn) {
            return Err(ProtocolError::DuplicateConnection(key.peer));
        }

        self.by_peer.entry(key.peer).or_default().insert(key);
        self.by_key.insert(key, conn);
        Ok(())
    }

    pub fn remove(&mut self, key: &ConnectionKey) -> Option<Connection> {
        let conn = self.by_key.remove(key)?;
        if let Some(keys) = self.by_peer.get_mut(&key.peer) {
            keys.remove(key);
            if keys.is_empty() {
                self.by_peer.remove(&key.peer);
            }
        }
        Some(conn)
    }

    pub fn get(&self, key: &ConnectionKey) -> Option<&Connection> {
        self.by_key.get(key)
    }

    pub fn get_mut(&mut self, key: &ConnectionKey) -> Option<&mut Connection> {
        self.by_key.get_mut(key)
    }

    pub fn contains(&self, key: &ConnectionKey) -> bool {
        self.by_key.contains_key(key)
    }

    /// Keys of every connection to `peer`, in cookie order.
    pub fn keys_for(&self, peer: PeerId) -> Vec<ConnectionKey> {
        self.by_peer
            .get(&peer)
            .map(|keys| keys.iter().copied().collect())
            .unwrap_or_default()
    }

    /// The lowest-keyed connection to `peer`; the only one in a unique directory.
    pub fn first_for(&self, peer: PeerId) -> Option<&Connection> {
        let key = self.by_peer.get(&peer)?.iter().next()?;
        self.by_key.get(key)
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<ConnectionKey> {
        let mut keys: Vec<ConnectionKey> = self.by_key.keys().copied().collect();
        keys.sort();
        keys
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.by_key.values()
    }

    pub fn peer_count(&self) -> usize {
        self.by_peer.len()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}
