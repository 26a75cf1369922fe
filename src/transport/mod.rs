//! # Transport Seam
//!
//! The session layer runs on top of a host-provided, point-to-point datagram
//! service. The host supplies the local peer id, an authoritative sender id
//! for every delivered message and a per-call reliability flag; it offers no
//! sessions and no ordering across senders.
//!
//! ## Components
//! - **Transport**: outbound sends and handler registration
//! - **PeerRoster**: the host's list of peers still in the session, used by cleanup
//! - **Local**: in-memory network for tests and single-process hosts

pub mod local;

use crate::error::Result;
use crate::protocol::types::PeerId;
use std::collections::{BTreeMap, HashSet};

/// Outbound half of the host transport.
///
/// Inbound bytes are handed to [`Endpoint::handle_message`](crate::protocol::endpoint::Endpoint::handle_message)
/// by whoever drives the endpoint.
pub trait Transport {
    /// Peer id the host assigned to this node.
    fn local_id(&self) -> PeerId;

    /// Start delivering messages tagged with `message_id` to this endpoint.
    fn register_handler(&mut self, message_id: u16) -> Result<()>;

    fn unregister_handler(&mut self, message_id: u16);

    fn send_to(&mut self, message_id: u16, bytes: &[u8], dest: PeerId, reliable: bool) -> Result<()>;
}

/// Authoritative list of peers currently in the session.
pub trait PeerRoster {
    fn is_present(&self, peer: PeerId) -> bool;

    /// Human-readable name for log fields.
    fn display_name(&self, _peer: PeerId) -> Option<String> {
        None
    }
}

impl PeerRoster for HashSet<PeerId> {
    fn is_present(&self, peer: PeerId) -> bool {
        self.contains(&peer)
    }
}

impl PeerRoster for BTreeMap<PeerId, String> {
    fn is_present(&self, peer: PeerId) -> bool {
        self.contains_key(&peer)
    }

    fn display_name(&self, peer: PeerId) -> Option<String> {
        self.get(&peer).cloned()
    }
}

impl<R: PeerRoster + ?Sized> PeerRoster for &R {
    fn is_present(&self, peer: PeerId) -> bool {
        (**self).is_present(peer)
    }

    fn display_name(&self, peer: PeerId) -> Option<String> {
        (**self).display_name(peer)
    }
}
