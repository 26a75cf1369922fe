//! Identifiers shared by the handshake, the directories and the endpoint.

use std::fmt;
use std::num::NonZeroU64;

/// Opaque peer identifier supplied by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

impl PeerId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for PeerId {
    fn from(id: u64) -> Self {
        PeerId(id)
    }
}

/// Session cookie chosen by one side of a connection.
///
/// Zero is reserved on the wire for "not yet assigned", so a `Cookie` is
/// always nonzero and an unknown cookie is an `Option<Cookie>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cookie(NonZeroU64);

impl Cookie {
    /// Returns `None` for the reserved value 0.
    pub fn new(value: u64) -> Option<Self> {
        NonZeroU64::new(value).map(Cookie)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }

    /// Wire form of a possibly-unknown cookie.
    pub fn to_wire(cookie: Option<Cookie>) -> u64 {
        cookie.map_or(0, Cookie::get)
    }
}

/// Decimal, as carried on the wire.
impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.get())
    }
}

/// Primary lookup key for inbound packets: the remote peer plus the cookie
/// this side chose for the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionKey {
    pub peer: PeerId,
    pub incoming: Cookie,
}

impl ConnectionKey {
    pub fn new(peer: PeerId, incoming: Cookie) -> Self {
        Self { peer, incoming }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.peer, self.incoming)
    }
}
