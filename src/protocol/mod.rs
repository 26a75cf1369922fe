//! # Session Protocol
//!
//! Cookie-authenticated connections over an unauthenticated datagram transport.
//!
//! ## Components
//! - **Types**: peer ids, cookies and connection keys
//! - **Handshake**: SYN/ACK/PAYLOAD transition rules
//! - **Connection**: per-peer state, outbound queue and data subscribers
//! - **Directory**: connections indexed by key and by peer
//! - **Endpoint**: the node-level object bound to the transport
//! - **Dispatcher**: kind-keyed registry for application messages

pub mod connection;
pub mod directory;
pub mod dispatcher;
pub mod endpoint;
pub mod handshake;
pub mod types;
