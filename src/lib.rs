//! # peerlink
//!
//! Authenticated peer sessions and a self-describing text wire format on top
//! of a host-provided, lossy, size-limited datagram transport.
//!
//! The host gives each node an opaque peer id and a way to send bytes to
//! another id. This crate turns that into a set of verified, addressable
//! connections carrying typed messages, surviving duplicate and reordered
//! delivery and peers leaving the session.
//!
//! ## Layout
//! - [`core`]: wire format and packet envelope
//! - [`protocol`]: handshake, connections, directories, the endpoint, and the
//!   application message registry
//! - [`transport`]: the transport and roster seams, plus an in-memory network
//! - [`utils`]: cookie allocation, deferred tasks, logging, metrics
//! - [`service`]: a node shell that drives an endpoint and its task queue
//!
//! ## Example
//! ```rust
//! use peerlink::config::NetworkConfig;
//! use peerlink::protocol::types::PeerId;
//! use peerlink::service::node::Node;
//! use peerlink::transport::local::LocalNetwork;
//! use peerlink::utils::cookies::CookieJar;
//! use std::sync::{Arc, Mutex};
//!
//! let config = NetworkConfig::default();
//! let net = LocalNetwork::new();
//! let jar = CookieJar::new().unwrap();
//! let (server_tx, mut server_rx) = net.attach(PeerId(1));
//! let (client_tx, mut client_rx) = net.attach(PeerId(2));
//! let mut server = Node::from_config(&config, server_tx, jar.clone(), net.clone()).unwrap();
//! let mut client = Node::from_config(&config, client_tx, jar, net.clone()).unwrap();
//!
//! let greeted = Arc::new(Mutex::new(Vec::new()));
//! let sink = greeted.clone();
//! server
//!     .endpoint_mut()
//!     .on_established(move |conn| sink.lock().unwrap().push(conn.peer()));
//!
//! client.endpoint_mut().open(PeerId(1)).unwrap();
//! for _ in 0..4 {
//!     while let Ok(bytes) = server_rx.try_recv() {
//!         server.deliver(&bytes);
//!     }
//!     while let Ok(bytes) = client_rx.try_recv() {
//!         client.deliver(&bytes);
//!     }
//! }
//!
//! assert_eq!(greeted.lock().unwrap().as_slice(), &[PeerId(2)]);
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use error::{ProtocolError, Result};
pub use protocol::endpoint::{Endpoint, Subscription};
pub use protocol::types::{ConnectionKey, Cookie, PeerId};
