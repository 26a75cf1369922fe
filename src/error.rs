//! # Error Types
//!
//! Error handling for the session layer.
//!
//! This module defines every error variant that can surface from wire parsing,
//! the handshake, connection bookkeeping, the transport seam and the deferred
//! task queue.
//!
//! ## Error Categories
//! - **Malformed wire data**: parse failures, bad field values, invalid UTF-8.
//!   Caught at the endpoint's dispatch boundary, logged, packet dropped.
//! - **Protocol anomalies**: unknown opcodes, duplicate SYN/ACK on an established
//!   connection. Logged, the connection is unaffected.
//! - **Capacity violations**: a serialized packet above the transport ceiling.
//!   Fatal to that send call only.
//! - **Lifecycle / directory errors**: unknown connections, duplicate
//!   established connections, a shut down endpoint.
//! - **Deferred task failures**: a task that errored during execution.
//!
//! All errors implement `std::error::Error` for interoperability.
//!
//! ## Example Usage
//! ```rust
//! use peerlink::core::wire;
//! use peerlink::error::{ProtocolError, Result};
//!
//! fn read_count(text: &str) -> Result<u32> {
//!     let mut parser = wire::ObjectParser::new(text);
//!     parser.open_object(true)?;
//!     let count = parser.parse::<u32>()?;
//!     parser.close_object()?;
//!     Ok(count)
//! }
//!
//! assert_eq!(read_count("{ 7 }").unwrap(), 7);
//! assert!(matches!(read_count("{ x }"), Err(ProtocolError::InvalidField { .. })));
//! ```

use crate::protocol::types::{ConnectionKey, PeerId};
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Wire parsing
    pub const ERR_OBJECT_MISSING: &str = "object missing";
    pub const ERR_EXPECTED_OBJECT: &str = "expected object data";
    pub const ERR_END_IN_OBJECT: &str = "data ended while parsing object";
    pub const ERR_END_SEEKING_CLOSE: &str = "data ended seeking close brace";
    pub const ERR_UNEXPECTED_SEEKING_CLOSE: &str = "unexpected character seeking close brace";
    pub const ERR_END_EXPECTING_FIELD: &str = "reached end of data expecting field";
    pub const ERR_END_IN_STRING: &str = "data ended while parsing string";
    pub const ERR_END_IN_ESCAPE: &str = "data ended while parsing escape in field";
    pub const ERR_UNMATCHED_QUOTE: &str = "unmatched quote in field";
    pub const ERR_BAD_NULL: &str = "unexpected character after null";
    pub const ERR_EXPECTED_FIELD: &str = "expected field, found object";
    pub const ERR_NULL_NOT_ALLOWED: &str = "null where a value is required";
    pub const ERR_TRAILING_DATA: &str = "data after packet close brace";

    /// Protocol anomalies
    pub const ERR_DUPLICATE_SYN: &str = "duplicate SYN";
    pub const ERR_DUPLICATE_ACK: &str = "duplicate ACK";

    /// Lifecycle
    pub const ERR_ENDPOINT_CLOSED: &str = "Endpoint is shut down";
    pub const ERR_LOCK_POISONED: &str = "Synchronization primitive poisoned";
    pub const ERR_QUEUE_FULL: &str = "Deferred task queue is full";
}

/// ProtocolError is the primary error type for all session-layer operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Parse error at byte {offset}: {reason}")]
    Parse { offset: usize, reason: &'static str },

    #[error("Invalid field at byte {offset}: '{field}' is not a valid {expected}")]
    InvalidField {
        offset: usize,
        field: String,
        expected: &'static str,
    },

    #[error("Packet is not valid UTF-8")]
    InvalidUtf8,

    #[error("Unknown opcode: {0}")]
    UnknownOpcode(i32),

    #[error("Protocol anomaly from peer {peer}: {reason}")]
    Anomaly { peer: PeerId, reason: &'static str },

    #[error("Packet too large: {size} bytes (limit {limit})")]
    OversizedPacket { size: usize, limit: usize },

    #[error("Duplicate established connection to peer {0}")]
    DuplicateConnection(PeerId),

    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionKey),

    #[error("No established connection to peer {0}")]
    NotConnected(PeerId),

    #[error("Unknown message kind: {0}")]
    UnknownMessageKind(String),

    #[error("Message kind already registered: {0}")]
    DuplicateMessageKind(String),

    #[error("Endpoint is shut down")]
    EndpointClosed,

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Deferred task failed: {0}")]
    TaskFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Synchronization primitive poisoned")]
    LockPoisoned,

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Whether this error means the received bytes could not be understood.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            ProtocolError::Parse { .. }
                | ProtocolError::InvalidField { .. }
                | ProtocolError::InvalidUtf8
        )
    }

    /// Whether this error is a recoverable protocol diagnostic.
    pub fn is_anomaly(&self) -> bool {
        matches!(
            self,
            ProtocolError::UnknownOpcode(_) | ProtocolError::Anomaly { .. }
        )
    }

    pub(crate) fn parse(offset: usize, reason: &'static str) -> Self {
        ProtocolError::Parse { offset, reason }
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
