//! # Core Protocol Components
//!
//! Text wire format and packet envelope.
//!
//! This module provides the foundation for the session layer: a lossless,
//! whitespace-tolerant encoding for scalars and nested objects, and the
//! envelope every packet travels in.
//!
//! ## Components
//! - **Wire**: `ObjectSerializer` / `ObjectParser` and the (de)serialization traits
//! - **Packet**: opcode, sender, cookie and an unparsed body region
//!
//! ## Wire Format
//! ```text
//! { <opcode> <sender> <cookie> [body] }
//! ```
//!
//! ## Limits
//! - Encoded packets above the transport ceiling (4096 bytes by default) are
//!   rejected at send time; there is no fragmentation

pub mod packet;
pub mod wire;
