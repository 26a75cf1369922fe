//! # Host Shell
//!
//! Owns an endpoint, its deferred task queue and the peer roster, and drives
//! them from one place so every entry point runs serialized.

pub mod node;
