//! # Utility Modules
//!
//! Supporting utilities used throughout the session layer.
//!
//! ## Components
//! - **Cookies**: shared allocator for nonzero, unused session cookies
//! - **Deferred**: retry-until-timeout task queue
//! - **Logging**: structured logging configuration
//! - **Metrics**: thread-safe observability counters

pub mod cookies;
pub mod deferred;
pub mod logging;
pub mod metrics;

pub use cookies::CookieJar;
pub use deferred::{DeferredTask, DeferredTaskQueue, FnTask, PollReport, TaskStatus};
