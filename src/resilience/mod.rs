//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Connect before serving (db):
//!     → retries.rs (fixed delay, bounded attempts, exhaustion is fatal)
//!
//! Reconnect while serving (broker):
//!     → backoff.rs (exponential, capped, jittered, unbounded attempts)
//! ```
//!
//! # Design Decisions
//! - Startup dependencies that never appear are a configuration problem
//! - Dependencies lost after startup are retried until they come back
//! - Jittered backoff prevents thundering herd

pub mod backoff;
pub mod retries;
