//! Database subsystem.
//!
//! # Data Flow
//! ```text
//! prepare: PgConnector.connect() × connect_max_attempts (fixed delay)
//!     → pool handle published (ArcSwapOption)
//!
//! per call: acquire → begin → query → commit → release
//!     → child span "db:<query id>" under the caller's span
//!
//! stop: close pool → handle cleared
//! ```
//!
//! # Design Decisions
//! - A database that never appears is fatal at startup; no serving without it
//! - Query failures are returned to the caller and never tear the component down
//! - The connector is a trait so pool lifecycle can be exercised without Postgres

pub mod pool;

pub use pool::{Connector, DbError, DbPool, PgConnector};
