//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (registry.rs):
//!     attach components → validate stop graph (graph.rs)
//!     → prepare each in order → start each in order
//!
//! Idle:
//!     signals.rs (SIGINT/SIGTERM) → shutdown.rs (Shutdown::trigger)
//!
//! Shutdown (registry.rs):
//!     topological stop order → stop each, bounded by its timeout
//! ```
//!
//! # Design Decisions
//! - Ordered startup: later components may rely on earlier ones being ready
//! - Fail fast on startup, fail soft on shutdown
//! - Shutdown has timeouts: one slow component cannot stall the rest

pub mod component;
pub mod error;
pub mod graph;
pub mod registry;
pub mod shutdown;
pub mod signals;

pub use component::{Component, ComponentState};
pub use error::{FatalError, FatalStartupError, GraphError, Phase, RegistryError, StopError};
pub use registry::ComponentRegistry;
pub use shutdown::Shutdown;
