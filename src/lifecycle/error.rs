//! Lifecycle error definitions.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// A component could not be prepared or started.
#[derive(Debug, Error)]
pub enum FatalError {
    /// A bounded connect loop ran out of attempts.
    #[error("could not connect to {target} after {attempts} attempts")]
    ConnectExhausted { target: String, attempts: u32 },

    /// Configuration is unusable for this component.
    #[error("misconfigured: {0}")]
    Misconfigured(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Failed(String),
}

/// A component failed to stop cleanly. Logged, never propagated.
#[derive(Debug, Error)]
pub enum StopError {
    #[error("stop timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Failed(String),
}

/// Errors from building the registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("component '{0}' is already attached")]
    DuplicateName(String),
}

/// Problems with the declared stop-after graph.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("component '{component}' must stop after unknown component '{dependency}'")]
    UnknownDependency { component: String, dependency: String },

    #[error("stop-after constraints form a cycle through: {}", .0.join(", "))]
    Cycle(Vec<String>),
}

/// Lifecycle phase in which a component failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Prepare,
    Start,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Prepare => write!(f, "prepare"),
            Phase::Start => write!(f, "start"),
        }
    }
}

/// The only error that leaves [`ComponentRegistry::run`](crate::lifecycle::ComponentRegistry::run).
#[derive(Debug, Error)]
pub enum FatalStartupError {
    #[error("invalid component graph: {0}")]
    Graph(#[from] GraphError),

    #[error("component '{component}' failed to {phase}: {source}")]
    Component {
        component: String,
        phase: Phase,
        #[source]
        source: FatalError,
    },
}
