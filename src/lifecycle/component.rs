//! The three-phase component contract.

use std::time::Duration;

use async_trait::async_trait;

use crate::lifecycle::error::{FatalError, StopError};

/// An independently-lifecycled subsystem driven by the registry.
///
/// `prepare` and `start` are called at most once, in registration order; a
/// later component may rely on every earlier one having finished both.
/// `stop` is called at most once by the registry.
#[async_trait]
pub trait Component: Send + Sync {
    async fn prepare(&self) -> Result<(), FatalError>;

    async fn start(&self) -> Result<(), FatalError>;

    async fn stop(&self) -> Result<(), StopError>;

    /// Overrides the registry's default stop timeout for this component.
    fn stop_timeout(&self) -> Option<Duration> {
        None
    }
}

/// Per-component state as tracked by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    Registered,
    Prepared,
    Running,
    Stopped,
    Failed,
}

impl ComponentState {
    /// True while the component holds prepared resources.
    pub fn needs_stop(&self) -> bool {
        matches!(self, ComponentState::Prepared | ComponentState::Running)
    }
}
