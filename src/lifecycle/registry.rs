//! Component registry: ordered startup, ordered shutdown.
//!
//! # Phases
//! ```text
//! validate graph → prepare (registration order) → start (registration order)
//!     → idle until Shutdown::trigger → stop (topological stop order)
//! ```
//!
//! Prepare and start fail fast: the failing component is marked `Failed` and
//! every component still holding prepared resources is stopped in reverse
//! registration order. Stop is fail-soft and each call is time-bounded.

use std::sync::Arc;
use std::time::Duration;

use crate::lifecycle::component::{Component, ComponentState};
use crate::lifecycle::error::{FatalStartupError, GraphError, Phase, RegistryError, StopError};
use crate::lifecycle::graph::{stop_order, StopNode};
use crate::lifecycle::shutdown::Shutdown;

/// Default bound on a single component's `stop()`.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(30);

struct Entry {
    name: String,
    component: Arc<dyn Component>,
    stop_after: Vec<String>,
    state: ComponentState,
}

/// Owns the named components and the process shutdown signal.
pub struct ComponentRegistry {
    entries: Vec<Entry>,
    shutdown: Shutdown,
    stop_timeout: Duration,
    order: Option<Vec<usize>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            shutdown: Shutdown::new(),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            order: None,
        }
    }

    /// Default stop timeout for components that do not set their own.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Register `component` under `name`. It will be stopped only after every
    /// component named in `stop_after` has finished stopping.
    pub fn attach(
        &mut self,
        name: impl Into<String>,
        component: Arc<dyn Component>,
        stop_after: &[&str],
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.entries.iter().any(|e| e.name == name) {
            return Err(RegistryError::DuplicateName(name));
        }
        tracing::debug!(component = %name, stop_after = ?stop_after, "Component attached");
        self.entries.push(Entry {
            name,
            component,
            stop_after: stop_after.iter().map(|s| s.to_string()).collect(),
            state: ComponentState::Registered,
        });
        Ok(())
    }

    /// Handle that ends the idle phase of [`run`](Self::run).
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn state(&self, name: &str) -> Option<ComponentState> {
        self.entries.iter().find(|e| e.name == name).map(|e| e.state)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Component names in the order they will be stopped.
    pub fn stop_order(&self) -> Result<Vec<String>, GraphError> {
        Ok(self
            .compute_order()?
            .into_iter()
            .map(|i| self.entries[i].name.clone())
            .collect())
    }

    fn compute_order(&self) -> Result<Vec<usize>, GraphError> {
        let nodes: Vec<StopNode<'_>> = self
            .entries
            .iter()
            .map(|e| StopNode {
                name: &e.name,
                stop_after: &e.stop_after,
            })
            .collect();
        stop_order(&nodes)
    }

    /// Bring every component up, idle until shutdown, then bring them down.
    pub async fn run(&mut self) -> Result<(), FatalStartupError> {
        self.start_all().await?;
        tracing::info!(components = self.entries.len(), "All components running");

        self.shutdown.wait().await;
        tracing::info!("Shutdown requested, stopping components");

        self.stop_all().await;
        tracing::info!("All components stopped");
        Ok(())
    }

    /// Validate the graph, then prepare and start every component.
    pub async fn start_all(&mut self) -> Result<(), FatalStartupError> {
        let order = self.compute_order()?;
        self.order = Some(order);

        for i in 0..self.entries.len() {
            if self.entries[i].state != ComponentState::Registered {
                continue;
            }
            let name = self.entries[i].name.clone();
            let component = self.entries[i].component.clone();

            tracing::info!(component = %name, "Preparing component");
            if let Err(source) = component.prepare().await {
                tracing::error!(component = %name, error = %source, "Component failed to prepare");
                self.entries[i].state = ComponentState::Failed;
                self.teardown(i).await;
                return Err(FatalStartupError::Component {
                    component: name,
                    phase: Phase::Prepare,
                    source,
                });
            }
            self.entries[i].state = ComponentState::Prepared;
        }

        for i in 0..self.entries.len() {
            if self.entries[i].state != ComponentState::Prepared {
                continue;
            }
            let name = self.entries[i].name.clone();
            let component = self.entries[i].component.clone();

            tracing::info!(component = %name, "Starting component");
            if let Err(source) = component.start().await {
                tracing::error!(component = %name, error = %source, "Component failed to start");
                // The failing component still holds prepared resources.
                self.teardown(self.entries.len()).await;
                self.entries[i].state = ComponentState::Failed;
                return Err(FatalStartupError::Component {
                    component: name,
                    phase: Phase::Start,
                    source,
                });
            }
            self.entries[i].state = ComponentState::Running;
        }
        Ok(())
    }

    /// Stop every running component in stop order. Safe to call repeatedly.
    pub async fn stop_all(&mut self) {
        let order = match self.order.clone() {
            Some(order) => order,
            None => match self.compute_order() {
                Ok(order) => order,
                Err(e) => {
                    tracing::error!(error = %e, "Invalid stop graph, stopping in reverse registration order");
                    (0..self.entries.len()).rev().collect()
                }
            },
        };
        for i in order {
            self.stop_entry(i).await;
        }
    }

    /// Best-effort stop of entries `0..upto` in reverse registration order.
    async fn teardown(&mut self, upto: usize) {
        for i in (0..upto).rev() {
            self.stop_entry(i).await;
        }
    }

    async fn stop_entry(&mut self, i: usize) {
        if !self.entries[i].state.needs_stop() {
            return;
        }
        let name = self.entries[i].name.clone();
        let component = self.entries[i].component.clone();
        let timeout = component.stop_timeout().unwrap_or(self.stop_timeout);

        tracing::info!(component = %name, "Stopping component");
        let result = match tokio::time::timeout(timeout, component.stop()).await {
            Ok(result) => result,
            Err(_) => Err(StopError::Timeout(timeout)),
        };
        self.entries[i].state = ComponentState::Stopped;

        match result {
            Ok(()) => tracing::info!(component = %name, "Component stopped"),
            Err(e) => {
                tracing::warn!(component = %name, error = %e, "Component failed to stop cleanly");
                metrics::counter!(crate::observability::metrics::COMPONENT_STOP_FAILURES_TOTAL, "component" => name).increment(1);
            }
        }
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
