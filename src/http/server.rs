//! HTTP server component.
//!
//! # Responsibilities
//! - Bind the listener during prepare (a busy port fails startup)
//! - Wrap the application router with request tracing and access logging
//! - Serve until stopped, then drain in-flight requests
//!
//! # Design Decisions
//! - The server owns its own shutdown signal; the registry decides when to fire it
//! - The registry bounds the drain by `shutdown_timeout`

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::middleware::from_fn_with_state;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::http::error::ErrorHandler;
use crate::http::middleware::{trace_requests, TraceState};
use crate::lifecycle::{Component, FatalError, Shutdown, StopError};
use crate::observability::tracer::Tracer;

/// Traced HTTP server around an application router.
pub struct HttpServer {
    bind_address: String,
    shutdown_timeout: Duration,
    trace: TraceState,
    skip: HashSet<String>,
    router: Mutex<Option<Router>>,
    listener: Mutex<Option<TcpListener>>,
    local_addr: Mutex<Option<SocketAddr>>,
    shutdown: Shutdown,
    task: Mutex<Option<JoinHandle<std::io::Result<()>>>>,
}

impl HttpServer {
    pub fn new(bind_address: impl Into<String>, router: Router, shutdown_timeout: Duration) -> Self {
        Self {
            bind_address: bind_address.into(),
            shutdown_timeout,
            trace: TraceState::default(),
            skip: HashSet::new(),
            router: Mutex::new(Some(router)),
            listener: Mutex::new(None),
            local_addr: Mutex::new(None),
            shutdown: Shutdown::new(),
            task: Mutex::new(None),
        }
    }

    pub fn with_tracer(mut self, tracer: Tracer) -> Self {
        self.trace.tracer = Some(tracer);
        self
    }

    pub fn with_error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.trace.error_handler = Some(handler);
        self
    }

    /// Serve `path` without opening a span (health checks, scrapes).
    pub fn skip_trace(mut self, path: impl Into<String>) -> Self {
        self.skip.insert(path.into());
        self
    }

    /// Address actually bound, available after prepare.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl Component for HttpServer {
    async fn prepare(&self) -> Result<(), FatalError> {
        let listener = TcpListener::bind(&self.bind_address).await.map_err(|e| {
            tracing::error!(address = %self.bind_address, error = %e, "Failed to bind HTTP listener");
            FatalError::Io(e)
        })?;
        let addr = listener.local_addr()?;
        *self.local_addr.lock().unwrap_or_else(|p| p.into_inner()) = Some(addr);
        *self.listener.lock().unwrap_or_else(|p| p.into_inner()) = Some(listener);
        tracing::info!(address = %addr, "HTTP listener bound");
        Ok(())
    }

    async fn start(&self) -> Result<(), FatalError> {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
            .ok_or_else(|| FatalError::Failed("HTTP listener not bound".into()))?;
        let router = self
            .router
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
            .ok_or_else(|| FatalError::Failed("HTTP server already started".into()))?;

        let state = TraceState {
            skip: Arc::new(self.skip.clone()),
            ..self.trace.clone()
        };
        let app = router.layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(from_fn_with_state(state, trace_requests)),
        );

        let addr = listener.local_addr()?;
        let shutdown = self.shutdown.clone();
        let task = tokio::spawn(async move {
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .with_graceful_shutdown(async move { shutdown.wait().await })
                .await
        });
        *self.task.lock().unwrap_or_else(|p| p.into_inner()) = Some(task);

        tracing::info!(address = %addr, "HTTP server ready to handle connections");
        Ok(())
    }

    async fn stop(&self) -> Result<(), StopError> {
        tracing::info!("Stopping HTTP server");
        self.shutdown.trigger();
        let task = self.task.lock().unwrap_or_else(|p| p.into_inner()).take();
        // Prepared but never started: dropping the listener closes the port.
        self.listener.lock().unwrap_or_else(|p| p.into_inner()).take();

        if let Some(task) = task {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(StopError::Failed(format!("HTTP server error: {}", e))),
                Err(e) => return Err(StopError::Failed(format!("HTTP server task failed: {}", e))),
            }
        }
        tracing::info!("HTTP server stopped");
        Ok(())
    }

    fn stop_timeout(&self) -> Option<Duration> {
        Some(self.shutdown_timeout)
    }
}
