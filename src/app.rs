//! Application assembly: configuration → components → registry.
//!
//! Components are attached in dependency order:
//!
//! ```text
//! telemetry → http_cln → db_main → broker (optional) → http_srv
//! ```
//!
//! `db_main` and `broker` are declared to stop after `http_srv`, so no request
//! is still in flight when their connections go away. Telemetry is attached
//! first and therefore stops last, flushing spans from everyone else.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde_json::{json, Value};
use thiserror::Error;

use crate::broker::{AmqpTransport, MessageHandler, QueueConsumer, Topology};
use crate::config::{ServiceConfig, TelemetryConfig, TracerKind};
use crate::db::DbPool;
use crate::http::{ErrorCatalog, HandlerError, HttpClient, HttpServer};
use crate::lifecycle::{ComponentRegistry, FatalStartupError, RegistryError, Shutdown};
use crate::observability::sinks::{SinkError, StatsdSink, ZipkinSink};
use crate::observability::span::SpanRef;
use crate::observability::{FunnelSettings, TelemetryFunnel, Tracer};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("telemetry sink setup failed: {0}")]
    Sink(#[from] SinkError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Shared handles available to route handlers.
#[derive(Clone)]
pub struct AppContext {
    pub http_client: Arc<HttpClient>,
    pub db: Arc<DbPool>,
    pub broker: Option<Arc<QueueConsumer>>,
    pub errors: Arc<ErrorCatalog>,
}

/// Fully wired service, ready to run.
pub struct Application {
    registry: ComponentRegistry,
    context: AppContext,
    server: Arc<HttpServer>,
    tracer: Option<Tracer>,
}

impl Application {
    /// Build every component from `config`. `routes` are merged with the
    /// built-in `/status` route; `handlers` serve the configured broker routes.
    pub async fn build(
        config: &ServiceConfig,
        routes: Router<AppContext>,
        handlers: HashMap<String, Arc<dyn MessageHandler>>,
    ) -> Result<Self, AppError> {
        let mut registry = ComponentRegistry::new();

        let funnel = match &config.telemetry {
            Some(telemetry) => Some(Arc::new(build_funnel(telemetry, config.system.request_timeout())?)),
            None => None,
        };
        let tracer = funnel.as_ref().map(|f| f.tracer());
        if let Some(funnel) = &funnel {
            registry.attach("telemetry", funnel.clone(), &[])?;
        }

        let http_client = Arc::new(HttpClient::new(config.system.request_timeout()));
        registry.attach("http_cln", http_client.clone(), &[])?;

        let db = Arc::new(DbPool::from_config(&config.db, &config.system));
        registry.attach("db_main", db.clone(), &["http_srv"])?;

        let broker = match &config.broker {
            Some(broker_config) => {
                let transport = Arc::new(AmqpTransport::new(broker_config.uri()));
                let mut builder = QueueConsumer::builder(transport, Topology::from_config(broker_config))
                    .backoff(QueueConsumer::backoff_from_config(broker_config));
                if let Some(tracer) = &tracer {
                    builder = builder.tracer(tracer.clone());
                }
                for (name, handler) in handlers {
                    builder = builder.handler(&name, handler);
                }
                let consumer = Arc::new(builder.build());
                registry.attach("broker", consumer.clone(), &["http_srv"])?;
                Some(consumer)
            }
            None => None,
        };

        let errors = Arc::new(ErrorCatalog::from_table(&config.errors));
        let context = AppContext {
            http_client,
            db,
            broker,
            errors: errors.clone(),
        };

        let router = Router::new()
            .route("/status", get(status))
            .merge(routes)
            .with_state(context.clone());
        let mut server = HttpServer::new(config.system.bind_address(), router, config.system.shutdown_timeout())
            .with_error_handler(errors);
        if let Some(tracer) = &tracer {
            server = server.with_tracer(tracer.clone());
        }
        let server = Arc::new(server);
        registry.attach("http_srv", server.clone(), &[])?;

        tracing::info!(components = registry.len(), "Application assembled");
        Ok(Self {
            registry,
            context,
            server,
            tracer,
        })
    }

    pub fn context(&self) -> &AppContext {
        &self.context
    }

    pub fn server(&self) -> &HttpServer {
        &self.server
    }

    pub fn tracer(&self) -> Option<&Tracer> {
        self.tracer.as_ref()
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.registry.shutdown_handle()
    }

    /// Start everything, idle until shutdown, stop everything.
    pub async fn run(mut self) -> Result<(), FatalStartupError> {
        self.registry.run().await
    }
}

fn build_funnel(telemetry: &TelemetryConfig, timeout: std::time::Duration) -> Result<TelemetryFunnel, SinkError> {
    let settings = FunnelSettings {
        service_name: telemetry.service_name.clone(),
        metric_prefix: telemetry.statsd_prefix.clone(),
        send_interval: telemetry.send_interval(),
        max_pending: telemetry.max_pending,
        sample_rate: telemetry.sample_rate,
    };
    let mut builder = TelemetryFunnel::builder(settings);
    if telemetry.tracer == TracerKind::Zipkin {
        let sink = ZipkinSink::new(&telemetry.tracer_url, &telemetry.service_name, timeout)?;
        tracing::info!(endpoint = %sink.endpoint(), "Zipkin trace sink configured");
        builder = builder.trace_sink(Arc::new(sink));
    }
    if let Some(addr) = &telemetry.statsd_addr {
        let sink = StatsdSink::new(addr)?;
        tracing::info!(addr = %addr, "StatsD metrics sink configured");
        builder = builder.metrics_sink(Arc::new(sink));
    }
    Ok(builder.build())
}

/// Liveness plus a database round-trip.
async fn status(State(context): State<AppContext>, Extension(span): Extension<SpanRef>) -> Result<Json<Value>, HandlerError> {
    context.db.ping(&span).await.map_err(|e| {
        HandlerError::new(StatusCode::SERVICE_UNAVAILABLE, format!("database unavailable: {}", e))
    })?;
    Ok(Json(json!({})))
}
