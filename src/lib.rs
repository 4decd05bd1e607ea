//! Service runtime library.
//!
//! Lifecycle-managed components (HTTP server and client, Postgres pool, AMQP
//! consumer) under one registry, with a telemetry funnel that forwards spans
//! to Zipkin and derived timers to StatsD.

// Core subsystems
pub mod app;
pub mod broker;
pub mod config;
pub mod db;
pub mod http;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use app::{AppContext, Application};
pub use config::ServiceConfig;
pub use lifecycle::{Component, ComponentRegistry, Shutdown};
pub use observability::{SpanKind, SpanRef, TelemetryFunnel, Tracer};
