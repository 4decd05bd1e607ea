//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Components open spans:
//!     tracer.rs → span.rs (SpanHandle, finished once)
//!     → funnel.rs (pending batch)
//!
//! Every send interval, funnel.rs flushes:
//!     → derive.rs (one metric sample per span) → sinks/statsd.rs (UDP)
//!     → sinks/zipkin.rs (Zipkin v2 JSON over HTTP)
//!
//! Propagation across processes:
//!     context.rs (B3 headers in, B3 headers out)
//!
//! Process-local:
//!     → logging.rs (structured log events)
//!     → metrics.rs (runtime counters, Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Span recording never blocks on I/O; the batch lock is held only to push or swap
//! - Each sink fails independently; telemetry loss never affects requests
//! - Unsampled spans cost an id and nothing else

pub mod context;
pub mod derive;
pub mod funnel;
pub mod logging;
pub mod metrics;
pub mod sanitize;
pub mod sinks;
pub mod span;
pub mod tags;
pub mod tracer;

pub use context::TraceContext;
pub use funnel::{FlushReport, FunnelSettings, SinkOutcome, TelemetryFunnel};
pub use span::{Span, SpanHandle, SpanKind, SpanRef};
pub use tracer::Tracer;
