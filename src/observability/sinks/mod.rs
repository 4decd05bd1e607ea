//! Telemetry sinks.
//!
//! # Sinks
//! - `zipkin.rs`: trace records as a Zipkin v2 JSON batch over HTTP
//! - `statsd.rs`: metric samples as StatsD timer lines over UDP
//!
//! A sink error never leaves the funnel; it is logged and counted there.

pub mod statsd;
pub mod zipkin;

use async_trait::async_trait;
use thiserror::Error;

use crate::observability::derive::MetricSample;
use crate::observability::span::Span;

pub use statsd::StatsdSink;
pub use zipkin::ZipkinSink;

/// Errors reported by a sink for one batch.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("collector rejected batch with status {0}")]
    Rejected(u16),

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Destination for finished spans.
#[async_trait]
pub trait TraceSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, spans: &[Span]) -> Result<(), SinkError>;
}

/// Destination for derived metric samples.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, samples: &[MetricSample]) -> Result<(), SinkError>;
}
