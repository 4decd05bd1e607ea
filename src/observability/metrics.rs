//! Internal runtime metrics and their Prometheus exposition.
//!
//! # Metrics
//! - `telemetry_spans_dropped_total` (counter): spans rejected by a full pending batch
//! - `telemetry_flushes_total` (counter): non-empty flush cycles
//! - `telemetry_sink_errors_total` (counter): failed sink deliveries, by `sink`
//! - `broker_reconnects_total` (counter): successful broker reconnects
//! - `component_stop_failures_total` (counter): failed or timed-out stops, by `component`
//!
//! These describe the runtime itself. Application latencies go out through the
//! telemetry funnel's StatsD sink instead.

use std::net::SocketAddr;

use metrics::describe_counter;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

pub const SPANS_DROPPED_TOTAL: &str = "telemetry_spans_dropped_total";
pub const FLUSHES_TOTAL: &str = "telemetry_flushes_total";
pub const SINK_ERRORS_TOTAL: &str = "telemetry_sink_errors_total";
pub const BROKER_RECONNECTS_TOTAL: &str = "broker_reconnects_total";
pub const COMPONENT_STOP_FAILURES_TOTAL: &str = "component_stop_failures_total";

/// Install the Prometheus recorder with an HTTP scrape listener on `addr`.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    register_metrics();
    tracing::info!(address = %addr, "Prometheus metrics exporter started");
    Ok(())
}

fn register_metrics() {
    describe_counter!(SPANS_DROPPED_TOTAL, "Spans dropped because the pending batch was full");
    describe_counter!(FLUSHES_TOTAL, "Telemetry flush cycles that carried at least one span");
    describe_counter!(SINK_ERRORS_TOTAL, "Telemetry batches a sink failed to deliver");
    describe_counter!(BROKER_RECONNECTS_TOTAL, "Broker connections re-established after a close");
    describe_counter!(COMPONENT_STOP_FAILURES_TOTAL, "Component stops that failed or timed out");
}
