//! Telemetry funnel: pending batch, flush timer, sink fan-out.
//!
//! # Flush
//! ```text
//! swap pending batch out under the lock (no I/O while locked)
//!     → metrics sink: derive one sample per span, send
//!     → trace sink: send the batch
//! each sink independently best-effort; the batch is discarded afterwards
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::lifecycle::{Component, FatalError, Shutdown, StopError};
use crate::observability::derive::{derive_sample, MetricSample};
use crate::observability::metrics as names;
use crate::observability::sinks::{MetricsSink, TraceSink};
use crate::observability::span::Span;
use crate::observability::tracer::Tracer;

/// Funnel tuning.
#[derive(Debug, Clone)]
pub struct FunnelSettings {
    /// Local service name reported with every span.
    pub service_name: String,
    /// Prepended to every metric name, e.g. `"myapp."`.
    pub metric_prefix: String,
    pub send_interval: Duration,
    /// Spans beyond this many pending are dropped until the next flush.
    pub max_pending: usize,
    /// Probability that a new root trace is recorded.
    pub sample_rate: f64,
}

impl Default for FunnelSettings {
    fn default() -> Self {
        Self {
            service_name: "service".to_string(),
            metric_prefix: String::new(),
            send_interval: Duration::from_secs(5),
            max_pending: 10_000,
            sample_rate: 1.0,
        }
    }
}

/// What happened to one sink during a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkOutcome {
    NotConfigured,
    Delivered,
    Failed,
}

/// Result of one flush cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub spans: usize,
    pub metrics: SinkOutcome,
    pub traces: SinkOutcome,
}

pub(crate) struct FunnelShared {
    settings: FunnelSettings,
    pending: Mutex<Vec<Span>>,
    trace_sink: Option<Arc<dyn TraceSink>>,
    metrics_sink: Option<Arc<dyn MetricsSink>>,
    dropped: AtomicU64,
}

impl FunnelShared {
    pub(crate) fn settings(&self) -> &FunnelSettings {
        &self.settings
    }

    fn lock_pending(&self) -> MutexGuard<'_, Vec<Span>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn record(&self, span: Span) {
        let mut pending = self.lock_pending();
        if pending.len() >= self.settings.max_pending {
            drop(pending);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(names::SPANS_DROPPED_TOTAL).increment(1);
            return;
        }
        pending.push(span);
    }

    pub(crate) fn sample(&self) -> bool {
        let rate = self.settings.sample_rate;
        if rate >= 1.0 {
            true
        } else if rate <= 0.0 {
            false
        } else {
            rand::thread_rng().gen_bool(rate)
        }
    }

    fn take_batch(&self) -> Vec<Span> {
        std::mem::take(&mut *self.lock_pending())
    }

    async fn flush(&self) -> FlushReport {
        let batch = self.take_batch();
        let dropped = self.dropped.swap(0, Ordering::Relaxed);
        if dropped > 0 {
            tracing::warn!(dropped, max_pending = self.settings.max_pending, "Pending span batch was full, spans dropped");
        }

        let mut report = FlushReport {
            spans: batch.len(),
            metrics: SinkOutcome::NotConfigured,
            traces: SinkOutcome::NotConfigured,
        };
        if batch.is_empty() {
            return report;
        }
        metrics::counter!(names::FLUSHES_TOTAL).increment(1);

        if let Some(sink) = &self.metrics_sink {
            let samples: Vec<MetricSample> = batch
                .iter()
                .map(|span| derive_sample(span, &self.settings.metric_prefix))
                .collect();
            report.metrics = match sink.send(&samples).await {
                Ok(()) => SinkOutcome::Delivered,
                Err(e) => {
                    tracing::warn!(sink = sink.name(), samples = samples.len(), error = %e, "Metrics sink failed, batch discarded");
                    metrics::counter!(names::SINK_ERRORS_TOTAL, "sink" => sink.name()).increment(1);
                    SinkOutcome::Failed
                }
            };
        }

        if let Some(sink) = &self.trace_sink {
            report.traces = match sink.send(&batch).await {
                Ok(()) => SinkOutcome::Delivered,
                Err(e) => {
                    tracing::warn!(sink = sink.name(), spans = batch.len(), error = %e, "Trace sink failed, batch discarded");
                    metrics::counter!(names::SINK_ERRORS_TOTAL, "sink" => sink.name()).increment(1);
                    SinkOutcome::Failed
                }
            };
        }

        tracing::debug!(spans = report.spans, metrics = ?report.metrics, traces = ?report.traces, "Telemetry batch flushed");
        report
    }
}

/// Builder for [`TelemetryFunnel`].
pub struct FunnelBuilder {
    settings: FunnelSettings,
    trace_sink: Option<Arc<dyn TraceSink>>,
    metrics_sink: Option<Arc<dyn MetricsSink>>,
}

impl FunnelBuilder {
    pub fn trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace_sink = Some(sink);
        self
    }

    pub fn metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics_sink = Some(sink);
        self
    }

    pub fn build(self) -> TelemetryFunnel {
        TelemetryFunnel {
            shared: Arc::new(FunnelShared {
                settings: self.settings,
                pending: Mutex::new(Vec::new()),
                trace_sink: self.trace_sink,
                metrics_sink: self.metrics_sink,
                dropped: AtomicU64::new(0),
            }),
            timer: Shutdown::new(),
            task: Mutex::new(None),
        }
    }
}

/// Collects finished spans and periodically forwards them to the sinks.
///
/// As a registry component, `start` launches the flush timer and `stop` halts
/// it and flushes whatever is still pending.
pub struct TelemetryFunnel {
    shared: Arc<FunnelShared>,
    timer: Shutdown,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TelemetryFunnel {
    pub fn builder(settings: FunnelSettings) -> FunnelBuilder {
        FunnelBuilder {
            settings,
            trace_sink: None,
            metrics_sink: None,
        }
    }

    pub fn tracer(&self) -> Tracer {
        Tracer::new(self.shared.clone())
    }

    pub fn settings(&self) -> &FunnelSettings {
        &self.shared.settings
    }

    /// Number of spans waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        self.shared.lock_pending().len()
    }

    /// Detach the pending batch and deliver it to every configured sink.
    pub async fn flush(&self) -> FlushReport {
        self.shared.flush().await
    }
}

#[async_trait]
impl Component for TelemetryFunnel {
    async fn prepare(&self) -> Result<(), FatalError> {
        if self.shared.settings.send_interval.is_zero() {
            return Err(FatalError::Misconfigured("telemetry send interval must be positive".into()));
        }
        tracing::info!(
            service = %self.shared.settings.service_name,
            trace_sink = self.shared.trace_sink.as_ref().map(|s| s.name()).unwrap_or("none"),
            metrics_sink = self.shared.metrics_sink.as_ref().map(|s| s.name()).unwrap_or("none"),
            "Telemetry funnel ready"
        );
        Ok(())
    }

    async fn start(&self) -> Result<(), FatalError> {
        let shared = self.shared.clone();
        let timer = self.timer.clone();
        let interval = shared.settings.send_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            let stopped = timer.wait();
            tokio::pin!(stopped);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        shared.flush().await;
                    }
                    _ = &mut stopped => {
                        tracing::debug!("Telemetry flush timer stopped");
                        break;
                    }
                }
            }
        });

        *self.task.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
        tracing::info!(interval = ?interval, "Telemetry flush timer started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), StopError> {
        self.timer.trigger();
        let handle = self.task.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|e| StopError::Failed(format!("flush timer task failed: {}", e)))?;
        }
        let report = self.shared.flush().await;
        tracing::info!(spans = report.spans, "Final telemetry flush complete");
        Ok(())
    }
}
