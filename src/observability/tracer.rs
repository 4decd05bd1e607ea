//! Span factory bound to a telemetry funnel.

use std::sync::Arc;

use crate::observability::context::{SpanId, TraceContext, TraceId};
use crate::observability::funnel::FunnelShared;
use crate::observability::span::{Span, SpanHandle, SpanKind};

/// Cheap, cloneable entry point for creating spans.
#[derive(Clone)]
pub struct Tracer {
    shared: Arc<FunnelShared>,
}

impl Tracer {
    pub(crate) fn new(shared: Arc<FunnelShared>) -> Self {
        Self { shared }
    }

    /// Start a span in a fresh root trace, sampled per the configured rate.
    pub fn begin_span(&self, kind: SpanKind, name: &str) -> SpanHandle {
        self.new_trace(None, false, kind, name)
    }

    /// Start a root span honouring sampling flags from an inbound request.
    pub fn new_trace(&self, sampled: Option<bool>, debug: bool, kind: SpanKind, name: &str) -> SpanHandle {
        let sampled = sampled.unwrap_or_else(|| self.shared.sample());
        let context = TraceContext {
            trace_id: TraceId::random(),
            span_id: SpanId::random(),
            parent_id: None,
            sampled: Some(sampled),
            debug,
        };
        SpanHandle::start(self.clone(), context, kind, name)
    }

    /// Start a span whose parent is `parent` (local or remote).
    pub fn new_child(&self, parent: &TraceContext, kind: SpanKind, name: &str) -> SpanHandle {
        let sampled = parent.sampled.unwrap_or_else(|| self.shared.sample());
        let context = TraceContext {
            trace_id: parent.trace_id,
            span_id: SpanId::random(),
            parent_id: Some(parent.span_id),
            sampled: Some(sampled),
            debug: parent.debug,
        };
        SpanHandle::start(self.clone(), context, kind, name)
    }

    pub fn service_name(&self) -> &str {
        &self.shared.settings().service_name
    }

    pub(crate) fn record(&self, span: Span) {
        self.shared.record(span);
    }
}
