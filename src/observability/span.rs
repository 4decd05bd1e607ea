//! Span records and the scoped handles that produce them.
//!
//! A [`SpanHandle`] owns its span until [`SpanHandle::finish`] is called or the
//! handle is dropped, whichever happens first. Only the first finish records
//! the span; later calls do nothing.

use std::collections::BTreeMap;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use axum::http::HeaderMap;
use serde::Serialize;

use crate::observability::context::TraceContext;
use crate::observability::context::{SpanId, TraceId};
use crate::observability::tracer::Tracer;

/// Direction of the operation a span describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SpanKind {
    /// Work received from a caller (HTTP request served, message consumed).
    #[serde(rename = "SERVER")]
    Inbound,
    /// Work sent to a dependency (HTTP call, query, publish).
    #[serde(rename = "CLIENT")]
    Outbound,
}

impl SpanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanKind::Inbound => "SERVER",
            SpanKind::Outbound => "CLIENT",
        }
    }
}

/// A timestamped note attached to a span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Annotation {
    /// Microseconds since the Unix epoch.
    pub timestamp: u64,
    pub value: String,
}

/// A finished span, as held in the pending batch.
#[derive(Debug, Clone)]
pub struct Span {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_id: Option<SpanId>,
    pub kind: SpanKind,
    pub name: String,
    pub tags: BTreeMap<String, String>,
    pub annotations: Vec<Annotation>,
    /// Start time, microseconds since the Unix epoch.
    pub timestamp: u64,
    /// Duration in microseconds.
    pub duration: u64,
    pub remote_endpoint: Option<String>,
    pub debug: bool,
}

pub(crate) fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}

struct ActiveSpan {
    span: Span,
    started: Instant,
    context: TraceContext,
    tracer: Tracer,
}

/// Exclusive handle to an in-flight span.
pub struct SpanHandle {
    active: Option<ActiveSpan>,
    context: Option<TraceContext>,
    tracer: Option<Tracer>,
}

impl SpanHandle {
    pub(crate) fn start(tracer: Tracer, context: TraceContext, kind: SpanKind, name: &str) -> Self {
        let span = Span {
            trace_id: context.trace_id,
            span_id: context.span_id,
            parent_id: context.parent_id,
            kind,
            name: name.to_string(),
            tags: BTreeMap::new(),
            annotations: Vec::new(),
            timestamp: now_micros(),
            duration: 0,
            remote_endpoint: None,
            debug: context.debug,
        };
        Self {
            active: Some(ActiveSpan {
                span,
                started: Instant::now(),
                context: context.clone(),
                tracer: tracer.clone(),
            }),
            context: Some(context),
            tracer: Some(tracer),
        }
    }

    /// A handle that records nothing. Used where tracing is disabled.
    pub fn noop() -> Self {
        Self {
            active: None,
            context: None,
            tracer: None,
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        if let Some(active) = self.active.as_mut() {
            active.span.name = name.into();
        }
    }

    pub fn tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        if let Some(active) = self.active.as_mut() {
            active.span.tags.insert(key.into(), value.into());
        }
    }

    pub fn annotate(&mut self, text: impl Into<String>) {
        if let Some(active) = self.active.as_mut() {
            active.span.annotations.push(Annotation {
                timestamp: now_micros(),
                value: text.into(),
            });
        }
    }

    /// Name the service on the other side of an outbound call.
    pub fn remote_endpoint(&mut self, service: impl Into<String>) {
        if let Some(active) = self.active.as_mut() {
            active.span.remote_endpoint = Some(service.into());
        }
    }

    pub fn context(&self) -> Option<&TraceContext> {
        self.context.as_ref()
    }

    /// A cloneable reference for opening children of this span elsewhere.
    pub fn scope(&self) -> SpanRef {
        SpanRef {
            tracer: self.tracer.clone(),
            context: self.context.clone(),
        }
    }

    pub fn child(&self, kind: SpanKind, name: &str) -> SpanHandle {
        self.scope().child(kind, name)
    }

    pub fn is_finished(&self) -> bool {
        self.active.is_none()
    }

    /// Record the span with the funnel. Idempotent.
    pub fn finish(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        let ActiveSpan {
            mut span,
            started,
            context,
            tracer,
        } = active;
        span.duration = started.elapsed().as_micros() as u64;
        if context.sampled.unwrap_or(false) || context.debug {
            tracer.record(span);
        }
    }
}

impl Drop for SpanHandle {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Parent reference handed to code that opens child spans.
///
/// Inserted into request extensions by the HTTP tracing middleware.
#[derive(Clone, Default)]
pub struct SpanRef {
    tracer: Option<Tracer>,
    context: Option<TraceContext>,
}

impl SpanRef {
    /// A reference whose children record nothing.
    pub fn detached() -> Self {
        Self::default()
    }

    /// A reference that starts new root traces for its children.
    pub fn root(tracer: Tracer) -> Self {
        Self {
            tracer: Some(tracer),
            context: None,
        }
    }

    pub fn context(&self) -> Option<&TraceContext> {
        self.context.as_ref()
    }

    pub fn child(&self, kind: SpanKind, name: &str) -> SpanHandle {
        match (&self.tracer, &self.context) {
            (Some(tracer), Some(context)) => tracer.new_child(context, kind, name),
            (Some(tracer), None) => tracer.begin_span(kind, name),
            (None, _) => SpanHandle::noop(),
        }
    }

    /// Write this span's propagation headers.
    pub fn inject(&self, headers: &mut HeaderMap) {
        if let Some(context) = &self.context {
            context.inject(headers);
        }
    }
}
