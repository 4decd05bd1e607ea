//! Metric samples derived from finished spans.
//!
//! # Classes
//! ```text
//! has tag http.path        → http   (+ kind=in|out, allow-listed tags)
//! name starts with "db:"   → db     (+ kind=<suffix>)
//! name starts with "redis:"→ cache  (+ kind=<suffix>)
//! name == "sleep"          → timer
//! anything else            → the raw span name
//! ```

use crate::observability::sanitize::{sanitize_metric_name, sanitize_tag_value};
use crate::observability::span::{Span, SpanKind};
use crate::observability::tags;

pub const DB_MARKER: &str = "db:";
pub const CACHE_MARKER: &str = "redis:";
pub const TIMER_SENTINEL: &str = "sleep";

/// Span tags copied onto `http` samples, with their metric tag names.
const HTTP_TAG_ALLOW_LIST: &[(&str, &str)] = &[
    (tags::HTTP_STATUS_CODE, "status"),
    (tags::HTTP_METHOD, "method"),
    (tags::HTTP_HOST, "host"),
    ("api.key", "api_key"),
    ("api.method", "api_method"),
    ("api.code", "api_code"),
    ("api_merc.code", "api_merc_code"),
];

const SAMPLE_RATE: f64 = 1.0;

/// One timer sample for the metrics sink.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    /// Prefixed, sanitized metric name.
    pub name: String,
    /// Sanitized `key=value` pairs, in emission order.
    pub tags: Vec<String>,
    pub value_ms: u64,
    pub rate: f64,
}

impl MetricSample {
    /// StatsD line: `<name>[,k=v,...]:<ms>|ms|@<rate>`.
    pub fn to_line(&self) -> String {
        let mut line = self.name.clone();
        for tag in &self.tags {
            line.push(',');
            line.push_str(tag);
        }
        line.push_str(&format!(":{}|ms|@{:?}", self.value_ms, self.rate));
        line
    }
}

/// Coarse category of a span for metric naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanClass<'a> {
    Http,
    Db(&'a str),
    Cache(&'a str),
    Timer,
    Other(&'a str),
}

impl SpanClass<'_> {
    pub fn label(&self) -> &str {
        match self {
            SpanClass::Http => "http",
            SpanClass::Db(_) => "db",
            SpanClass::Cache(_) => "cache",
            SpanClass::Timer => "timer",
            SpanClass::Other(name) => name,
        }
    }
}

pub fn classify(span: &Span) -> SpanClass<'_> {
    if span.tags.contains_key(tags::HTTP_PATH) {
        SpanClass::Http
    } else if let Some(kind) = span.name.strip_prefix(DB_MARKER) {
        SpanClass::Db(kind)
    } else if let Some(kind) = span.name.strip_prefix(CACHE_MARKER) {
        SpanClass::Cache(kind)
    } else if span.name == TIMER_SENTINEL {
        SpanClass::Timer
    } else {
        SpanClass::Other(&span.name)
    }
}

/// Derive the metric sample for one span.
pub fn derive_sample(span: &Span, prefix: &str) -> MetricSample {
    let class = classify(span);
    let name = sanitize_metric_name(&format!("{}{}", prefix, class.label()));

    let mut raw_tags: Vec<(&str, &str)> = Vec::new();
    match class {
        SpanClass::Http => {
            raw_tags.push(match span.kind {
                SpanKind::Inbound => ("kind", "in"),
                SpanKind::Outbound => ("kind", "out"),
            });
            for (tag_key, tag_name) in HTTP_TAG_ALLOW_LIST {
                if let Some(value) = span.tags.get(*tag_key) {
                    raw_tags.push((*tag_name, value.as_str()));
                }
            }
        }
        SpanClass::Db(kind) | SpanClass::Cache(kind) => raw_tags.push(("kind", kind)),
        SpanClass::Timer | SpanClass::Other(_) => {}
    }

    MetricSample {
        name,
        tags: raw_tags
            .into_iter()
            .map(|(key, value)| format!("{}={}", key, sanitize_tag_value(value)))
            .collect(),
        value_ms: micros_to_millis(span.duration),
        rate: SAMPLE_RATE,
    }
}

/// Microseconds to whole milliseconds, rounding half up.
pub fn micros_to_millis(micros: u64) -> u64 {
    micros.saturating_add(500) / 1000
}
