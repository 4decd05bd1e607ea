//! Zipkin v2 trace sink.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use url::Url;

use crate::observability::sinks::{SinkError, TraceSink};
use crate::observability::span::{Annotation, Span};

const SPANS_PATH: &str = "api/v2/spans";

#[derive(Serialize)]
struct Endpoint<'a> {
    #[serde(rename = "serviceName")]
    service_name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ZipkinSpan<'a> {
    trace_id: String,
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_id: Option<String>,
    name: &'a str,
    kind: &'static str,
    timestamp: u64,
    duration: u64,
    local_endpoint: Endpoint<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote_endpoint: Option<Endpoint<'a>>,
    tags: &'a BTreeMap<String, String>,
    annotations: &'a [Annotation],
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    debug: bool,
}

/// Posts span batches to a Zipkin collector.
pub struct ZipkinSink {
    client: reqwest::Client,
    endpoint: Url,
    service_name: String,
}

impl ZipkinSink {
    /// `tracer_url` is the collector base, e.g. `http://localhost:9411/`.
    pub fn new(tracer_url: &str, service_name: &str, timeout: Duration) -> Result<Self, SinkError> {
        let mut base = tracer_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let endpoint = Url::parse(&base)
            .and_then(|u| u.join(SPANS_PATH))
            .map_err(|e| SinkError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            service_name: service_name.to_string(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Serialize a batch into the collector's JSON format.
    pub fn encode(&self, spans: &[Span]) -> Result<Vec<u8>, SinkError> {
        let records: Vec<ZipkinSpan<'_>> = spans
            .iter()
            .map(|span| ZipkinSpan {
                trace_id: span.trace_id.to_string(),
                id: span.span_id.to_string(),
                parent_id: span.parent_id.map(|p| p.to_string()),
                name: &span.name,
                kind: span.kind.as_str(),
                timestamp: span.timestamp,
                // Collectors drop zero-duration spans.
                duration: span.duration.max(1),
                local_endpoint: Endpoint {
                    service_name: &self.service_name,
                },
                remote_endpoint: span
                    .remote_endpoint
                    .as_deref()
                    .map(|service_name| Endpoint { service_name }),
                tags: &span.tags,
                annotations: &span.annotations,
                debug: span.debug,
            })
            .collect();
        Ok(serde_json::to_vec(&records)?)
    }
}

#[async_trait]
impl TraceSink for ZipkinSink {
    fn name(&self) -> &'static str {
        "zipkin"
    }

    async fn send(&self, spans: &[Span]) -> Result<(), SinkError> {
        let body = self.encode(spans)?;
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Rejected(status.as_u16()));
        }
        tracing::trace!(spans = spans.len(), "Zipkin batch accepted");
        Ok(())
    }
}
