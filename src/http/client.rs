//! Traced outbound HTTP client component.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{HeaderMap, Method, StatusCode};
use thiserror::Error;
use url::Url;

use crate::lifecycle::{Component, FatalError, StopError};
use crate::observability::span::{SpanKind, SpanRef};
use crate::observability::tags;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP client used before prepare")]
    NotPrepared,
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Per-call span customisation.
#[derive(Debug, Clone, Default)]
pub struct SpanParams {
    /// Span name; defaults to `"<METHOD> <host>"`.
    pub name: Option<String>,
    /// Remote service name.
    pub endpoint_name: Option<String>,
    pub tags: Vec<(String, String)>,
}

impl SpanParams {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn endpoint(mut self, endpoint_name: impl Into<String>) -> Self {
        self.endpoint_name = Some(endpoint_name.into());
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct ClientResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Pooled outbound client. Built during prepare.
pub struct HttpClient {
    timeout: Duration,
    client: OnceLock<reqwest::Client>,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            client: OnceLock::new(),
        }
    }

    /// Send a request inside an outbound child span of `parent`.
    pub async fn request(
        &self,
        parent: &SpanRef,
        params: &SpanParams,
        method: Method,
        url: &str,
        body: Option<Bytes>,
        mut headers: HeaderMap,
    ) -> Result<ClientResponse, ClientError> {
        let client = self.client.get().ok_or(ClientError::NotPrepared)?;
        let parsed = Url::parse(url)?;
        let host = match (parsed.host_str(), parsed.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => String::new(),
        };

        let name = params
            .name
            .clone()
            .unwrap_or_else(|| format!("{} {}", method, host));
        let mut span = parent.child(SpanKind::Outbound, &name);
        if let Some(endpoint) = &params.endpoint_name {
            span.remote_endpoint(endpoint.as_str());
        }
        for (key, value) in &params.tags {
            span.tag(key.as_str(), value.as_str());
        }
        span.tag(tags::HTTP_METHOD, method.as_str());
        span.tag(tags::HTTP_HOST, host);
        span.tag(tags::HTTP_PATH, parsed.path());
        span.tag(tags::HTTP_URL, url);
        if let Some(body) = body.as_ref().filter(|b| !b.is_empty()) {
            span.tag(tags::HTTP_REQUEST_SIZE, body.len().to_string());
        }
        span.scope().inject(&mut headers);

        let mut builder = client.request(method, parsed).headers(headers);
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let result = async {
            let response = builder.send().await?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>(ClientResponse { status, headers, body })
        }
        .await;

        match result {
            Ok(response) => {
                span.tag(tags::HTTP_STATUS_CODE, response.status.as_u16().to_string());
                span.tag(tags::HTTP_RESPONSE_SIZE, response.body.len().to_string());
                Ok(response)
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Outbound request failed");
                span.tag(tags::ERROR, "true");
                span.tag(tags::ERROR_MESSAGE, e.to_string());
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl Component for HttpClient {
    async fn prepare(&self) -> Result<(), FatalError> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.timeout)
            .build()
            .map_err(|e| FatalError::Failed(format!("HTTP client build failed: {}", e)))?;
        let _ = self.client.set(client);
        tracing::info!(timeout = ?self.timeout, "HTTP client ready");
        Ok(())
    }

    async fn start(&self) -> Result<(), FatalError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), StopError> {
        Ok(())
    }
}
