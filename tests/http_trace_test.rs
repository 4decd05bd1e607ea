//! HTTP server tracing, error handling and the traced client.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Router};

use service_runtime::http::{
    ClientError, ErrorCatalog, ErrorHandler, HandlerError, HttpClient, HttpServer, RequestInfo, SpanParams,
};
use service_runtime::lifecycle::{Component, FatalError};
use service_runtime::observability::{FunnelSettings, Span, SpanKind, SpanRef, TelemetryFunnel};

mod common;
use common::{start_recording_backend, CaptureMetricsSink, CaptureTraceSink};

async fn hello(Extension(parent): Extension<SpanRef>) -> &'static str {
    parent.child(SpanKind::Outbound, "redis:get").finish();
    "hello"
}

async fn echo(body: Bytes) -> Bytes {
    body
}

async fn broke() -> Result<&'static str, HandlerError> {
    Err(HandlerError::new(StatusCode::PAYMENT_REQUIRED, "balance too low").with_code(1001))
}

async fn missing() -> Result<&'static str, HandlerError> {
    Err(HandlerError::new(StatusCode::NOT_FOUND, "no such order"))
}

async fn boom() -> &'static str {
    panic!("kaboom")
}

fn router() -> Router {
    Router::new()
        .route("/hello", get(hello))
        .route("/echo", post(echo))
        .route("/broke", get(broke))
        .route("/missing", get(missing))
        .route("/boom", get(boom))
        .route("/health", get(|| async { "ok" }))
}

fn catalog() -> Arc<ErrorCatalog> {
    let mut table = HashMap::new();
    table.insert("404".to_string(), "Not found".to_string());
    table.insert("1001".to_string(), "Insufficient funds".to_string());
    Arc::new(ErrorCatalog::from_table(&table))
}

struct Running {
    server: HttpServer,
    funnel: TelemetryFunnel,
    traces: Arc<CaptureTraceSink>,
    metrics: Arc<CaptureMetricsSink>,
    addr: SocketAddr,
}

impl Running {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn spans(&self) -> Vec<Span> {
        self.funnel.flush().await;
        self.traces.spans()
    }

    fn request_span<'a>(spans: &'a [Span], name: &str) -> &'a Span {
        spans
            .iter()
            .find(|s| s.name == name && s.kind == SpanKind::Inbound)
            .unwrap_or_else(|| panic!("no inbound span named {}", name))
    }
}

async fn serve(error_handler: Arc<dyn ErrorHandler>) -> Running {
    let traces = Arc::new(CaptureTraceSink::default());
    let metrics = Arc::new(CaptureMetricsSink::default());
    let funnel = TelemetryFunnel::builder(FunnelSettings {
        metric_prefix: "svc.".into(),
        ..FunnelSettings::default()
    })
    .trace_sink(traces.clone())
    .metrics_sink(metrics.clone())
    .build();
    let server = HttpServer::new("127.0.0.1:0", router(), Duration::from_secs(2))
        .with_tracer(funnel.tracer())
        .with_error_handler(error_handler)
        .skip_trace("/health");
    server.prepare().await.unwrap();
    server.start().await.unwrap();
    let addr = server.local_addr().unwrap();
    Running {
        server,
        funnel,
        traces,
        metrics,
        addr,
    }
}

#[tokio::test]
async fn test_request_without_headers_opens_root_span() {
    let running = serve(catalog()).await;
    let response = reqwest::get(running.url("/hello")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "hello");

    let spans = running.spans().await;
    let span = Running::request_span(&spans, "GET /hello");
    assert!(span.parent_id.is_none());
    assert_eq!(span.tags.get("http.method").map(String::as_str), Some("GET"));
    assert_eq!(span.tags.get("http.path").map(String::as_str), Some("/hello"));
    assert_eq!(span.tags.get("http.status_code").map(String::as_str), Some("200"));
    assert_eq!(span.tags.get("http.response.size").map(String::as_str), Some("5"));
    assert_eq!(
        span.tags.get("http.host").cloned(),
        Some(running.addr.to_string())
    );

    let child = spans.iter().find(|s| s.name == "redis:get").unwrap();
    assert_eq!(child.parent_id, Some(span.span_id));
    assert_eq!(child.trace_id, span.trace_id);
    running.server.stop().await.unwrap();
}

#[tokio::test]
async fn test_untraced_request_yields_one_http_timer() {
    let running = serve(catalog()).await;
    let response = reqwest::get(running.url("/hello")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    running.spans().await;

    let lines = running.metrics.lines();
    let http: Vec<&String> = lines.iter().filter(|l| l.starts_with("svc.http")).collect();
    assert_eq!(http.len(), 1, "{:?}", lines);
    assert!(http[0].starts_with("svc.http,kind=in,"), "{}", http[0]);
    assert!(http[0].contains("status=200"), "{}", http[0]);
    assert!(http[0].contains("method=GET"), "{}", http[0]);
    assert!(http[0].ends_with("|ms|@1.0"), "{}", http[0]);
    // The redis child becomes a cache timer.
    assert!(lines.iter().any(|l| l.starts_with("svc.cache,kind=get:")), "{:?}", lines);
    running.server.stop().await.unwrap();
}

#[tokio::test]
async fn test_b3_headers_join_remote_trace() {
    let running = serve(catalog()).await;
    let client = reqwest::Client::new();
    client
        .post(running.url("/echo"))
        .header("X-B3-TraceId", "463ac35c9f6413ad48485a3953bb6124")
        .header("X-B3-SpanId", "a2fb4a1d1a96d312")
        .header("X-B3-Sampled", "1")
        .body("twelve bytes")
        .send()
        .await
        .unwrap();

    let spans = running.spans().await;
    let span = Running::request_span(&spans, "POST /echo");
    assert_eq!(span.trace_id.to_string(), "463ac35c9f6413ad48485a3953bb6124");
    assert_eq!(span.parent_id.map(|p| p.to_string()).as_deref(), Some("a2fb4a1d1a96d312"));
    assert_eq!(span.tags.get("http.request.size").map(String::as_str), Some("12"));
    running.server.stop().await.unwrap();
}

#[tokio::test]
async fn test_unsampled_request_is_not_recorded() {
    let running = serve(catalog()).await;
    reqwest::Client::new()
        .get(running.url("/hello"))
        .header("X-B3-Sampled", "0")
        .send()
        .await
        .unwrap();

    assert!(running.spans().await.is_empty());
    running.server.stop().await.unwrap();
}

#[tokio::test]
async fn test_handler_error_rendered_from_catalog() {
    let running = serve(catalog()).await;

    let response = reqwest::get(running.url("/broke")).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, serde_json::json!({"code": 1001, "message": "Insufficient funds"}));

    // Without a code the status doubles as the catalog key.
    let response = reqwest::get(running.url("/missing")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Not found");

    let spans = running.spans().await;
    let span = Running::request_span(&spans, "GET /broke");
    assert_eq!(span.tags.get("error").map(String::as_str), Some("true"));
    assert_eq!(span.tags.get("error.message").map(String::as_str), Some("balance too low"));
    assert_eq!(span.tags.get("http.status_code").map(String::as_str), Some("402"));
    assert!(!span.annotations.is_empty());
    running.server.stop().await.unwrap();
}

#[tokio::test]
async fn test_panic_becomes_500_and_span_finishes() {
    let running = serve(catalog()).await;

    let response = reqwest::get(running.url("/boom")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    // The server keeps serving after a panic.
    let response = reqwest::get(running.url("/hello")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let spans = running.spans().await;
    let span = Running::request_span(&spans, "GET /boom");
    assert_eq!(span.tags.get("error.message").map(String::as_str), Some("kaboom"));
    assert_eq!(span.tags.get("http.status_code").map(String::as_str), Some("500"));
    running.server.stop().await.unwrap();
}

struct FailingHandler;

#[async_trait]
impl ErrorHandler for FailingHandler {
    async fn handle(&self, _span: &SpanRef, _request: &RequestInfo, _error: &HandlerError) -> Result<Response, HandlerError> {
        Err(HandlerError::new(StatusCode::SERVICE_UNAVAILABLE, "renderer offline"))
    }
}

struct PanickingHandler;

#[async_trait]
impl ErrorHandler for PanickingHandler {
    async fn handle(&self, _span: &SpanRef, _request: &RequestInfo, _error: &HandlerError) -> Result<Response, HandlerError> {
        panic!("renderer exploded")
    }
}

#[tokio::test]
async fn test_failing_error_handler_uses_its_own_status() {
    let running = serve(Arc::new(FailingHandler)).await;
    let response = reqwest::get(running.url("/broke")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let spans = running.spans().await;
    let span = Running::request_span(&spans, "GET /broke");
    assert_eq!(span.tags.get("http.status_code").map(String::as_str), Some("503"));
    assert!(span.annotations.len() >= 2);
    running.server.stop().await.unwrap();
}

#[tokio::test]
async fn test_panicking_error_handler_yields_500() {
    let running = serve(Arc::new(PanickingHandler)).await;
    let response = reqwest::get(running.url("/broke")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let spans = running.spans().await;
    let span = Running::request_span(&spans, "GET /broke");
    assert!(span
        .annotations
        .iter()
        .any(|a| a.value.contains("renderer exploded")));
    running.server.stop().await.unwrap();
}

#[tokio::test]
async fn test_skipped_path_records_nothing() {
    let running = serve(catalog()).await;
    let response = reqwest::get(running.url("/health")).await.unwrap();
    assert_eq!(response.text().await.unwrap(), "ok");

    assert!(running.spans().await.is_empty());
    running.server.stop().await.unwrap();
}

#[tokio::test]
async fn test_busy_port_fails_prepare() {
    let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = taken.local_addr().unwrap();

    let server = HttpServer::new(addr.to_string(), router(), Duration::from_secs(1));
    let err = server.prepare().await.unwrap_err();
    assert!(matches!(err, FatalError::Io(_)));
}

#[tokio::test]
async fn test_stop_releases_port() {
    let running = serve(catalog()).await;
    let addr = running.addr;
    running.server.stop().await.unwrap();

    assert!(reqwest::get(running.url("/hello")).await.is_err());
    tokio::net::TcpListener::bind(addr).await.unwrap();
}

#[tokio::test]
async fn test_client_propagates_trace_and_tags_span() {
    let (backend, mut requests) = start_recording_backend(200, "pong").await;
    let traces = Arc::new(CaptureTraceSink::default());
    let funnel = TelemetryFunnel::builder(FunnelSettings::default())
        .trace_sink(traces.clone())
        .build();
    let client = HttpClient::new(Duration::from_secs(2));
    client.prepare().await.unwrap();

    let root = funnel.tracer().begin_span(SpanKind::Inbound, "job");
    let response = client
        .request(
            &root.scope(),
            &SpanParams::default().endpoint("billing").tag("api.method", "ping"),
            Method::GET,
            &format!("http://{}/ping?x=1", backend),
            None,
            HeaderMap::new(),
        )
        .await
        .unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(&response.body[..], b"pong");

    let head = requests.recv().await.unwrap().to_ascii_lowercase();
    let trace_id = root.context().unwrap().trace_id.to_string();
    assert!(head.contains(&format!("x-b3-traceid: {}", trace_id)), "{}", head);
    assert!(head.contains("x-b3-parentspanid: "), "{}", head);
    drop(root);

    funnel.flush().await;
    let spans = traces.spans();
    let span = spans.iter().find(|s| s.kind == SpanKind::Outbound).unwrap();
    assert_eq!(span.name, format!("GET {}", backend));
    assert_eq!(span.remote_endpoint.as_deref(), Some("billing"));
    assert_eq!(span.tags.get("http.path").map(String::as_str), Some("/ping"));
    assert_eq!(span.tags.get("http.status_code").map(String::as_str), Some("200"));
    assert_eq!(span.tags.get("http.response.size").map(String::as_str), Some("4"));
    assert_eq!(span.tags.get("api.method").map(String::as_str), Some("ping"));
}

#[tokio::test]
async fn test_client_failure_tags_error() {
    let free = common::free_addr().await;
    let traces = Arc::new(CaptureTraceSink::default());
    let funnel = TelemetryFunnel::builder(FunnelSettings::default())
        .trace_sink(traces.clone())
        .build();
    let client = HttpClient::new(Duration::from_secs(1));
    client.prepare().await.unwrap();

    let parent = SpanRef::root(funnel.tracer());
    let err = client
        .request(
            &parent,
            &SpanParams::named("call billing"),
            Method::POST,
            &format!("http://{}/charge", free),
            Some(Bytes::from_static(b"{}")),
            HeaderMap::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Request(_)));

    funnel.flush().await;
    let span = traces.spans().pop().unwrap();
    assert_eq!(span.name, "call billing");
    assert_eq!(span.tags.get("error").map(String::as_str), Some("true"));
    assert_eq!(span.tags.get("http.request.size").map(String::as_str), Some("2"));
}

#[tokio::test]
async fn test_client_requires_prepare() {
    let client = HttpClient::new(Duration::from_secs(1));
    let err = client
        .request(
            &SpanRef::detached(),
            &SpanParams::default(),
            Method::GET,
            "http://127.0.0.1:1/",
            None,
            HeaderMap::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::NotPrepared));
}
