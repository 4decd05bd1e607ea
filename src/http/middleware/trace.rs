//! Request tracing middleware.
//!
//! # Request path
//! ```text
//! B3 headers valid?  yes → child of the remote span
//!                    no  → new root trace (X-B3-Sampled / X-B3-Flags honoured)
//!     → tag method, path, host → insert SpanRef into extensions
//!     → handler (panics caught)
//!         ok             → tag status, response size
//!         HandlerError   → tag error + message, annotate stack → ErrorHandler
//!         panic          → same, fallback 500
//!     → finish span
//! ```

use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures_util::FutureExt;
use hyper::body::Body as _;

use crate::http::error::{ErrorHandler, HandlerError, HandlerFailure, RequestInfo};
use crate::observability::context::{parse_debug, parse_sampled, TraceContext};
use crate::observability::span::{SpanHandle, SpanKind};
use crate::observability::tags;
use crate::observability::tracer::Tracer;

/// Shared middleware configuration.
#[derive(Clone, Default)]
pub struct TraceState {
    pub tracer: Option<Tracer>,
    pub skip: Arc<HashSet<String>>,
    pub error_handler: Option<Arc<dyn ErrorHandler>>,
}

impl TraceState {
    fn open_span(&self, method: &str, path: &str, headers: &HeaderMap) -> SpanHandle {
        let Some(tracer) = &self.tracer else {
            return SpanHandle::noop();
        };
        if self.skip.contains(path) {
            return SpanHandle::noop();
        }
        let name = format!("{} {}", method, path);
        match TraceContext::from_headers(headers) {
            Some(remote) => tracer.new_child(&remote, SpanKind::Inbound, &name),
            None => tracer.new_trace(parse_sampled(headers), parse_debug(headers), SpanKind::Inbound, &name),
        }
    }

    async fn resolve_failure(
        &self,
        span: &mut SpanHandle,
        request: &RequestInfo,
        error: &HandlerError,
        fallback: Response,
    ) -> Response {
        span.tag(tags::ERROR, "true");
        span.tag(tags::ERROR_MESSAGE, error.message.as_str());
        span.annotate(error.stack().to_string());

        let Some(handler) = &self.error_handler else {
            return fallback;
        };
        let scope = span.scope();
        match AssertUnwindSafe(handler.handle(&scope, request, error)).catch_unwind().await {
            Ok(Ok(response)) => response,
            Ok(Err(failed)) => {
                tracing::error!(path = %request.path, error = %failed, "Error handler failed");
                span.annotate(failed.stack().to_string());
                failed.status_response()
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(path = %request.path, panic = %message, "Error handler panicked");
                span.annotate(format!("error handler panicked: {}", message));
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

fn request_host(request: &Request) -> Option<String> {
    request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().authority().map(|a| a.to_string()))
}

/// `axum::middleware::from_fn_with_state` entry point.
pub async fn trace_requests(State(state): State<TraceState>, mut request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let mut span = state.open_span(method.as_str(), &path, request.headers());
    span.tag(tags::HTTP_METHOD, method.as_str());
    span.tag(tags::HTTP_PATH, path.as_str());
    if let Some(host) = request_host(&request) {
        span.tag(tags::HTTP_HOST, host);
    }
    if let Some(size) = request.body().size_hint().exact().filter(|n| *n > 0) {
        span.tag(tags::HTTP_REQUEST_SIZE, size.to_string());
    }
    request.extensions_mut().insert(span.scope());

    let info = RequestInfo {
        method,
        path,
        headers: request.headers().clone(),
    };

    let response = match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(mut response) => match response.extensions_mut().remove::<HandlerFailure>() {
            None => response,
            Some(HandlerFailure(error)) => {
                tracing::warn!(method = %info.method, path = %info.path, status = %error.status, error = %error, "Handler failed");
                state.resolve_failure(&mut span, &info, &error, response).await
            }
        },
        Err(payload) => {
            let error = HandlerError::internal(panic_message(payload.as_ref()));
            tracing::error!(method = %info.method, path = %info.path, panic = %error, "Handler panicked");
            let fallback = StatusCode::INTERNAL_SERVER_ERROR.into_response();
            state.resolve_failure(&mut span, &info, &error, fallback).await
        }
    };

    span.tag(tags::HTTP_STATUS_CODE, response.status().as_u16().to_string());
    if let Some(size) = response.body().size_hint().exact() {
        span.tag(tags::HTTP_RESPONSE_SIZE, size.to_string());
    }
    span.finish();
    response
}
