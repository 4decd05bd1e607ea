//! Handler failures and the pluggable error handler.

use std::backtrace::Backtrace;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::observability::span::SpanRef;

/// A request handler failed.
///
/// Returned from handlers as `Err(HandlerError)`. Converting it to a response
/// yields the bare status and hands the error to the tracing middleware, which
/// records it on the request span and runs the configured [`ErrorHandler`].
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub status: StatusCode,
    pub message: String,
    /// Application error code, looked up in the error catalog.
    pub code: Option<u32>,
    captured: Arc<Backtrace>,
}

impl HandlerError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code: None,
            captured: Arc::new(Backtrace::force_capture()),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// Attach an application error code.
    pub fn with_code(mut self, code: u32) -> Self {
        self.code = Some(code);
        self
    }

    /// Stack captured where the error was created.
    pub fn stack(&self) -> &Backtrace {
        &self.captured
    }

    /// Bare status response, no body.
    pub(crate) fn status_response(&self) -> Response {
        self.status.into_response()
    }
}

/// Marker carried from a failed handler's response back to the middleware.
#[derive(Clone)]
pub(crate) struct HandlerFailure(pub(crate) Arc<HandlerError>);

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        let mut response = self.status_response();
        response.extensions_mut().insert(HandlerFailure(Arc::new(self)));
        response
    }
}

/// What the error handler may know about the failed request.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
}

/// Turns a handler failure into the response the client sees.
#[async_trait]
pub trait ErrorHandler: Send + Sync + 'static {
    async fn handle(&self, span: &SpanRef, request: &RequestInfo, error: &HandlerError) -> Result<Response, HandlerError>;
}
