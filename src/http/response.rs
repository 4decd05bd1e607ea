//! Error catalog rendering `{"code": n, "message": "..."}` bodies.

use std::collections::HashMap;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::http::error::{ErrorHandler, HandlerError, RequestInfo};
use crate::observability::span::SpanRef;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub code: u32,
    pub message: String,
}

/// Application error codes and their messages, from the `[errors]` table.
#[derive(Debug, Clone, Default)]
pub struct ErrorCatalog {
    messages: HashMap<u32, String>,
}

impl ErrorCatalog {
    /// Keys that are not numeric codes are skipped.
    pub fn from_table(table: &HashMap<String, String>) -> Self {
        let messages = table
            .iter()
            .filter_map(|(code, message)| code.parse().ok().map(|code| (code, message.clone())))
            .collect();
        Self { messages }
    }

    pub fn message(&self, code: u32) -> Option<&str> {
        self.messages.get(&code).map(String::as_str)
    }

    pub fn body(&self, code: u32) -> Option<ErrorBody> {
        self.message(code).map(|message| ErrorBody {
            code,
            message: message.to_string(),
        })
    }

    /// JSON body for `code` with `status`, or the bare status if the code is unknown.
    pub fn respond(&self, status: StatusCode, code: u32) -> Response {
        match self.body(code) {
            Some(body) => (status, Json(body)).into_response(),
            None => status.into_response(),
        }
    }
}

/// Error handler answering from the catalog.
///
/// Uses the error's own code, or its HTTP status as the code.
#[async_trait]
impl ErrorHandler for ErrorCatalog {
    async fn handle(&self, _span: &SpanRef, request: &RequestInfo, error: &HandlerError) -> Result<Response, HandlerError> {
        let code = error.code.unwrap_or_else(|| u32::from(error.status.as_u16()));
        tracing::debug!(method = %request.method, path = %request.path, code, "Rendering catalog error");
        Ok(self.respond(error.status, code))
    }
}
