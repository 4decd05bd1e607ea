//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound:
//!     TCP connection
//!     → server.rs (axum serve, graceful shutdown)
//!     → middleware/trace.rs (inbound span, failure resolution)
//!     → application router (handlers take Extension<SpanRef>)
//!     → error.rs / response.rs (HandlerError → ErrorHandler → catalog body)
//!
//! Outbound:
//!     client.rs (reqwest) inside an outbound child span, B3 headers injected
//! ```

pub mod client;
pub mod error;
pub mod middleware;
pub mod response;
pub mod server;

pub use client::{ClientError, ClientResponse, HttpClient, SpanParams};
pub use error::{ErrorHandler, HandlerError, RequestInfo};
pub use response::{ErrorBody, ErrorCatalog};
pub use server::HttpServer;
