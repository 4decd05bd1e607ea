//! HTTP middleware.
//!
//! - `trace.rs`: one inbound span per request, B3 propagation, handler
//!   failure and panic resolution

pub mod trace;

pub use trace::{trace_requests, TraceState};
