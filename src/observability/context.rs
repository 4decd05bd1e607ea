//! Trace identifiers and B3 header propagation.
//!
//! # Headers
//! - `X-B3-TraceId`: 16 or 32 lower-hex characters
//! - `X-B3-SpanId`: 16 lower-hex characters
//! - `X-B3-ParentSpanId`: optional, 16 lower-hex characters
//! - `X-B3-Sampled`: `1`/`0` (also `true`/`false`)
//! - `X-B3-Flags`: `1` means debug

use std::fmt;

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use rand::Rng;

pub const TRACE_ID_HEADER: &str = "x-b3-traceid";
pub const SPAN_ID_HEADER: &str = "x-b3-spanid";
pub const PARENT_SPAN_ID_HEADER: &str = "x-b3-parentspanid";
pub const SAMPLED_HEADER: &str = "x-b3-sampled";
pub const FLAGS_HEADER: &str = "x-b3-flags";

/// Trace identifier. Remembers whether it arrived as 16 or 32 hex chars so
/// it is propagated at the same width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId {
    value: u128,
    wide: bool,
}

/// Span identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId(pub u64);

impl TraceId {
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        let hi: u64 = rng.gen_range(1..=u64::MAX);
        let lo: u64 = rng.gen();
        Self {
            value: ((hi as u128) << 64) | lo as u128,
            wide: true,
        }
    }

    /// 64-bit ids render as 16 hex chars, anything larger as 32.
    pub fn new(value: u128) -> Self {
        Self {
            value,
            wide: value >> 64 != 0,
        }
    }

    pub fn value(&self) -> u128 {
        self.value
    }

    pub fn parse(s: &str) -> Option<Self> {
        if !(s.len() == 16 || s.len() == 32) || !is_hex(s) {
            return None;
        }
        u128::from_str_radix(s, 16)
            .ok()
            .filter(|v| *v != 0)
            .map(|value| Self {
                value,
                wide: s.len() == 32,
            })
    }
}

impl SpanId {
    pub fn random() -> Self {
        Self(rand::thread_rng().gen_range(1..=u64::MAX))
    }

    pub fn parse(s: &str) -> Option<Self> {
        if s.len() != 16 || !is_hex(s) {
            return None;
        }
        u64::from_str_radix(s, 16).ok().filter(|v| *v != 0).map(Self)
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.wide {
            write!(f, "{:032x}", self.value)
        } else {
            write!(f, "{:016x}", self.value as u64)
        }
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Propagated identity of a span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_id: Option<SpanId>,
    /// `None` leaves the decision to the receiver.
    pub sampled: Option<bool>,
    pub debug: bool,
}

impl TraceContext {
    /// Decode a context from B3 headers. Returns `None` unless both the trace
    /// and span ids are present and well formed.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        Self::from_lookup(|name| headers.get(name).and_then(|v| v.to_str().ok()))
    }

    /// Decode a context from arbitrary key/value pairs (broker headers).
    /// Keys are matched case-insensitively.
    pub fn from_pairs(pairs: &[(String, String)]) -> Option<Self> {
        Self::from_lookup(|name| {
            pairs
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        })
    }

    fn from_lookup<'a>(get: impl Fn(&str) -> Option<&'a str>) -> Option<Self> {
        let trace_id = TraceId::parse(get(TRACE_ID_HEADER)?.trim())?;
        let span_id = SpanId::parse(get(SPAN_ID_HEADER)?.trim())?;
        let parent_id = get(PARENT_SPAN_ID_HEADER).and_then(|v| SpanId::parse(v.trim()));
        Some(Self {
            trace_id,
            span_id,
            parent_id,
            sampled: get(SAMPLED_HEADER).and_then(parse_flag),
            debug: get(FLAGS_HEADER).and_then(parse_flag).unwrap_or(false),
        })
    }

    /// Header pairs describing this context, for outbound propagation.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            (TRACE_ID_HEADER.to_string(), self.trace_id.to_string()),
            (SPAN_ID_HEADER.to_string(), self.span_id.to_string()),
        ];
        if let Some(parent) = self.parent_id {
            pairs.push((PARENT_SPAN_ID_HEADER.to_string(), parent.to_string()));
        }
        if let Some(sampled) = self.sampled {
            pairs.push((SAMPLED_HEADER.to_string(), if sampled { "1" } else { "0" }.to_string()));
        }
        if self.debug {
            pairs.push((FLAGS_HEADER.to_string(), "1".to_string()));
        }
        pairs
    }

    /// Write B3 headers into an outbound header map.
    pub fn inject(&self, headers: &mut HeaderMap) {
        for (name, value) in self.to_pairs() {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                headers.insert(name, value);
            }
        }
    }
}

/// The `X-B3-Sampled` flag of an inbound request without a valid context.
pub fn parse_sampled(headers: &HeaderMap) -> Option<bool> {
    headers
        .get(SAMPLED_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_flag)
}

/// The `X-B3-Flags` debug flag of an inbound request.
pub fn parse_debug(headers: &HeaderMap) -> bool {
    headers
        .get(FLAGS_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_flag)
        .unwrap_or(false)
}

// `from_str_radix` alone would also take a leading sign.
fn is_hex(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_hexdigit())
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "true" | "d" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_valid_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(TRACE_ID_HEADER, HeaderValue::from_static("463ac35c9f6413ad"));
        headers.insert(SPAN_ID_HEADER, HeaderValue::from_static("a2fb4a1d1a96d312"));
        headers.insert(SAMPLED_HEADER, HeaderValue::from_static("1"));

        let ctx = TraceContext::from_headers(&headers).unwrap();
        assert_eq!(ctx.trace_id.to_string(), "463ac35c9f6413ad");
        assert_eq!(ctx.span_id.to_string(), "a2fb4a1d1a96d312");
        assert_eq!(ctx.parent_id, None);
        assert_eq!(ctx.sampled, Some(true));
        assert!(!ctx.debug);
    }

    #[test]
    fn test_invalid_ids_are_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(TRACE_ID_HEADER, HeaderValue::from_static("not-hex"));
        headers.insert(SPAN_ID_HEADER, HeaderValue::from_static("a2fb4a1d1a96d312"));
        assert!(TraceContext::from_headers(&headers).is_none());

        let mut headers = HeaderMap::new();
        headers.insert(TRACE_ID_HEADER, HeaderValue::from_static("463ac35c9f6413ad"));
        assert!(TraceContext::from_headers(&headers).is_none());
    }

    #[test]
    fn test_inject_then_decode_keeps_identity() {
        let ctx = TraceContext {
            trace_id: TraceId::random(),
            span_id: SpanId::random(),
            parent_id: Some(SpanId::random()),
            sampled: Some(true),
            debug: true,
        };
        let mut headers = HeaderMap::new();
        ctx.inject(&mut headers);
        assert_eq!(TraceContext::from_headers(&headers), Some(ctx));
    }

    #[test]
    fn test_flags_without_context() {
        let mut headers = HeaderMap::new();
        headers.insert(SAMPLED_HEADER, HeaderValue::from_static("0"));
        headers.insert(FLAGS_HEADER, HeaderValue::from_static("1"));
        assert_eq!(parse_sampled(&headers), Some(false));
        assert!(parse_debug(&headers));
    }

    #[test]
    fn test_random_trace_id_renders_128_bits() {
        assert_eq!(TraceId::random().to_string().len(), 32);
        assert_eq!(SpanId::random().to_string().len(), 16);
    }

    #[test]
    fn test_trace_id_keeps_inbound_width() {
        let wide = TraceId::parse("0000000000000000463ac35c9f6413ad").unwrap();
        assert_eq!(wide.to_string(), "0000000000000000463ac35c9f6413ad");
        let narrow = TraceId::parse("463ac35c9f6413ad").unwrap();
        assert_eq!(narrow.to_string(), "463ac35c9f6413ad");
        assert_eq!(wide.value(), narrow.value());
    }

    #[test]
    fn test_signed_ids_are_rejected() {
        assert_eq!(TraceId::parse("+63ac35c9f6413ad"), None);
        assert_eq!(SpanId::parse("+2fb4a1d1a96d312"), None);
        assert_eq!(TraceId::parse("0000000000000000"), None);
    }
}
