//! Character-class rules for metric names and tag values.
//!
//! Metric names keep `[0-9A-Za-z_.-]`, tag values keep `[0-9A-Za-z_=.-]`.
//! Everything else is removed after the substitutions below are applied.

/// Sanitize a metric name: spaces become `_`, then anything outside
/// `[0-9A-Za-z_.-]` is dropped.
pub fn sanitize_metric_name(name: &str) -> String {
    name.chars()
        .map(|c| if c == ' ' { '_' } else { c })
        .filter(|c| is_name_char(*c))
        .collect()
}

/// Sanitize a tag value: `:` becomes `-`, then anything outside
/// `[0-9A-Za-z_=.-]` is dropped.
pub fn sanitize_tag_value(value: &str) -> String {
    value
        .chars()
        .map(|c| if c == ':' { '-' } else { c })
        .filter(|c| is_name_char(*c) || *c == '=')
        .collect()
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}
