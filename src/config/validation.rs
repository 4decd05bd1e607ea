//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, pool sizes ordered, rates in range)
//! - Detect duplicate broker routes and unparseable addresses
//! - Check error catalog keys are numeric codes
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{ServiceConfig, TracerKind};

/// One semantic problem, with the offending field path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let system = &config.system;
    if system.shutdown_timeout_secs == 0 {
        errors.push(ValidationError::new("system.shutdown_timeout_secs", "must be positive"));
    }
    if system.request_timeout_secs == 0 {
        errors.push(ValidationError::new("system.request_timeout_secs", "must be positive"));
    }
    if system.pool_max_size == 0 {
        errors.push(ValidationError::new("system.pool_max_size", "must be positive"));
    }
    if system.pool_min_size > system.pool_max_size {
        errors.push(ValidationError::new(
            "system.pool_min_size",
            format!("{} exceeds pool_max_size {}", system.pool_min_size, system.pool_max_size),
        ));
    }

    if config.db.dbname.is_empty() {
        errors.push(ValidationError::new("db.dbname", "must not be empty"));
    }

    if let Some(broker) = &config.broker {
        if broker.exchange_name.is_empty() {
            errors.push(ValidationError::new("broker.exchange_name", "must not be empty"));
        }
        if broker.backoff_multiplier < 1.0 {
            errors.push(ValidationError::new("broker.backoff_multiplier", "must be at least 1.0"));
        }
        let mut queues = HashSet::new();
        for (i, route) in broker.routes.iter().enumerate() {
            if route.queue.is_empty() {
                errors.push(ValidationError::new(format!("broker.routes[{}].queue", i), "must not be empty"));
            } else if !queues.insert(route.queue.as_str()) {
                errors.push(ValidationError::new(
                    format!("broker.routes[{}].queue", i),
                    format!("duplicate queue '{}'", route.queue),
                ));
            }
        }
    }

    if let Some(telemetry) = &config.telemetry {
        if telemetry.send_interval_ms == 0 {
            errors.push(ValidationError::new("telemetry.send_interval_ms", "must be positive"));
        }
        if !(0.0..=1.0).contains(&telemetry.sample_rate) {
            errors.push(ValidationError::new("telemetry.sample_rate", "must be within 0.0..=1.0"));
        }
        if telemetry.tracer == TracerKind::Zipkin && url::Url::parse(&telemetry.tracer_url).is_err() {
            errors.push(ValidationError::new(
                "telemetry.tracer_url",
                format!("'{}' is not a valid URL", telemetry.tracer_url),
            ));
        }
        if let Some(addr) = &telemetry.statsd_addr {
            if let Err(e) = crate::observability::sinks::statsd::parse_addr(addr) {
                errors.push(ValidationError::new("telemetry.statsd_addr", e.to_string()));
            }
        }
        if let Some(addr) = &telemetry.metrics_address {
            if addr.parse::<SocketAddr>().is_err() {
                errors.push(ValidationError::new(
                    "telemetry.metrics_address",
                    format!("'{}' is not a socket address", addr),
                ));
            }
        }
    }

    for code in config.errors.keys() {
        if code.parse::<u32>().is_err() {
            errors.push(ValidationError::new(format!("errors.{}", code), "error codes must be numeric"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
