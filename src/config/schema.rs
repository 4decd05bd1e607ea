//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files, and
//! every field has a default so a minimal file is enough to start.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Listener, logging and pool sizing settings.
    pub system: SystemConfig,

    /// Main database connection.
    pub db: DbConfig,

    /// Message broker. Absent means no queue consumer is attached.
    pub broker: Option<BrokerConfig>,

    /// Tracing and metrics. Absent means spans are discarded.
    pub telemetry: Option<TelemetryConfig>,

    /// Application error catalog: numeric code → message.
    pub errors: HashMap<String, String>,
}

/// `[system]` section.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SystemConfig {
    /// HTTP bind host.
    pub host: String,
    /// HTTP bind port.
    pub port: u16,
    /// Default filter directive when `RUST_LOG` is not set.
    pub log_level: String,
    /// Outbound HTTP request timeout.
    pub request_timeout_secs: u64,
    /// Upper bound on the HTTP server's graceful shutdown.
    pub shutdown_timeout_secs: u64,
    pub pool_min_size: u32,
    pub pool_max_size: u32,
    /// Connections idle for longer than this are closed.
    pub pool_max_inactive_connection_lifetime_secs: u64,
    pub pool_acquire_timeout_secs: u64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            log_level: "info".to_string(),
            request_timeout_secs: 30,
            shutdown_timeout_secs: 30,
            pool_min_size: 1,
            pool_max_size: 10,
            pool_max_inactive_connection_lifetime_secs: 300,
            pool_acquire_timeout_secs: 10,
        }
    }
}

impl SystemConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// `[db]` section.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub dbname: String,
    /// Connect attempts before startup is aborted.
    pub connect_max_attempts: u32,
    /// Fixed delay between connect attempts.
    pub connect_retry_delay_secs: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            username: "postgres".to_string(),
            password: String::new(),
            dbname: "postgres".to_string(),
            connect_max_attempts: 10,
            connect_retry_delay_secs: 1,
        }
    }
}

impl DbConfig {
    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_secs(self.connect_retry_delay_secs)
    }
}

/// `[broker]` section.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub virtualhost: String,
    pub login: String,
    pub password: String,
    /// Topic exchange every queue is bound to.
    pub exchange_name: String,
    pub exchange_durable: bool,
    pub queue_durable: bool,
    /// Consumed queues. Each is bound with its own name as routing key.
    pub routes: Vec<BrokerRoute>,
    pub backoff_initial_ms: u64,
    pub backoff_multiplier: f64,
    pub backoff_max_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5672,
            virtualhost: "/".to_string(),
            login: "guest".to_string(),
            password: "guest".to_string(),
            exchange_name: "events".to_string(),
            exchange_durable: true,
            queue_durable: true,
            routes: Vec::new(),
            backoff_initial_ms: 1500,
            backoff_multiplier: 1.5,
            backoff_max_secs: 30,
        }
    }
}

impl BrokerConfig {
    /// AMQP URI; the virtual host is percent-encoded (`/` → `%2f`).
    pub fn uri(&self) -> String {
        let vhost: String = url::form_urlencoded::byte_serialize(self.virtualhost.as_bytes()).collect();
        format!(
            "amqp://{}:{}@{}:{}/{}",
            self.login, self.password, self.host, self.port, vhost
        )
    }
}

/// One `[[broker.routes]]` entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerRoute {
    /// Name of the handler the queue is dispatched to.
    pub name: String,
    pub queue: String,
}

/// Which trace sink to use.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TracerKind {
    #[default]
    Zipkin,
    None,
}

/// `[telemetry]` section.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub tracer: TracerKind,
    /// Local service name on every span.
    pub service_name: String,
    /// Zipkin base URL; spans are posted to `<tracer_url>/api/v2/spans`.
    pub tracer_url: String,
    /// StatsD `host[:port]`. Absent disables the metrics sink.
    pub statsd_addr: Option<String>,
    pub statsd_prefix: String,
    pub send_interval_ms: u64,
    pub max_pending: usize,
    pub sample_rate: f64,
    /// Prometheus scrape listener for runtime counters.
    pub metrics_address: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            tracer: TracerKind::Zipkin,
            service_name: "service".to_string(),
            tracer_url: "http://localhost:9411".to_string(),
            statsd_addr: None,
            statsd_prefix: String::new(),
            send_interval_ms: 5000,
            max_pending: 10_000,
            sample_rate: 1.0,
            metrics_address: None,
        }
    }
}

impl TelemetryConfig {
    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }
}
