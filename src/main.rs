//! Service runtime.
//!
//! ```text
//!   config/main.toml ──▶ Application::build ──▶ ComponentRegistry
//!                                                   │
//!        ┌──────────────┬──────────────┬────────────┼──────────────┐
//!        ▼              ▼              ▼            ▼              ▼
//!   telemetry       http_cln        db_main       broker        http_srv
//!   (funnel)        (reqwest)       (sqlx)        (lapin)       (axum)
//!        ▲              │              │            │              │
//!        └──────────────┴── spans ─────┴────────────┴──────────────┘
//! ```
//!
//! SIGINT/SIGTERM trigger the registry's shutdown; components stop in
//! dependency order and the funnel flushes last.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use service_runtime::config::load_config;
use service_runtime::lifecycle::signals;
use service_runtime::observability::{logging, metrics};
use service_runtime::Application;

#[derive(Parser)]
#[command(name = "service-runtime")]
#[command(about = "Lifecycle-managed service runtime", long_about = None)]
struct Cli {
    /// Configuration file.
    #[arg(short, long, default_value = "config/main.toml")]
    config: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load {}: {}", cli.config.display(), e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init(&config.system.log_level) {
        eprintln!("failed to initialise logging: {}", e);
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build runtime");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async move {
        tracing::info!(version = env!("CARGO_PKG_VERSION"), config = %cli.config.display(), "service-runtime starting");

        if let Some(addr) = config.telemetry.as_ref().and_then(|t| t.metrics_address.as_deref()) {
            match addr.parse::<SocketAddr>() {
                Ok(addr) => {
                    if let Err(e) = metrics::init_metrics(addr) {
                        tracing::error!(error = %e, "Failed to start metrics exporter");
                    }
                }
                Err(e) => tracing::error!(metrics_address = %addr, error = %e, "Failed to parse metrics address"),
            }
        }

        let app = match Application::build(&config, axum::Router::new(), HashMap::new()).await {
            Ok(app) => app,
            Err(e) => {
                tracing::error!(error = %e, "Failed to assemble application");
                return ExitCode::FAILURE;
            }
        };
        signals::install(app.shutdown_handle());

        match app.run().await {
            Ok(()) => {
                tracing::info!("Shutdown complete");
                ExitCode::SUCCESS
            }
            Err(e) => {
                tracing::error!(error = %e, "Startup failed");
                ExitCode::FAILURE
            }
        }
    })
}
