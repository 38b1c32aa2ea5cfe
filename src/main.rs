//! Request guard service.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ request id ─▶ trace ─▶ timeout
//!                                              │
//!                    ┌─────────────────────────▼──────────────────────────┐
//!                    │                 GUARD PIPELINE                       │
//!                    │  ┌───────────┐   ┌────────────┐   ┌─────────────┐  │
//!                    │  │ admission │──▶│ rate limit │──▶│  signature  │──┼──▶ handler
//!                    │  │ semaphore │   │  counters  │   │ HMAC-SHA256 │  │
//!                    │  └───────────┘   └─────┬──────┘   └─────────────┘  │
//!                    └────────────────────────┼───────────────────────────┘
//!                                             ▼
//!                                      Redis / memory
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use request_guard::config::validation::validate_config;
use request_guard::config::{load_config, ConfigError, GuardConfig};
use request_guard::lifecycle::{shutdown_signal, Shutdown};
use request_guard::observability::{init_logging, init_metrics};
use request_guard::{GuardPipeline, GuardServer};

#[derive(Parser)]
#[command(name = "request-guard")]
#[command(about = "Admission, rate limiting and request signing in front of an Axum service", long_about = None)]
struct Args {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long, env = "GUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => GuardConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }
    // load_config already validated the file; defaults and overrides still need it.
    validate_config(&config).map_err(ConfigError::Validation)?;

    init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "request-guard starting");
    if !config.signature.enabled {
        tracing::warn!("Signature verification disabled, requests are accepted unsigned");
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let pipeline = GuardPipeline::from_config(&config).await;

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.trigger();
        }
    });

    GuardServer::new(config, &pipeline)
        .run(listener, server_shutdown)
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
