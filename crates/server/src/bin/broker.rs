//! Tessera broker binary.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tessera_core::config::BrokerConfig;
use tessera_server::broker::{self, BrokerState};
use tessera_server::config::{self, BROKER_ENV_PREFIX};
use tessera_server::{metrics, shutdown_signal, telemetry};

/// Tessera broker: root registry and pub/sub relay
#[derive(Parser, Debug)]
#[command(name = "tessera-broker")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "TESSERA_BROKER_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address (`host:port`)
    #[arg(long)]
    http: Option<String>,

    /// Log level for Tessera crates (ignored when RUST_LOG is set)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    telemetry::init_tracing(args.log_level.as_deref());
    tracing::info!("Tessera broker v{}", env!("CARGO_PKG_VERSION"));

    let mut config: BrokerConfig = config::load(args.config.as_deref(), BROKER_ENV_PREFIX)
        .context("failed to load configuration")?;
    if let Some(http) = args.http {
        config.http = http;
    }

    metrics::register_metrics();

    let addr = config.http.clone();
    let app = broker::create_router(BrokerState::new(config));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
