//! Tessera subscriber binary.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tessera_core::config::SubscriberConfig;
use tessera_server::config::{self, SUBSCRIBER_ENV_PREFIX};
use tessera_server::subscriber::{self, Subscriber};
use tessera_server::{metrics, shutdown_signal, telemetry};

/// Tessera subscriber: follows roots and serves regions of their datasets
#[derive(Parser, Debug)]
#[command(name = "tessera-sub")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "TESSERA_SUBSCRIBER_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address (`host:port`)
    #[arg(long)]
    http: Option<String>,

    /// Broker address (`host:port`)
    #[arg(long)]
    broker: Option<String>,

    /// Directory for the roots database and the chunk cache
    #[arg(long)]
    statedir: Option<PathBuf>,

    /// Log level for Tessera crates (ignored when RUST_LOG is set)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    telemetry::init_tracing(args.log_level.as_deref());
    tracing::info!("Tessera subscriber v{}", env!("CARGO_PKG_VERSION"));

    let mut config: SubscriberConfig =
        config::load(args.config.as_deref(), SUBSCRIBER_ENV_PREFIX)
            .context("failed to load configuration")?;
    if let Some(http) = args.http {
        config.http = http;
    }
    if let Some(broker) = args.broker {
        config.broker = broker;
    }
    if let Some(statedir) = args.statedir {
        config.statedir = statedir;
    }

    metrics::register_metrics();

    let addr = config.http.clone();
    let subscriber = Subscriber::start(config).await?;
    let app = subscriber::create_router(subscriber.state().clone());

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    subscriber.shutdown().await;
    Ok(())
}
