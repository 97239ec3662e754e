//! Tessera publisher binary.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tessera_core::config::PublisherConfig;
use tessera_server::config::{self, PUBLISHER_ENV_PREFIX};
use tessera_server::publisher::{self, Publisher};
use tessera_server::{metrics, shutdown_signal, telemetry};

/// Tessera publisher: serves a directory tree and announces its changes
#[derive(Parser, Debug)]
#[command(name = "tessera-pub")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "TESSERA_PUBLISHER_CONFIG")]
    config: Option<PathBuf>,

    /// Root name announced to the broker
    #[arg(long)]
    name: Option<String>,

    /// Directory to publish
    #[arg(long)]
    root: Option<PathBuf>,

    /// Listen address, also announced to the broker
    #[arg(long)]
    http: Option<String>,

    /// Broker address (`host:port`)
    #[arg(long)]
    broker: Option<String>,

    /// Directory for the ledger and compressed copies
    #[arg(long)]
    statedir: Option<PathBuf>,

    /// Number of publish workers
    #[arg(long)]
    nworkers: Option<usize>,

    /// Log level for Tessera crates (ignored when RUST_LOG is set)
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn apply(self, config: &mut PublisherConfig) {
        if let Some(name) = self.name {
            config.name = name;
        }
        if let Some(root) = self.root {
            config.root = root;
        }
        if let Some(http) = self.http {
            config.http = http;
        }
        if let Some(broker) = self.broker {
            config.broker = broker;
        }
        if let Some(statedir) = self.statedir {
            config.statedir = statedir;
        }
        if let Some(nworkers) = self.nworkers {
            config.nworkers = nworkers;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    telemetry::init_tracing(args.log_level.as_deref());
    tracing::info!("Tessera publisher v{}", env!("CARGO_PKG_VERSION"));

    let mut config: PublisherConfig =
        config::load(args.config.as_deref(), PUBLISHER_ENV_PREFIX)
            .context("failed to load configuration")?;
    args.apply(&mut config);

    metrics::register_metrics();

    // Bind first: the address is announced to the broker during startup.
    let listener = tokio::net::TcpListener::bind(&config.http)
        .await
        .with_context(|| format!("failed to bind to {}", config.http))?;
    tracing::info!("Listening on {}", config.http);

    let publisher = Publisher::start(config).await?;
    let app = publisher::create_router(publisher.state().clone());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    publisher.shutdown().await;
    Ok(())
}
