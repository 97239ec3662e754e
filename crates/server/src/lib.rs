//! HTTP services for on-demand access to chunked array datasets.
//!
//! This crate provides the three Tessera services:
//! - Broker: root registry and topic-based pub/sub relay
//! - Publisher: serves one directory tree chunk by chunk and announces changes
//! - Subscriber: follows roots and serves regions from a local chunk cache

pub mod broker;
pub mod config;
pub mod error;
pub mod metrics;
pub mod publisher;
pub mod subscriber;
pub mod telemetry;

pub use error::{ApiError, ApiResult};

/// Resolve when the process receives Ctrl-C (or SIGTERM on unix).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
