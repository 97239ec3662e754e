//! Tracing setup shared by the service binaries.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `level` (from `--log-level`) is used
/// for the Tessera crates and `info` for everything else.
pub fn init_tracing(level: Option<&str>) {
    let fallback = match level {
        Some(level) => format!("info,tessera_server={level},tessera_storage={level},tessera_client={level},tower_http=info"),
        None => "info,tower_http=info".to_string(),
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
