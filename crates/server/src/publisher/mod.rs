//! Publisher service.
//!
//! Serves one directory tree (a root) over HTTP: listing, per-dataset
//! metadata with etag revalidation, and raw compressed chunks. Changes on
//! disk are announced on the root's topic through the broker.

mod handlers;
mod service;
mod state;
mod watcher;
mod worker;

pub use handlers::DownloadQuery;
pub use service::{Phase, Publisher};
pub use state::PublisherState;
pub use worker::{EventSink, PublishError, process};

use crate::metrics::metrics_handler;
use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;

/// Create the publisher router.
pub fn create_router(state: PublisherState) -> Router {
    let mut router = Router::new()
        .route("/api/list", get(handlers::list))
        .route("/api/info/{*path}", get(handlers::info))
        .route("/api/download/{*path}", get(handlers::download));

    if state.config.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
