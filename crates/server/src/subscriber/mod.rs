//! Subscriber service.
//!
//! Follows roots through the broker, keeps an index of their datasets and
//! serves regions of them. Chunks are fetched from the owning publisher the
//! first time they are needed and cached until the dataset changes.

mod db;
mod handlers;
mod index;
mod service;
mod state;

pub use db::RootsDb;
pub use handlers::{DownloadQuery, ListQuery};
pub use index::{Entry, MetadataIndex};
pub use service::Subscriber;
pub use state::SubscriberState;

use crate::metrics::metrics_handler;
use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Create the subscriber router.
pub fn create_router(state: SubscriberState) -> Router {
    let mut router = Router::new()
        .route("/api/roots", get(handlers::roots))
        .route("/api/list", get(handlers::list))
        .route("/api/follow", post(handlers::follow))
        .route("/api/unfollow", post(handlers::unfollow))
        .route("/api/info/{*path}", get(handlers::info))
        .route("/api/download/{*path}", get(handlers::download))
        .route("/api/url/{*path}", get(handlers::url))
        .route("/api/{topic}/download", get(handlers::download_topic));

    if state.config.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
