//! Broker service: root registry plus topic-based pub/sub relay.
//!
//! The broker keeps no persistent state. Publishers register their root over
//! HTTP; every registration is announced on the `@new` topic. Messages are
//! only delivered to connections following the topic at publish time.

mod handlers;
mod pubsub;
mod state;

pub use handlers::RegisterRootRequest;
pub use state::BrokerState;

use crate::metrics::metrics_handler;
use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;

/// Create the broker router.
pub fn create_router(state: BrokerState) -> Router {
    let mut router = Router::new()
        .route(
            "/api/roots",
            get(handlers::list_roots).post(handlers::register_root),
        )
        .route("/pubsub", get(pubsub::pubsub));

    if state.config.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
