//! Prometheus metrics for the Tessera services.
//!
//! All three services share one registry; each only moves the counters that
//! concern it. The `/metrics` endpoint is unauthenticated and should be
//! network-restricted to the scraper.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{self, Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Broker metrics
pub static ROOTS_REGISTERED: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "tessera_roots_registered",
        "Number of roots currently registered with the broker",
    )
    .expect("metric creation failed")
});

pub static PUBSUB_CONNECTIONS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "tessera_pubsub_connections",
        "Number of open pub/sub connections on the broker",
    )
    .expect("metric creation failed")
});

pub static EVENTS_RELAYED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tessera_events_relayed_total",
        "Total number of event frames delivered to followers",
    )
    .expect("metric creation failed")
});

// Publisher metrics
pub static EVENTS_PUBLISHED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tessera_events_published_total",
        "Total number of change events published",
    )
    .expect("metric creation failed")
});

pub static PUBLISH_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tessera_publish_failures_total",
        "Total number of work items dropped after a processing failure",
    )
    .expect("metric creation failed")
});

pub static CHUNKS_SERVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tessera_chunks_served_total",
        "Total number of compressed chunks served by the publisher",
    )
    .expect("metric creation failed")
});

// Subscriber metrics
pub static CHUNK_CACHE_HITS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tessera_chunk_cache_hits_total",
        "Total number of chunks served from the subscriber cache",
    )
    .expect("metric creation failed")
});

pub static CHUNK_CACHE_MISSES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tessera_chunk_cache_misses_total",
        "Total number of chunks fetched from a publisher",
    )
    .expect("metric creation failed")
});

pub static CHUNK_FETCH_BYTES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tessera_chunk_fetch_bytes_total",
        "Total compressed bytes fetched from publishers",
    )
    .expect("metric creation failed")
});

static REGISTER: Once = Once::new();

/// Register all metrics with the global registry. Safe to call repeatedly.
pub fn register_metrics() {
    REGISTER.call_once(|| {
        REGISTRY
            .register(Box::new(ROOTS_REGISTERED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(PUBSUB_CONNECTIONS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(EVENTS_RELAYED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(EVENTS_PUBLISHED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(PUBLISH_FAILURES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHUNKS_SERVED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHUNK_CACHE_HITS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHUNK_CACHE_MISSES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHUNK_FETCH_BYTES.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        // Panics if any metric creation failed or a name is registered twice.
        register_metrics();
        register_metrics();
    }

    #[tokio::test]
    async fn test_metrics_are_rendered() {
        register_metrics();
        EVENTS_PUBLISHED.inc();
        let response = metrics_handler().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("tessera_events_published_total"));
    }
}
