//! Prometheus metrics for the curator server.
//!
//! The registry holds the HTTP-facing counters defined here plus the
//! lifecycle metrics from [`curator_lifecycle::metrics`].
//!
//! # Security Note
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! Labels carry namespaces and outcomes only, never keys or record ids.
//! Restrict network access to it at the infrastructure level.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{self, Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static RECONCILE_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "curator_reconcile_requests_total",
            "Reconcile requests received over the API, by mode",
        ),
        &["mode"],
    )
    .expect("metric creation failed")
});

pub static SCHEDULED_SWEEPS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "curator_scheduled_sweeps_total",
            "Sweeps started by the scheduler, by result",
        ),
        &["result"],
    )
    .expect("metric creation failed")
});

pub static ASSETS_SERVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "curator_assets_served_total",
        "Blobs served through /assets",
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so tests can build several routers in one process.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(RECONCILE_REQUESTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SCHEDULED_SWEEPS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ASSETS_SERVED.clone()))
            .expect("metric registration failed");
        curator_lifecycle::metrics::register(&REGISTRY).expect("metric registration failed");
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
