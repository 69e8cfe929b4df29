//! Prometheus metrics for the satchel server.
//!
//! Exposes counters for ingestion, expiry sweeps and post-ingest processing.
//!
//! # Security Note
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! Metrics carry no owner ids, names or content ids, only aggregate counts.
//! Restrict the endpoint to scraper addresses at the network level.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Ingestion metrics
pub static UPLOADS_INGESTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "satchel_uploads_ingested_total",
        "Total number of uploads accepted and indexed",
    )
    .expect("metric creation failed")
});

pub static BYTES_INGESTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "satchel_bytes_ingested_total",
        "Total bytes written by accepted uploads",
    )
    .expect("metric creation failed")
});

pub static UPLOADS_REJECTED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "satchel_uploads_rejected_total",
            "Total uploads rejected, by reason",
        ),
        &["reason"],
    )
    .expect("metric creation failed")
});

pub static INGEST_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "satchel_ingest_duration_seconds",
            "Time taken to ingest a single upload",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
    )
    .expect("metric creation failed")
});

// Sweeper metrics
pub static SWEEP_CYCLES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "satchel_sweep_cycles_total",
        "Total number of expiry sweep cycles run",
    )
    .expect("metric creation failed")
});

pub static SWEEP_DELETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "satchel_sweep_deleted_total",
        "Total expired records removed from both storage and the index",
    )
    .expect("metric creation failed")
});

pub static SWEEP_ERRORS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "satchel_sweep_errors_total",
        "Total storage or index failures encountered while sweeping",
    )
    .expect("metric creation failed")
});

pub static SWEEP_BYTES_RECLAIMED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "satchel_sweep_bytes_reclaimed_total",
        "Total bytes reclaimed by expiry sweeps",
    )
    .expect("metric creation failed")
});

pub static ORPHANS_DELETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "satchel_orphans_deleted_total",
        "Total stored objects removed because no index record referenced them",
    )
    .expect("metric creation failed")
});

// Processing metrics
pub static PROCESSING_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "satchel_processing_failures_total",
            "Total post-ingest processing failures, by processor",
        ),
        &["processor"],
    )
    .expect("metric creation failed")
});

pub static PROCESSING_DROPPED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "satchel_processing_dropped_total",
        "Total post-ingest jobs dropped because the queue was full",
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so integration tests can build as many routers as they like.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(UPLOADS_INGESTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_INGESTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOADS_REJECTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(INGEST_DURATION.clone()))
            .expect("metric registration failed");

        REGISTRY
            .register(Box::new(SWEEP_CYCLES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SWEEP_DELETED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SWEEP_ERRORS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SWEEP_BYTES_RECLAIMED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ORPHANS_DELETED.clone()))
            .expect("metric registration failed");

        REGISTRY
            .register(Box::new(PROCESSING_FAILURES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(PROCESSING_DROPPED.clone()))
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

/// Record a rejected upload by reason.
pub fn record_rejection(reason: &str) {
    UPLOADS_REJECTED.with_label_values(&[reason]).inc();
}
