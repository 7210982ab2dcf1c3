//! Prometheus metrics for Roomcast
//!
//! Connection and room gauges, signaling request counters/latency and
//! broadcast delivery counters.

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Global metrics registry
static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// --- Connection Metrics ---

/// Open signaling connections.
pub static CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "signaling_connections_active",
        "Number of open signaling connections",
    )
    .expect("failed to create signaling_connections_active")
});

/// Signaling connections opened since start.
pub static CONNECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "signaling_connections_total",
        "Total number of signaling connections opened",
    )
    .expect("failed to create signaling_connections_total")
});

// --- Room Metrics ---

/// Rooms currently holding resources or members.
pub static ROOMS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("rooms_active", "Number of currently active rooms")
        .expect("failed to create rooms_active")
});

// --- Signaling Metrics ---

/// Requests handled, labeled by event and outcome (success/error).
pub static SIGNALING_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("signaling_requests_total", "Total number of signaling requests"),
        &["event", "outcome"],
    )
    .expect("failed to create signaling_requests_total")
});

/// Request handling time in seconds, labeled by event.
pub static SIGNALING_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "signaling_request_duration_seconds",
            "Signaling request handling duration in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        &["event"],
    )
    .expect("failed to create signaling_request_duration_seconds")
});

/// Broadcast deliveries, labeled delivered/dropped.
pub static BROADCASTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("broadcasts_total", "Room broadcast deliveries"),
        &["outcome"],
    )
    .expect("failed to create broadcasts_total")
});

/// Register all metrics with the registry.
fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(CONNECTIONS_ACTIVE.clone()))
        .expect("failed to register signaling_connections_active");
    registry
        .register(Box::new(CONNECTIONS_TOTAL.clone()))
        .expect("failed to register signaling_connections_total");
    registry
        .register(Box::new(ROOMS_ACTIVE.clone()))
        .expect("failed to register rooms_active");
    registry
        .register(Box::new(SIGNALING_REQUESTS_TOTAL.clone()))
        .expect("failed to register signaling_requests_total");
    registry
        .register(Box::new(SIGNALING_REQUEST_DURATION_SECONDS.clone()))
        .expect("failed to register signaling_request_duration_seconds");
    registry
        .register(Box::new(BROADCASTS_TOTAL.clone()))
        .expect("failed to register broadcasts_total");
}

/// Record the outcome and latency of one signaling request
pub fn record_request(event: &str, success: bool, elapsed: std::time::Duration) {
    let outcome = if success { "success" } else { "error" };
    SIGNALING_REQUESTS_TOTAL
        .with_label_values(&[event, outcome])
        .inc();
    SIGNALING_REQUEST_DURATION_SECONDS
        .with_label_values(&[event])
        .observe(elapsed.as_secs_f64());
}

pub fn record_broadcast(delivered: usize, dropped: usize) {
    BROADCASTS_TOTAL
        .with_label_values(&["delivered"])
        .inc_by(delivered as u64);
    BROADCASTS_TOTAL
        .with_label_values(&["dropped"])
        .inc_by(dropped as u64);
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
