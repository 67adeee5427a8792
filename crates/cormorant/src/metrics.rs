//! Prometheus metrics for the control plane.
//!
//! Counters and histograms live in the default registry and are exposed
//! as text at `GET /metrics`.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

/// HTTP requests by method, matched route, and status class.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "cormorant_http_requests_total",
        "HTTP requests processed",
        &["method", "path", "status"]
    )
    .expect("metric registration")
});

pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "cormorant_http_request_duration_seconds",
        "HTTP request duration",
        &["method", "path"]
    )
    .expect("metric registration")
});

pub static HTTP_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "cormorant_http_requests_in_flight",
        "HTTP requests currently being handled"
    )
    .expect("metric registration")
});

/// Command-service requests by command name and status.
pub static COMMANDS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "cormorant_commands_total",
        "Driver commands executed",
        &["command", "status"]
    )
    .expect("metric registration")
});

pub static COMMAND_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "cormorant_command_duration_seconds",
        "Driver command duration",
        &["command"]
    )
    .expect("metric registration")
});

pub static COMMAND_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "cormorant_command_errors_total",
        "Driver command errors by kind",
        &["command", "error_type"]
    )
    .expect("metric registration")
});

pub static IDEMPOTENCY_CACHE_HITS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "cormorant_idempotency_cache_hits_total",
        "Idempotency cache hits (replayed responses)"
    )
    .expect("metric registration")
});

pub static IDEMPOTENCY_CACHE_MISSES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "cormorant_idempotency_cache_misses_total",
        "Idempotency cache misses"
    )
    .expect("metric registration")
});

pub static IDEMPOTENCY_CACHE_CONFLICTS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "cormorant_idempotency_cache_conflicts_total",
        "Idempotency key reuse with mismatched method, endpoint, or body"
    )
    .expect("metric registration")
});

pub static BRANCH_COW_OPERATIONS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "cormorant_branch_cow_operations_total",
        "Copy-on-write materializations"
    )
    .expect("metric registration")
});

pub static ACTIVE_TABLE_LOCKS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "cormorant_active_table_locks",
        "Table mutexes currently held by a writer"
    )
    .expect("metric registration")
});

/// Render the default registry in the text exposition format.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    encoder
        .encode_to_string(&prometheus::gather())
        .unwrap_or_default()
}
