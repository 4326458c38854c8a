//! Metrics module for metering-service.
//! Provides Prometheus metrics for aggregation queries and per-tenant ingestion.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec,
    IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Store query duration histogram
pub static QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "metering_query_duration_seconds",
            "Usage store query duration",
            vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
        ),
        &["operation"]
    )
    .expect("Failed to register QUERY_DURATION")
});

/// Feature usage rows appended (per-tenant metering)
pub static ROWS_APPENDED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Failed write batches (per-tenant metering)
pub static BATCH_FAILURES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Aggregations computed by type
pub static AGGREGATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Error counter for alerting
pub static ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    ROWS_APPENDED_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "metering_rows_appended_total",
                "Total feature usage rows appended by tenant"
            ),
            &["tenant_id"]
        )
        .expect("Failed to register ROWS_APPENDED_TOTAL")
    });

    BATCH_FAILURES_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "metering_batch_failures_total",
                "Total rejected write batches by tenant"
            ),
            &["tenant_id"]
        )
        .expect("Failed to register BATCH_FAILURES_TOTAL")
    });

    AGGREGATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "metering_aggregations_total",
                "Total aggregations computed by aggregation type"
            ),
            &["aggregation_type"]
        )
        .expect("Failed to register AGGREGATIONS_TOTAL")
    });

    ERRORS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("metering_errors_total", "Total errors by type for alerting"),
            &["operation", "error_type"]
        )
        .expect("Failed to register ERRORS_TOTAL")
    });

    // Force initialization of lazy statics
    let _ = &*QUERY_DURATION;
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record appended rows for a tenant.
pub fn record_rows_appended(tenant_id: &str, rows: usize) {
    if let Some(counter) = ROWS_APPENDED_TOTAL.get() {
        counter
            .with_label_values(&[tenant_id])
            .inc_by(rows as u64);
    }
}

/// Record a rejected write batch.
pub fn record_batch_failure(tenant_id: &str) {
    if let Some(counter) = BATCH_FAILURES_TOTAL.get() {
        counter.with_label_values(&[tenant_id]).inc();
    }
}

/// Record a computed aggregation.
pub fn record_aggregation(aggregation_type: &str) {
    if let Some(counter) = AGGREGATIONS_TOTAL.get() {
        counter.with_label_values(&[aggregation_type]).inc();
    }
}

/// Record an error for alerting.
pub fn record_error(operation: &str, error_type: &str) {
    if let Some(counter) = ERRORS_TOTAL.get() {
        counter.with_label_values(&[operation, error_type]).inc();
    }
}
