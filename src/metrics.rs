//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("scrapevault_http_requests_total", "Total number of dashboard API requests"),
        &["method", "endpoint"]
    ).expect("metric can be created");

    // Record Store Metrics
    pub static ref STORE_OPERATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("scrapevault_store_operations_total", "Total number of record store operations"),
        &["operation", "collection"]
    ).expect("metric can be created");
    pub static ref STORE_OPERATION_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "scrapevault_store_operation_duration_seconds",
            "Record store operation duration in seconds"
        ).buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        &["operation", "collection"]
    ).expect("metric can be created");
    pub static ref RECORDS_TOTAL: IntGaugeVec = IntGaugeVec::new(
        Opts::new("scrapevault_records_total", "Records per collection at last statistics pass"),
        &["collection"]
    ).expect("metric can be created");

    // Thumbnail Cache Metrics
    pub static ref CACHE_HITS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("scrapevault_cache_hits_total", "Total number of thumbnail cache hits"),
        &["kind"]
    ).expect("metric can be created");
    pub static ref CACHE_MISSES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("scrapevault_cache_misses_total", "Total number of thumbnail cache misses"),
        &["kind"]
    ).expect("metric can be created");
    pub static ref THUMBNAIL_FETCHES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("scrapevault_thumbnail_fetches_total", "Thumbnail network fetches by outcome"),
        &["outcome"]
    ).expect("metric can be created");
    pub static ref RECOMPRESSION_BYTES_SAVED: IntCounter = IntCounter::new(
        "scrapevault_recompression_bytes_saved_total",
        "Bytes saved by thumbnail recompression"
    ).expect("metric can be created");

    // Statistics Metrics
    pub static ref STATS_COMPUTATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("scrapevault_stats_computations_total", "Statistics computations by tier and outcome"),
        &["tier", "outcome"]
    ).expect("metric can be created");
    pub static ref STATS_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "scrapevault_stats_duration_seconds",
            "Statistics computation duration in seconds"
        ).buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0]),
        &["tier"]
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("scrapevault_errors_total", "Total number of surfaced errors"),
        &["error_type"]
    ).expect("metric can be created");
}

/// Record one record store operation and its latency.
pub fn observe_store_operation(operation: &str, collection: &str, elapsed: std::time::Duration) {
    STORE_OPERATIONS_TOTAL
        .with_label_values(&[operation, collection])
        .inc();
    STORE_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation, collection])
        .observe(elapsed.as_secs_f64());
}

/// Initialize metrics registry.
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .expect("HTTP_REQUESTS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(STORE_OPERATIONS_TOTAL.clone()))
        .expect("STORE_OPERATIONS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(STORE_OPERATION_DURATION_SECONDS.clone()))
        .expect("STORE_OPERATION_DURATION_SECONDS can be registered");
    REGISTRY
        .register(Box::new(RECORDS_TOTAL.clone()))
        .expect("RECORDS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(CACHE_HITS_TOTAL.clone()))
        .expect("CACHE_HITS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(CACHE_MISSES_TOTAL.clone()))
        .expect("CACHE_MISSES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(THUMBNAIL_FETCHES_TOTAL.clone()))
        .expect("THUMBNAIL_FETCHES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(RECOMPRESSION_BYTES_SAVED.clone()))
        .expect("RECOMPRESSION_BYTES_SAVED can be registered");
    REGISTRY
        .register(Box::new(STATS_COMPUTATIONS_TOTAL.clone()))
        .expect("STATS_COMPUTATIONS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(STATS_DURATION_SECONDS.clone()))
        .expect("STATS_DURATION_SECONDS can be registered");
    REGISTRY
        .register(Box::new(ERRORS_TOTAL.clone()))
        .expect("ERRORS_TOTAL can be registered");

    tracing::info!("Metrics registry initialized");
}
