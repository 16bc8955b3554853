//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("rustpond_http_requests_total", "Total number of HTTP requests"),
        &["method", "endpoint", "status"]
    ).expect("metric can be created");

    // Subscription Metrics
    pub static ref HUB_VERIFICATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("rustpond_hub_verifications_total", "Total number of hub challenge verifications"),
        &["outcome"]
    ).expect("metric can be created");
    pub static ref CONTENT_DELIVERIES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("rustpond_content_deliveries_total", "Total number of content deliveries received"),
        &["outcome"]
    ).expect("metric can be created");

    // Merge Metrics
    pub static ref MERGED_ENTRIES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("rustpond_merged_entries_total", "Total number of entries seen while merging"),
        &["result"]
    ).expect("metric can be created");

    // Fan-out Metrics
    pub static ref FANOUT_REPOSTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("rustpond_fanout_reposts_total", "Total number of follower reposts"),
        &["outcome"]
    ).expect("metric can be created");
    pub static ref HUB_PINGS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("rustpond_hub_pings_total", "Total number of hub publish notifications"),
        &["outcome"]
    ).expect("metric can be created");
    pub static ref FANOUT_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "rustpond_fanout_duration_seconds",
            "Time spent publishing one activity"
        ).buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["stage"]
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("rustpond_errors_total", "Total number of errors"),
        &["error_type"]
    ).expect("metric can be created");
}

/// Initialize metrics registry.
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .expect("HTTP_REQUESTS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(HUB_VERIFICATIONS_TOTAL.clone()))
        .expect("HUB_VERIFICATIONS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(CONTENT_DELIVERIES_TOTAL.clone()))
        .expect("CONTENT_DELIVERIES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(MERGED_ENTRIES_TOTAL.clone()))
        .expect("MERGED_ENTRIES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(FANOUT_REPOSTS_TOTAL.clone()))
        .expect("FANOUT_REPOSTS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(HUB_PINGS_TOTAL.clone()))
        .expect("HUB_PINGS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(FANOUT_DURATION_SECONDS.clone()))
        .expect("FANOUT_DURATION_SECONDS can be registered");
    REGISTRY
        .register(Box::new(ERRORS_TOTAL.clone()))
        .expect("ERRORS_TOTAL can be registered");

    tracing::info!("Metrics registry initialized");
}
