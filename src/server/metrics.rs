use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

use crate::catalog_store::CatalogCounts;

/// Metric name prefix for all catalog server metrics
const PREFIX: &str = "shopcatalog";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Catalog Metrics
    pub static ref CATALOG_ITEMS_TOTAL: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_catalog_items_total"), "Total live items in the catalog"),
        &["type"]
    ).expect("Failed to create catalog_items_total metric");

    // Image Event Metrics
    pub static ref IMAGE_EVENTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            format!("{PREFIX}_image_events_total"),
            "Image events processed by event type and outcome"
        ),
        &["event", "outcome"]
    ).expect("Failed to create image_events_total metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(CATALOG_ITEMS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(IMAGE_EVENTS_TOTAL.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Set the catalog entity-count gauges
pub fn init_catalog_metrics(counts: &CatalogCounts) {
    CATALOG_ITEMS_TOTAL
        .with_label_values(&["category"])
        .set(counts.categories as f64);
    CATALOG_ITEMS_TOTAL
        .with_label_values(&["product"])
        .set(counts.products as f64);
    CATALOG_ITEMS_TOTAL
        .with_label_values(&["branch"])
        .set(counts.branches as f64);
    CATALOG_ITEMS_TOTAL
        .with_label_values(&["branch_product"])
        .set(counts.branch_products as f64);

    tracing::info!(
        "Catalog metrics initialized: {} categories, {} products, {} branches, {} listings",
        counts.categories,
        counts.products,
        counts.branches,
        counts.branch_products
    );
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

/// Record the outcome of one image event
pub fn record_image_event(event: &str, outcome: &str) {
    IMAGE_EVENTS_TOTAL.with_label_values(&[event, outcome]).inc();
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_else(|_| String::from(""));
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
