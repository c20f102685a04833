use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

use crate::catalog_store::CatalogCounts;

/// Metric name prefix for all catalog metrics
const PREFIX: &str = "lego_catalog";

lazy_static! {
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

    // Authentication Metrics
    pub static ref AUTH_LOGIN_ATTEMPTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_auth_login_attempts_total"), "Total login attempts"),
        &["status"]
    ).expect("Failed to create auth_login_attempts_total metric");

    pub static ref AUTH_LOGIN_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            format!("{PREFIX}_auth_login_duration_seconds"),
            "Login request duration in seconds"
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0])
    ).expect("Failed to create auth_login_duration_seconds metric");

    // Catalog Metrics
    pub static ref CATALOG_ITEMS_TOTAL: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_catalog_items_total"), "Total items in catalog"),
        &["type"]
    ).expect("Failed to create catalog_items_total metric");

    // Sync Metrics
    pub static ref SYNC_CHANGES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            format!("{PREFIX}_sync_changes_total"),
            "Catalog entities created or updated by set syncs"
        ),
        &["entity", "change"]
    ).expect("Failed to create sync_changes_total metric");

    pub static ref EXTERNAL_API_ERRORS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            format!("{PREFIX}_external_api_errors_total"),
            "Failed calls to the catalog API"
        ),
        &["kind"]
    ).expect("Failed to create external_api_errors_total metric");

    // Image Pipeline Metrics
    pub static ref IMAGE_TASKS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_image_tasks_total"), "Image tasks run by status"),
        &["task", "status"]
    ).expect("Failed to create image_tasks_total metric");

    pub static ref IMAGES_PROCESSED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_images_processed_total"), "Image downloads by outcome"),
        &["outcome"]
    ).expect("Failed to create images_processed_total metric");

    pub static ref IMAGE_QUEUE_READY: Gauge = Gauge::new(
        format!("{PREFIX}_image_queue_ready"),
        "Image tasks waiting to run"
    ).expect("Failed to create image_queue_ready metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(AUTH_LOGIN_ATTEMPTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(AUTH_LOGIN_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(CATALOG_ITEMS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(SYNC_CHANGES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(EXTERNAL_API_ERRORS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(IMAGE_TASKS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(IMAGES_PROCESSED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(IMAGE_QUEUE_READY.clone()));

    tracing::info!("Metrics system initialized successfully");
}

pub fn set_catalog_counts(counts: &CatalogCounts) {
    for (kind, count) in [
        ("shape", counts.shapes),
        ("color", counts.colors),
        ("part", counts.parts),
        ("set", counts.sets),
        ("image", counts.images),
    ] {
        CATALOG_ITEMS_TOTAL
            .with_label_values(&[kind])
            .set(count as f64);
    }
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

/// Record a login attempt
pub fn record_login_attempt(status: &str, duration: Duration) {
    AUTH_LOGIN_ATTEMPTS_TOTAL.with_label_values(&[status]).inc();

    AUTH_LOGIN_DURATION_SECONDS.observe(duration.as_secs_f64());
}

/// Record an entity created or updated by a sync, e.g. ("shape", "updated")
pub fn record_sync_change(entity: &str, change: &str) {
    SYNC_CHANGES_TOTAL
        .with_label_values(&[entity, change])
        .inc();
}

pub fn record_external_api_error(kind: &str) {
    EXTERNAL_API_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_image_task(task: &str, status: &str) {
    IMAGE_TASKS_TOTAL.with_label_values(&[task, status]).inc();
}

pub fn record_image_processed(outcome: &str) {
    IMAGES_PROCESSED_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn set_image_queue_ready(count: usize) {
    IMAGE_QUEUE_READY.set(count as f64);
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_default();
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
