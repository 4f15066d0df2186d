use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

use crate::uploads::MediaType;

/// Metric name prefix for all Bozloader metrics
const PREFIX: &str = "bozloader";

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
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Upload lifecycle metrics
    pub static ref UPLOADS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_uploads_total"), "Upload intake attempts by result"),
        &["result"]
    ).expect("Failed to create uploads_total metric");

    pub static ref UPLOADED_BYTES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_uploaded_bytes_total"), "Bytes accepted into the pending area"),
        &["media_type"]
    ).expect("Failed to create uploaded_bytes_total metric");

    pub static ref DECISIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_decisions_total"), "Admin decisions by decision and result"),
        &["decision", "result"]
    ).expect("Failed to create decisions_total metric");

    pub static ref PUBLISH_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_publish_total"), "Library moves by result"),
        &["result"]
    ).expect("Failed to create publish_total metric");

    pub static ref RESCANS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_library_rescans_total"), "Media server rescan requests by result"),
        &["result"]
    ).expect("Failed to create library_rescans_total metric");

    pub static ref NOTIFICATIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_notifications_total"), "Notification deliveries by channel and result"),
        &["channel", "result"]
    ).expect("Failed to create notifications_total metric");

    pub static ref PROCESS_MEMORY_BYTES: Gauge = Gauge::new(
        format!("{PREFIX}_process_memory_bytes"),
        "Process memory usage in bytes"
    ).expect("Failed to create process_memory_bytes metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(UPLOADS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(UPLOADED_BYTES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(DECISIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PUBLISH_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(RESCANS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(NOTIFICATIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PROCESS_MEMORY_BYTES.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Collapse ids in a request path so labels stay bounded.
pub fn endpoint_label(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').collect();
    match segments.as_slice() {
        ["", "status", _] => "/status/{id}".to_string(),
        ["", "admin", "uploads", _, action] => format!("/admin/uploads/{{id}}/{}", action),
        _ => path.to_string(),
    }
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    let path = endpoint_label(path);
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, &path, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, &path])
        .observe(duration.as_secs_f64());
}

/// Record the result of an upload intake
pub fn record_intake(result: &str) {
    UPLOADS_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_upload_bytes(media_type: MediaType, bytes: u64) {
    UPLOADED_BYTES_TOTAL
        .with_label_values(&[media_type.as_str()])
        .inc_by(bytes as f64);
}

/// Record an admin decision
pub fn record_decision(decision: &str, result: &str) {
    DECISIONS_TOTAL.with_label_values(&[decision, result]).inc();
}

pub fn record_publish(result: &str) {
    PUBLISH_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_rescan(result: &str) {
    RESCANS_TOTAL.with_label_values(&[result]).inc();
}

/// Record a notification delivery attempt on one channel
pub fn record_notification(channel: &str, result: &str) {
    NOTIFICATIONS_TOTAL.with_label_values(&[channel, result]).inc();
}

/// Update process memory usage
pub fn update_memory_usage() {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    // RSS is reported in kB
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        if let Ok(kb) = kb_str.parse::<f64>() {
                            PROCESS_MEMORY_BYTES.set(kb * 1024.0);
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    update_memory_usage();

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
