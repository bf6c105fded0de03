use crate::error::{ProxyError, Result};
use axum::{
    body::Body,
    extract::State,
    http::{header::CONTENT_TYPE, Response, StatusCode},
    response::IntoResponse,
};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Metrics service for collecting and exposing Prometheus metrics
#[derive(Clone)]
pub struct MetricsService {
    handle: Arc<PrometheusHandle>,
}

impl MetricsService {
    /// Install the global Prometheus recorder. Only one recorder can exist per process.
    pub fn new() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            ProxyError::Internal(format!("Failed to install metrics recorder: {}", e))
        })?;

        Self::register_metrics();

        info!("Metrics service initialized successfully");

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    /// Register all metrics with descriptions
    fn register_metrics() {
        describe_counter!(
            "proxy_requests_total",
            "Total number of token data requests by action and status"
        );
        describe_histogram!(
            "proxy_request_duration_seconds",
            "Token data request latencies in seconds"
        );

        describe_counter!("proxy_cache_hits_total", "Responses served from cache");
        describe_counter!(
            "proxy_cache_misses_total",
            "Requests that had to go upstream"
        );
        describe_gauge!("proxy_cache_entries", "Entries currently held in the cache");

        describe_counter!(
            "proxy_rate_limit_exceeded_total",
            "Total number of requests rejected due to rate limiting"
        );
        describe_gauge!(
            "proxy_rate_limit_tracked_clients",
            "Distinct clients tracked by the rate limiter"
        );

        describe_counter!(
            "proxy_upstream_requests_total",
            "Requests sent to the token data service"
        );
        describe_counter!(
            "proxy_upstream_errors_total",
            "Upstream requests that failed or returned a non-success status"
        );
        describe_histogram!(
            "proxy_upstream_duration_seconds",
            "Upstream request latencies in seconds"
        );

        debug!("All metrics registered with descriptions");
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Metrics endpoint handler
pub async fn metrics_handler(State(service): State<MetricsService>) -> impl IntoResponse {
    let body = service.render();
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "text/plain; version=0.0.4")
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Record a completed proxy request
pub fn record_request(action: &str, status: u16, duration: f64) {
    let labels = [("action", action.to_string()), ("status", status.to_string())];

    counter!("proxy_requests_total", &labels).increment(1);
    histogram!("proxy_request_duration_seconds", &labels).record(duration);
}

/// Record a cache lookup
pub fn record_cache_lookup(action: &str, hit: bool) {
    let labels = [("action", action.to_string())];
    if hit {
        counter!("proxy_cache_hits_total", &labels).increment(1);
    } else {
        counter!("proxy_cache_misses_total", &labels).increment(1);
    }
}

pub fn record_cache_entries(count: usize) {
    gauge!("proxy_cache_entries").set(count as f64);
}

/// Record rate limit exceeded
pub fn record_rate_limit_exceeded() {
    counter!("proxy_rate_limit_exceeded_total").increment(1);
}

pub fn record_tracked_clients(count: usize) {
    gauge!("proxy_rate_limit_tracked_clients").set(count as f64);
}

/// Record an upstream call; `status` is `None` when no response arrived
pub fn record_upstream_request(action: &str, status: Option<u16>, duration: f64) {
    let status_label = status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "error".to_string());
    let labels = [("action", action.to_string()), ("status", status_label)];

    counter!("proxy_upstream_requests_total", &labels).increment(1);
    histogram!("proxy_upstream_duration_seconds", &labels).record(duration);

    if !matches!(status, Some(s) if (200..300).contains(&s)) {
        counter!("proxy_upstream_errors_total", &labels).increment(1);
    }
}

/// Timer for measuring request duration
pub struct Timer {
    start: Instant,
    action: String,
}

impl Timer {
    /// Start a new timer for a request
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            action: action.into(),
        }
    }

    /// Label the request once the action is known
    pub fn set_action(&mut self, action: impl Into<String>) {
        self.action = action.into();
    }

    /// Record the elapsed time with the given status code
    pub fn record(self, status: u16) {
        record_request(&self.action, status, self.elapsed());
    }

    /// Get the elapsed time in seconds
    pub fn elapsed(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}
