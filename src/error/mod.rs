use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

/// Result type for proxy operations
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Retry hint sent when the upstream service itself rate limits us
pub const UPSTREAM_RETRY_AFTER_SECS: u64 = 60;

/// Proxy error types
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("{0}")]
    Validation(String),

    /// `reset_after_secs` is the time until the client's window has room again
    #[error("Rate limit exceeded")]
    RateLimitExceeded {
        retry_after_secs: u64,
        reset_after_secs: u64,
    },

    #[error("Upstream returned status {status}")]
    Upstream { status: u16, body: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::Validation(_) => StatusCode::BAD_REQUEST,
            ProxyError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            ProxyError::Upstream { status, .. } => upstream_status(*status),
            ProxyError::Serialization(_)
            | ProxyError::Config(_)
            | ProxyError::Internal(_)
            | ProxyError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to the caller
    pub fn public_message(&self) -> String {
        match self {
            ProxyError::Validation(msg) => msg.clone(),
            ProxyError::RateLimitExceeded { .. } => {
                "Too many requests, please try again later".to_string()
            }
            ProxyError::Upstream { status, .. } => match *status {
                400 => "Invalid request to token data service".to_string(),
                401 => "Token data service rejected the credentials".to_string(),
                429 => "Token data service rate limit exceeded".to_string(),
                500..=599 => "Token data service unavailable".to_string(),
                _ => "Failed to fetch data from token data service".to_string(),
            },
            _ => "Internal server error".to_string(),
        }
    }

    /// Seconds the caller should wait before retrying, if any
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            ProxyError::RateLimitExceeded { retry_after_secs, .. } => Some(*retry_after_secs),
            ProxyError::Upstream { status: 429, .. } => Some(UPSTREAM_RETRY_AFTER_SECS),
            _ => None,
        }
    }
}

/// Map an upstream status onto the status we return
fn upstream_status(status: u16) -> StatusCode {
    match status {
        400 => StatusCode::BAD_REQUEST,
        401 => StatusCode::UNAUTHORIZED,
        429 => StatusCode::TOO_MANY_REQUESTS,
        500..=599 => StatusCode::SERVICE_UNAVAILABLE,
        other => StatusCode::from_u16(other).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match &self {
            ProxyError::Upstream { status: upstream, body } => {
                warn!(upstream_status = upstream, body = %body, "Upstream request failed");
            }
            ProxyError::Serialization(_)
            | ProxyError::Config(_)
            | ProxyError::Internal(_)
            | ProxyError::Io(_) => {
                error!(error = %self, "Unexpected failure while handling request");
            }
            _ => {}
        }

        let body = Json(json!({
            "error": self.public_message(),
            "status": status.as_u16(),
        }));

        let mut response = (status, body).into_response();
        if let Some(secs) = self.retry_after() {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate_limited(retry_after_secs: u64) -> ProxyError {
        ProxyError::RateLimitExceeded {
            retry_after_secs,
            reset_after_secs: 12,
        }
    }

    fn upstream(status: u16) -> ProxyError {
        ProxyError::Upstream {
            status,
            body: "{\"message\":\"secret detail\"}".to_string(),
        }
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            ProxyError::Validation("bad".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(rate_limited(60).status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            ProxyError::Internal("boom".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_upstream_status_mapping() {
        assert_eq!(upstream(400).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(upstream(401).status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(upstream(429).status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(upstream(500).status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(upstream(502).status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(upstream(404).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(upstream(42).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_retry_after_hints() {
        assert_eq!(upstream(429).retry_after(), Some(60));
        assert_eq!(upstream(500).retry_after(), None);
        assert_eq!(rate_limited(30).retry_after(), Some(30));
    }

    #[tokio::test]
    async fn test_response_does_not_leak_upstream_body() {
        let response = upstream(500).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body_str = String::from_utf8(body.to_vec()).unwrap();
        assert!(body_str.contains("\"error\""));
        assert!(!body_str.contains("secret detail"));
    }

    #[test]
    fn test_rate_limit_response_has_retry_after() {
        let response = rate_limited(60).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(RETRY_AFTER).unwrap(), "60");
    }

    #[test]
    fn test_error_display() {
        let err = ProxyError::Validation("Missing required parameter: action".to_string());
        assert_eq!(err.to_string(), "Missing required parameter: action");
    }
}
