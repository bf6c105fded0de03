use super::types::RateLimitResult;
use axum::{
    http::{HeaderMap, HeaderValue},
    response::Response,
};

/// Identity used when a request carries no forwarded address
pub const ANONYMOUS_CLIENT: &str = "anonymous";

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_REAL_IP: &str = "x-real-ip";

/// Derive the rate limit identity of a request.
///
/// Uses the first hop of `X-Forwarded-For`, then `X-Real-IP`. Requests
/// without either share the [`ANONYMOUS_CLIENT`] bucket.
pub fn client_key(headers: &HeaderMap) -> String {
    headers
        .get(X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').map(str::trim).find(|ip| !ip.is_empty()))
        .or_else(|| {
            headers
                .get(X_REAL_IP)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
        })
        .unwrap_or(ANONYMOUS_CLIENT)
        .to_string()
}

/// Add `X-RateLimit-*` headers to a response
pub fn add_rate_limit_headers(mut response: Response, result: &RateLimitResult) -> Response {
    set_rate_limit_headers(
        response.headers_mut(),
        result.limit,
        result.remaining,
        result.reset_after_secs,
    );
    response
}

/// Headers for a rejected request: nothing remaining for `reset_after_secs`
pub fn add_exhausted_headers(mut response: Response, limit: u32, reset_after_secs: u64) -> Response {
    set_rate_limit_headers(response.headers_mut(), limit, 0, reset_after_secs);
    response
}

fn set_rate_limit_headers(headers: &mut HeaderMap, limit: u32, remaining: u32, reset: u64) {
    headers.insert("X-RateLimit-Limit", HeaderValue::from(limit));
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(remaining));
    headers.insert("X-RateLimit-Reset", HeaderValue::from(reset));
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, response::IntoResponse};

    #[test]
    fn test_client_key_from_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(
            X_FORWARDED_FOR,
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(client_key(&headers), "203.0.113.7");
    }

    #[test]
    fn test_client_key_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert(X_REAL_IP, HeaderValue::from_static("198.51.100.2"));
        assert_eq!(client_key(&headers), "198.51.100.2");
    }

    #[test]
    fn test_client_key_without_headers_is_shared() {
        assert_eq!(client_key(&HeaderMap::new()), ANONYMOUS_CLIENT);

        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static(" , "));
        assert_eq!(client_key(&headers), ANONYMOUS_CLIENT);
    }

    #[test]
    fn test_rate_limit_headers() {
        let response = StatusCode::OK.into_response();
        let result = RateLimitResult {
            limit: 10,
            remaining: 7,
            reset_after_secs: 42,
        };

        let response = add_rate_limit_headers(response, &result);
        let headers = response.headers();
        assert_eq!(headers.get("X-RateLimit-Limit").unwrap(), "10");
        assert_eq!(headers.get("X-RateLimit-Remaining").unwrap(), "7");
        assert_eq!(headers.get("X-RateLimit-Reset").unwrap(), "42");
    }

    #[test]
    fn test_exhausted_headers() {
        let response = add_exhausted_headers(StatusCode::TOO_MANY_REQUESTS.into_response(), 10, 60);
        let headers = response.headers();
        assert_eq!(headers.get("X-RateLimit-Remaining").unwrap(), "0");
        assert_eq!(headers.get("X-RateLimit-Reset").unwrap(), "60");
    }
}
