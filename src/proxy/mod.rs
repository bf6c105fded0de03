pub mod operations;
pub mod validation;

use crate::cache::ResponseCache;
use crate::clock::{self, Clock};
use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::metrics;
use crate::rate_limit::{self, RateLimitResult, SlidingWindowLimiter};
use crate::secrets::{EnvSecretsProvider, SecretsProvider};
use crate::upstream::UpstreamClient;
use axum::{
    body::Body,
    extract::{RawQuery, State},
    http::{header::CONTENT_TYPE, HeaderMap, HeaderValue, Response, StatusCode},
    response::IntoResponse,
};
use operations::Operation;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use validation::RequestValidator;

/// Path the token data endpoint is served on
pub const TOKEN_DATA_PATH: &str = "/api/moralis";

/// Response header telling whether the body came from the cache
pub const CACHE_STATUS_HEADER: &str = "X-Cache";

/// Shared state of the token data endpoint
#[derive(Clone)]
pub struct ProxyState {
    pub rate_limiter: Arc<SlidingWindowLimiter>,
    pub cache: Arc<ResponseCache>,
    pub upstream: UpstreamClient,
    pub validator: Arc<RequestValidator>,
    requests_per_window: u32,
    cache_namespace: Arc<str>,
    ttl_overrides: Arc<HashMap<String, u64>>,
}

impl ProxyState {
    /// Wall clock and API key from the environment
    pub fn from_config(config: &ProxyConfig) -> Result<Self> {
        Self::new(config, clock::system(), Arc::new(EnvSecretsProvider::default()))
    }

    /// Build every component from configuration with an explicit clock and secrets source
    pub fn new(
        config: &ProxyConfig,
        clock: Arc<dyn Clock>,
        secrets: Arc<dyn SecretsProvider>,
    ) -> Result<Self> {
        let rate_limiter =
            SlidingWindowLimiter::new(config.rate_limiting.limiter_config(), clock.clone());
        let cache = ResponseCache::new(clock);
        let upstream = UpstreamClient::with_secrets(&config.upstream, secrets)?;

        Ok(Self {
            rate_limiter: Arc::new(rate_limiter),
            cache: Arc::new(cache),
            upstream,
            validator: Arc::new(RequestValidator::new(&config.validation)),
            requests_per_window: config.rate_limiting.requests_per_window,
            cache_namespace: Arc::from(config.cache.namespace.as_str()),
            ttl_overrides: Arc::new(config.cache.ttl_overrides.clone()),
        })
    }

    /// Start the rate limiter and cache sweeps; they stop when the state is dropped
    pub fn start_sweepers(&self, config: &ProxyConfig) {
        self.rate_limiter.start_sweeper();
        self.cache.start_sweeper(config.cache.sweep_interval());
    }

    /// Requests allowed per client per window
    pub fn requests_per_window(&self) -> u32 {
        self.requests_per_window
    }

    /// Cache TTL of an operation, honouring configured overrides
    pub fn ttl_for(&self, operation: Operation) -> u64 {
        self.ttl_overrides
            .get(operation.action())
            .copied()
            .unwrap_or(operation.spec().default_ttl_secs)
    }
}

/// Token data endpoint: rate limit, validate, serve from cache or fetch,
/// reshape and cache.
pub async fn token_data_handler(
    State(state): State<ProxyState>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Response<Body> {
    let mut timer = metrics::Timer::new("unknown");

    let response = match handle(&state, &headers, query.as_deref(), &mut timer).await {
        Ok(response) => response,
        Err(e) => {
            let reset = match &e {
                ProxyError::RateLimitExceeded {
                    reset_after_secs, ..
                } => Some(*reset_after_secs),
                _ => None,
            };

            debug!(error = %e, "Request rejected");
            let response = e.into_response();
            match reset {
                Some(reset) => {
                    rate_limit::add_exhausted_headers(response, state.requests_per_window, reset)
                }
                None => response,
            }
        }
    };

    let status = response.status().as_u16();
    info!(
        status,
        latency_ms = timer.elapsed() * 1000.0,
        "Request completed"
    );
    timer.record(status);

    response
}

async fn handle(
    state: &ProxyState,
    headers: &HeaderMap,
    query: Option<&str>,
    timer: &mut metrics::Timer,
) -> Result<Response<Body>> {
    let client = rate_limit::client_key(headers);

    let limit = state
        .rate_limiter
        .check(&client, state.requests_per_window)
        .inspect_err(|_| metrics::record_rate_limit_exceeded())?;

    let params = state.validator.parse_query(query)?;
    let operation = params.operation;
    let action = operation.action();
    timer.set_action(action);

    info!(action, client = %client, "Incoming request");

    let cache_key = params.cache_key(&state.cache_namespace);
    if let Some(body) = state.cache.get(&cache_key) {
        if serde_json::from_str::<serde_json::Value>(&body).is_ok() {
            metrics::record_cache_lookup(action, true);
            debug!(key = %cache_key, "Returning cached response");
            return json_response(body, "HIT", &limit);
        }
        warn!(key = %cache_key, "Discarding unreadable cache entry");
        state.cache.invalidate(&cache_key);
    }
    metrics::record_cache_lookup(action, false);

    let spec = operation.spec();
    let raw = state.upstream.fetch(action, &spec.request(&params)).await?;
    let shaped = spec.shape.apply(raw);

    let body = serde_json::to_string(&shaped)
        .map_err(|e| ProxyError::Serialization(format!("Failed to encode response: {}", e)))?;
    state
        .cache
        .set(cache_key, body.clone(), state.ttl_for(operation));

    json_response(body, "MISS", &limit)
}

fn json_response(body: String, cache_status: &'static str, limit: &RateLimitResult) -> Result<Response<Body>> {
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
        .header(CACHE_STATUS_HEADER, cache_status)
        .body(Body::from(body))
        .map_err(|e| ProxyError::Internal(format!("Failed to build response: {}", e)))?;

    Ok(rate_limit::add_rate_limit_headers(response, limit))
}

/// Liveness probe
pub async fn health_handler() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::secrets::InMemorySecretsProvider;

    fn state(config: &ProxyConfig) -> ProxyState {
        ProxyState::new(
            config,
            Arc::new(ManualClock::new(0)),
            Arc::new(InMemorySecretsProvider::empty()),
        )
        .unwrap()
    }

    #[test]
    fn test_proxy_state_creation() {
        let state = state(&ProxyConfig::default());
        assert_eq!(state.requests_per_window(), 10);
        assert!(state.cache.is_empty());
        assert_eq!(state.rate_limiter.tracked_clients(), 0);
    }

    #[test]
    fn test_ttl_overrides() {
        let mut config = ProxyConfig::default();
        config
            .cache
            .ttl_overrides
            .insert("getTokenPrice".to_string(), 30);
        let state = state(&config);

        assert_eq!(state.ttl_for(Operation::TokenPrice), 30);
        assert_eq!(state.ttl_for(Operation::TokenMetadata), 86_400);
        assert_eq!(state.ttl_for(Operation::TokenHolders), 1_800);
    }

    #[test]
    fn test_json_response_headers() {
        let limit = RateLimitResult {
            limit: 10,
            remaining: 9,
            reset_after_secs: 60,
        };
        let response = json_response("{}".to_string(), "HIT", &limit).unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(response.headers().get(CACHE_STATUS_HEADER).unwrap(), "HIT");
        assert_eq!(response.headers().get("X-RateLimit-Remaining").unwrap(), "9");
    }

    #[tokio::test]
    async fn test_health_handler() {
        assert_eq!(health_handler().await, "OK");
    }
}
