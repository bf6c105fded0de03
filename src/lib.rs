pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod observability;
pub mod proxy;
pub mod rate_limit;
pub mod secrets;
pub mod sweep;
pub mod upstream;

use crate::config::{CorsConfig, ProxyConfig};
use crate::error::{ProxyError, Result};
use crate::metrics::{metrics_handler, MetricsService};
use crate::proxy::{health_handler, token_data_handler, ProxyState, TOKEN_DATA_PATH};
use axum::{
    http::{header::CONTENT_TYPE, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::time::Duration;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

pub use observability::init_tracing;

/// Build the HTTP application around an already constructed state
pub fn build_app(
    state: ProxyState,
    config: &ProxyConfig,
    metrics: Option<MetricsService>,
) -> Result<Router> {
    let mut app = Router::new()
        .route(TOKEN_DATA_PATH, get(token_data_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    if let Some(service) = metrics {
        app = app.route("/metrics", get(metrics_handler).with_state(service));
    }

    Ok(app
        .layer(cors_layer(&config.cors)?)
        .layer(TimeoutLayer::new(Duration::from_secs(config.server.timeout_secs)))
        .layer(middleware::map_response(timeout_as_json))
        .layer(middleware::from_fn(observability::request_id_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(observability::make_request_span)))
}

/// `TimeoutLayer` answers with a bare 408. The only step that can stall is the
/// upstream call, so report it like an upstream timeout.
async fn timeout_as_json(response: Response) -> Response {
    if response.status() == StatusCode::REQUEST_TIMEOUT
        && !response.headers().contains_key(CONTENT_TYPE)
    {
        return ProxyError::Upstream {
            status: 504,
            body: "Request exceeded the server timeout".to_string(),
        }
        .into_response();
    }
    response
}

/// CORS for the dashboard: GET only, from the configured origins or any origin
fn cors_layer(config: &CorsConfig) -> Result<CorsLayer> {
    let origins = if config.allowed_origins.is_empty() {
        AllowOrigin::any()
    } else {
        let origins = config
            .allowed_origins
            .iter()
            .map(|o| {
                HeaderValue::from_str(o)
                    .map_err(|_| ProxyError::Config(format!("Invalid CORS origin: {}", o)))
            })
            .collect::<Result<Vec<_>>>()?;
        AllowOrigin::list(origins)
    };

    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET]))
}

/// Initialize and run the proxy server
pub async fn init_server(config: ProxyConfig) -> Result<()> {
    config.validate()?;

    info!("Starting token data proxy");
    info!(
        "Server listening on {}:{}",
        config.server.host, config.server.port
    );

    let state = ProxyState::from_config(&config)?;
    state.start_sweepers(&config);

    let metrics = if config.metrics.enabled {
        Some(MetricsService::new()?)
    } else {
        None
    };

    let app = build_app(state, &config, metrics)?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(path = TOKEN_DATA_PATH, "Proxy ready to accept connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ProxyError::Internal(format!("Server error: {}", e)))?;

    info!("Proxy stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}
