use crate::config::UpstreamConfig;
use crate::error::{ProxyError, Result};
use crate::metrics;
use crate::proxy::operations::UpstreamRequest;
use crate::secrets::SecretsProvider;
use reqwest::header::ACCEPT;
use secrecy::ExposeSecret;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use url::Url;

/// HTTP client for the upstream token data service
#[derive(Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    base_url: String,
    api_key_name: String,
    api_key_header: String,
    secrets: Arc<dyn SecretsProvider>,
}

impl std::fmt::Debug for UpstreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamClient")
            .field("base_url", &self.base_url)
            .field("api_key_header", &self.api_key_header)
            .field("client", &"<reqwest::Client>")
            .finish()
    }
}

impl UpstreamClient {
    /// The API key is looked up through `secrets` on every request
    pub fn with_secrets(config: &UpstreamConfig, secrets: Arc<dyn SecretsProvider>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ProxyError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let upstream = Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key_name: config.api_key_env.clone(),
            api_key_header: config.api_key_header.clone(),
            secrets,
        };

        if !upstream.has_api_key() {
            warn!(
                variable = %upstream.api_key_name,
                "Upstream API key not set, requests will be unauthenticated until it is"
            );
        }

        Ok(upstream)
    }

    /// Whether an API key is currently available
    pub fn has_api_key(&self) -> bool {
        self.secrets.has_secret(&self.api_key_name)
    }

    /// Absolute URL of an upstream request
    pub fn url_for(&self, request: &UpstreamRequest) -> Result<Url> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, request.path))
            .map_err(|e| ProxyError::Internal(format!("Invalid upstream URL: {}", e)))?;

        if !request.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &request.query {
                pairs.append_pair(name, value);
            }
        }

        Ok(url)
    }

    /// Issue a GET and parse the JSON body.
    ///
    /// Non-success statuses become [`ProxyError::Upstream`] carrying the raw
    /// body. Timeouts are reported as status 504 and other transport
    /// failures as 502.
    pub async fn fetch(&self, action: &str, request: &UpstreamRequest) -> Result<Value> {
        let url = self.url_for(request)?;
        debug!(action, path = %request.path, "Calling upstream");

        let mut builder = self.client.get(url).header(ACCEPT, "application/json");
        match self.secrets.get_secret(&self.api_key_name) {
            Ok(key) => {
                builder = builder.header(self.api_key_header.as_str(), key.expose_secret().as_str());
            }
            Err(_) => {
                warn!(
                    variable = %self.api_key_name,
                    "Upstream API key not configured, sending unauthenticated request"
                );
            }
        }

        let start = Instant::now();
        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                metrics::record_upstream_request(action, None, start.elapsed().as_secs_f64());
                let status = if e.is_timeout() { 504 } else { 502 };
                return Err(ProxyError::Upstream {
                    status,
                    body: format!("Upstream request failed: {}", e),
                });
            }
        };

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            let status = if e.is_timeout() { 504 } else { 502 };
            ProxyError::Upstream {
                status,
                body: format!("Failed to read upstream response: {}", e),
            }
        });
        metrics::record_upstream_request(
            action,
            Some(status.as_u16()),
            start.elapsed().as_secs_f64(),
        );
        let body = body?;

        if !status.is_success() {
            return Err(ProxyError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| {
            ProxyError::Serialization(format!("Upstream returned invalid JSON: {}", e))
        })
    }
}
