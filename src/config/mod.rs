use crate::cache::CacheConfig;
use crate::error::{ProxyError, Result};
use crate::proxy::operations::Operation;
use crate::rate_limit::RateLimiterConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Upper bound for the limiter window and the cache sweep period
pub const MAX_INTERVAL_SECS: u64 = 86_400;

/// Main proxy configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Upstream token data service
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitSettings,
    /// Response cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
    /// Request parameter rules
    #[serde(default)]
    pub validation: ValidationConfig,
    /// CORS configuration
    #[serde(default)]
    pub cors: CorsConfig,
    /// Prometheus metrics
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Whole-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

/// Upstream service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL every operation path is appended to
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Header the API key is sent in
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
    /// Upstream call timeout in seconds
    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Rolling window length in seconds
    #[serde(default = "default_rate_interval")]
    pub interval_secs: u64,
    /// Maximum distinct clients tracked at once
    #[serde(default = "default_max_tracked_clients")]
    pub max_tracked_clients: usize,
    /// Requests allowed per client per window
    #[serde(default = "default_requests_per_window")]
    pub requests_per_window: u32,
    /// `Retry-After` value sent with 429 responses
    #[serde(default = "default_retry_after")]
    pub retry_after_secs: u64,
}

/// Request parameter rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Chain identifiers accepted in the `chain` parameter
    #[serde(default = "default_allowed_chains")]
    pub allowed_chains: Vec<String>,
    /// Chain used when the parameter is absent
    #[serde(default = "default_chain")]
    pub default_chain: String,
    /// Result limit used when the parameter is absent
    #[serde(default = "default_limit")]
    pub default_limit: u32,
    /// Largest accepted result limit
    #[serde(default = "default_max_limit")]
    pub max_limit: u32,
}

/// CORS configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Allowed origins; empty allows any origin
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Expose `/metrics`
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
}

fn default_base_url() -> String {
    "https://deep-index.moralis.io/api/v2.2".to_string()
}

fn default_api_key_env() -> String {
    "MORALIS_API_KEY".to_string()
}

fn default_api_key_header() -> String {
    "X-API-Key".to_string()
}

fn default_upstream_timeout() -> u64 {
    10
}

fn default_rate_interval() -> u64 {
    60
}

fn default_max_tracked_clients() -> usize {
    500
}

fn default_requests_per_window() -> u32 {
    10
}

fn default_retry_after() -> u64 {
    60
}

fn default_allowed_chains() -> Vec<String> {
    [
        "eth",
        "goerli",
        "sepolia",
        "polygon",
        "mumbai",
        "bsc",
        "bsc_testnet",
        "avalanche",
        "fantom",
        "cronos",
        "palm",
        "arbitrum",
        "arbitrum_goerli",
        "optimism",
    ]
    .iter()
    .map(|c| c.to_string())
    .collect()
}

fn default_chain() -> String {
    "bsc".to_string()
}

fn default_limit() -> u32 {
    10
}

fn default_max_limit() -> u32 {
    100
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            api_key_header: default_api_key_header(),
            timeout_secs: default_upstream_timeout(),
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_rate_interval(),
            max_tracked_clients: default_max_tracked_clients(),
            requests_per_window: default_requests_per_window(),
            retry_after_secs: default_retry_after(),
        }
    }
}

impl RateLimitSettings {
    /// Limiter configuration for these settings
    pub fn limiter_config(&self) -> RateLimiterConfig {
        RateLimiterConfig::configure(
            self.interval_secs.saturating_mul(1000),
            self.max_tracked_clients,
        )
            .with_retry_after(Duration::from_secs(self.retry_after_secs))
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            allowed_chains: default_allowed_chains(),
            default_chain: default_chain(),
            default_limit: default_limit(),
            max_limit: default_max_limit(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
        }
    }
}

impl ProxyConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ProxyError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| ProxyError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let base_url = &self.upstream.base_url;
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ProxyError::Config(format!(
                "Upstream base URL must start with http:// or https://: {}",
                base_url
            )));
        }
        url::Url::parse(base_url)
            .map_err(|e| ProxyError::Config(format!("Invalid upstream base URL: {}", e)))?;

        if self.upstream.api_key_env.is_empty() {
            return Err(ProxyError::Config(
                "Upstream API key variable name cannot be empty".to_string(),
            ));
        }
        if self.upstream.timeout_secs == 0 {
            return Err(ProxyError::Config(
                "Upstream timeout must be > 0".to_string(),
            ));
        }
        if self.server.timeout_secs == 0 {
            return Err(ProxyError::Config(
                "Server timeout must be > 0".to_string(),
            ));
        }
        if self.server.timeout_secs <= self.upstream.timeout_secs {
            return Err(ProxyError::Config(format!(
                "Server timeout ({}s) must be longer than the upstream timeout ({}s)",
                self.server.timeout_secs, self.upstream.timeout_secs
            )));
        }

        let limits = &self.rate_limiting;
        if limits.interval_secs == 0 || limits.interval_secs > MAX_INTERVAL_SECS {
            return Err(ProxyError::Config(format!(
                "Rate limit interval must be between 1 and {} seconds",
                MAX_INTERVAL_SECS
            )));
        }
        if limits.requests_per_window == 0 {
            return Err(ProxyError::Config(
                "Rate limit requests must be > 0".to_string(),
            ));
        }
        if limits.max_tracked_clients == 0 {
            return Err(ProxyError::Config(
                "Rate limit must track at least one client".to_string(),
            ));
        }

        if self.cache.sweep_interval_secs == 0 || self.cache.sweep_interval_secs > MAX_INTERVAL_SECS {
            return Err(ProxyError::Config(format!(
                "Cache sweep interval must be between 1 and {} seconds",
                MAX_INTERVAL_SECS
            )));
        }
        for action in self.cache.ttl_overrides.keys() {
            if action.parse::<Operation>().is_err() {
                return Err(ProxyError::Config(format!(
                    "Unknown action in cache TTL overrides: {}",
                    action
                )));
            }
        }

        let rules = &self.validation;
        if rules.allowed_chains.is_empty() {
            return Err(ProxyError::Config(
                "At least one chain must be allowed".to_string(),
            ));
        }
        if !rules.allowed_chains.contains(&rules.default_chain) {
            return Err(ProxyError::Config(format!(
                "Default chain '{}' is not in the allowed chains",
                rules.default_chain
            )));
        }
        if rules.default_limit == 0 || rules.default_limit > rules.max_limit {
            return Err(ProxyError::Config(format!(
                "Default limit must be between 1 and {}",
                rules.max_limit
            )));
        }

        Ok(())
    }
}
