use anyhow::Context;
use std::env;
use token_proxy::{config::ProxyConfig, init_server, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    // Get config file path from command line or use default
    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "config/proxy.yaml".to_string());

    let config = ProxyConfig::from_file(&config_path).with_context(|| {
        format!(
            "Failed to load configuration from {} (usage: token-proxy [config_file])",
            config_path
        )
    })?;

    init_server(config).await.context("Proxy error")?;
    Ok(())
}
