use crate::error::{ProxyError, Result};
use secrecy::Secret;
use std::collections::HashMap;
use std::env;

/// Secret string wrapper that prevents accidental exposure
pub type SecretString = Secret<String>;

/// Secrets provider interface
pub trait SecretsProvider: Send + Sync {
    /// Get a secret by key
    fn get_secret(&self, key: &str) -> Result<SecretString>;

    /// Check if a secret exists
    fn has_secret(&self, key: &str) -> bool;
}

/// Environment variable secrets provider.
///
/// Variables are read on every call, so a key rotated in the environment is
/// picked up by the next request. Blank values count as absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecretsProvider;

impl SecretsProvider for EnvSecretsProvider {
    fn get_secret(&self, key: &str) -> Result<SecretString> {
        match env::var(key) {
            Ok(value) if !value.trim().is_empty() => Ok(Secret::new(value)),
            _ => Err(ProxyError::Config(format!(
                "Secret '{}' not found in environment",
                key
            ))),
        }
    }

    fn has_secret(&self, key: &str) -> bool {
        env::var(key)
            .map(|v| !v.trim().is_empty())
            .unwrap_or(false)
    }
}

/// In-memory secrets provider (for testing or simple deployments)
#[derive(Debug, Clone)]
pub struct InMemorySecretsProvider {
    secrets: HashMap<String, SecretString>,
}

impl InMemorySecretsProvider {
    pub fn new(secrets: HashMap<String, String>) -> Self {
        Self {
            secrets: secrets
                .into_iter()
                .map(|(k, v)| (k, Secret::new(v)))
                .collect(),
        }
    }

    pub fn single(key: &str, value: &str) -> Self {
        Self::new(HashMap::from([(key.to_string(), value.to_string())]))
    }

    pub fn empty() -> Self {
        Self {
            secrets: HashMap::new(),
        }
    }
}

impl SecretsProvider for InMemorySecretsProvider {
    fn get_secret(&self, key: &str) -> Result<SecretString> {
        self.secrets
            .get(key)
            .cloned()
            .ok_or_else(|| ProxyError::Config(format!("Secret '{}' not found", key)))
    }

    fn has_secret(&self, key: &str) -> bool {
        self.secrets.contains_key(key)
    }
}
