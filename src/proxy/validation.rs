use super::operations::{AddressKind, Operation};
use crate::config::ValidationConfig;
use crate::error::{ProxyError, Result};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Query parameter names
pub const ACTION: &str = "action";
pub const TOKEN_ADDRESS: &str = "tokenAddress";
pub const PAIR_ADDRESS: &str = "pairAddress";
pub const CHAIN: &str = "chain";
pub const LIMIT: &str = "limit";

fn address_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("address pattern is valid"))
}

/// `0x` followed by exactly 40 hex digits
pub fn is_valid_address(address: &str) -> bool {
    address_pattern().is_match(address)
}

/// Query parameters as received, before validation. Empty values count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawParams {
    pub action: Option<String>,
    pub token_address: Option<String>,
    pub pair_address: Option<String>,
    pub chain: Option<String>,
    pub limit: Option<String>,
}

impl RawParams {
    /// Parse a URL query string; the first occurrence of a parameter wins
    pub fn from_query(query: &str) -> Self {
        let mut raw = RawParams::default();

        for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }

            let slot = match &*name {
                ACTION => &mut raw.action,
                TOKEN_ADDRESS => &mut raw.token_address,
                PAIR_ADDRESS => &mut raw.pair_address,
                CHAIN => &mut raw.chain,
                LIMIT => &mut raw.limit,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.to_string());
            }
        }

        raw
    }
}

/// Validated, request-scoped parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRequestParams {
    pub operation: Operation,
    pub token_address: Option<String>,
    pub pair_address: Option<String>,
    pub chain: String,
    pub limit: u32,
}

impl ProxyRequestParams {
    /// Composite key covering every parameter that changes the upstream answer
    pub fn cache_key(&self, namespace: &str) -> String {
        format!(
            "{}:{}:{}:{}:{}:{}",
            namespace,
            self.operation.action(),
            self.token_address.as_deref().unwrap_or_default(),
            self.pair_address.as_deref().unwrap_or_default(),
            self.chain,
            self.limit
        )
    }
}

/// Turns raw query parameters into [`ProxyRequestParams`]
#[derive(Debug, Clone)]
pub struct RequestValidator {
    allowed_chains: HashSet<String>,
    default_chain: String,
    default_limit: u32,
    max_limit: u32,
}

impl RequestValidator {
    pub fn new(config: &ValidationConfig) -> Self {
        Self {
            allowed_chains: config.allowed_chains.iter().cloned().collect(),
            default_chain: config.default_chain.clone(),
            default_limit: config.default_limit,
            max_limit: config.max_limit,
        }
    }

    pub fn is_allowed_chain(&self, chain: &str) -> bool {
        self.allowed_chains.contains(chain)
    }

    /// Validate a raw query string
    pub fn parse_query(&self, query: Option<&str>) -> Result<ProxyRequestParams> {
        self.validate(RawParams::from_query(query.unwrap_or_default()))
    }

    /// Validate parameters, failing on the first broken constraint
    pub fn validate(&self, raw: RawParams) -> Result<ProxyRequestParams> {
        let action = raw.action.ok_or_else(|| missing(ACTION))?;
        let operation: Operation = action.parse()?;

        if raw.token_address.is_none() && raw.pair_address.is_none() {
            return Err(ProxyError::Validation(format!(
                "Missing required parameter: {} or {}",
                TOKEN_ADDRESS, PAIR_ADDRESS
            )));
        }

        match operation.spec().address {
            AddressKind::Pair if raw.pair_address.is_none() => return Err(missing(PAIR_ADDRESS)),
            AddressKind::Token if raw.token_address.is_none() => {
                return Err(missing(TOKEN_ADDRESS))
            }
            _ => {}
        }

        for (name, value) in [
            (TOKEN_ADDRESS, &raw.token_address),
            (PAIR_ADDRESS, &raw.pair_address),
        ] {
            if let Some(address) = value {
                if !is_valid_address(address) {
                    return Err(ProxyError::Validation(format!(
                        "Invalid {} format: expected 0x followed by 40 hex characters",
                        name
                    )));
                }
            }
        }

        let chain = raw.chain.unwrap_or_else(|| self.default_chain.clone());
        if !self.is_allowed_chain(&chain) {
            return Err(ProxyError::Validation(format!("Unsupported chain: {}", chain)));
        }

        let limit = match raw.limit {
            None => self.default_limit,
            Some(value) => value
                .parse::<u32>()
                .ok()
                .filter(|l| (1..=self.max_limit).contains(l))
                .ok_or_else(|| {
                    ProxyError::Validation(format!(
                        "Invalid {}: must be an integer between 1 and {}",
                        LIMIT, self.max_limit
                    ))
                })?,
        };

        Ok(ProxyRequestParams {
            operation,
            token_address: raw.token_address,
            pair_address: raw.pair_address,
            chain,
            limit,
        })
    }
}

fn missing(name: &str) -> ProxyError {
    ProxyError::Validation(format!("Missing required parameter: {}", name))
}
