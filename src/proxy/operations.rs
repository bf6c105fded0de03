//! Supported upstream operations.
//!
//! Every operation is one row in [`OPERATIONS`]: how to build its upstream
//! request, how to reshape the response and how long to cache it. The
//! handler only ever goes through this table, so adding an operation means
//! adding a variant and a row.

use super::validation::ProxyRequestParams;
use crate::error::ProxyError;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Upstream query kinds selectable through the `action` parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    TokenMetadata,
    TokenPrice,
    PairReserves,
    TokenHolders,
    TokenTransfers,
}

/// Which address an operation is keyed on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    Token,
    Pair,
}

/// How the raw upstream JSON is turned into the response body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// `[x]` becomes `x`; an empty list becomes `null`
    UnwrapSingle,
    /// `{"result": [...]}` becomes `[...]`
    ExtractResult,
    PassThrough,
}

impl ResponseShape {
    pub fn apply(self, raw: Value) -> Value {
        match self {
            ResponseShape::UnwrapSingle => match raw {
                Value::Array(items) => items.into_iter().next().unwrap_or(Value::Null),
                other => other,
            },
            ResponseShape::ExtractResult => match raw {
                Value::Object(mut envelope) => match envelope.remove("result") {
                    Some(result @ Value::Array(_)) => result,
                    _ => Value::Array(Vec::new()),
                },
                Value::Array(items) => Value::Array(items),
                _ => Value::Array(Vec::new()),
            },
            ResponseShape::PassThrough => raw,
        }
    }
}

/// Path and query string of one upstream call, relative to the base URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamRequest {
    pub path: String,
    pub query: Vec<(&'static str, String)>,
}

/// One row of the operation table
pub struct OperationSpec {
    pub operation: Operation,
    /// Value of the `action` query parameter
    pub action: &'static str,
    pub address: AddressKind,
    pub path: fn(&ProxyRequestParams) -> String,
    pub query: fn(&ProxyRequestParams) -> Vec<(&'static str, String)>,
    pub shape: ResponseShape,
    pub default_ttl_secs: u64,
}

impl OperationSpec {
    pub fn request(&self, params: &ProxyRequestParams) -> UpstreamRequest {
        UpstreamRequest {
            path: (self.path)(params),
            query: (self.query)(params),
        }
    }
}

impl fmt::Debug for OperationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationSpec")
            .field("action", &self.action)
            .field("shape", &self.shape)
            .field("default_ttl_secs", &self.default_ttl_secs)
            .finish()
    }
}

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;

/// Operation table, indexed by `Operation as usize`
pub static OPERATIONS: [OperationSpec; 5] = [
    OperationSpec {
        operation: Operation::TokenMetadata,
        action: "getTokenMetadata",
        address: AddressKind::Token,
        path: |_| "/erc20/metadata".to_string(),
        query: |p| {
            vec![
                ("chain", p.chain.clone()),
                ("addresses[0]", token(p).to_string()),
            ]
        },
        shape: ResponseShape::UnwrapSingle,
        default_ttl_secs: 24 * HOUR,
    },
    OperationSpec {
        operation: Operation::TokenPrice,
        action: "getTokenPrice",
        address: AddressKind::Token,
        path: |p| format!("/erc20/{}/price", token(p)),
        query: |p| vec![("chain", p.chain.clone())],
        shape: ResponseShape::PassThrough,
        default_ttl_secs: 5 * MINUTE,
    },
    OperationSpec {
        operation: Operation::PairReserves,
        action: "getPairReserves",
        address: AddressKind::Pair,
        path: |p| format!("/{}/reserves", pair(p)),
        query: |p| vec![("chain", p.chain.clone())],
        shape: ResponseShape::PassThrough,
        default_ttl_secs: 5 * MINUTE,
    },
    OperationSpec {
        operation: Operation::TokenHolders,
        action: "getTokenHolders",
        address: AddressKind::Token,
        path: |p| format!("/erc20/{}/owners", token(p)),
        query: |p| {
            vec![
                ("chain", p.chain.clone()),
                ("limit", p.limit.to_string()),
                ("order", "DESC".to_string()),
            ]
        },
        shape: ResponseShape::ExtractResult,
        default_ttl_secs: 30 * MINUTE,
    },
    OperationSpec {
        operation: Operation::TokenTransfers,
        action: "getTokenTransfers",
        address: AddressKind::Token,
        path: |p| format!("/erc20/{}/transfers", token(p)),
        query: |p| {
            vec![
                ("chain", p.chain.clone()),
                ("limit", p.limit.to_string()),
                ("order", "DESC".to_string()),
            ]
        },
        shape: ResponseShape::ExtractResult,
        default_ttl_secs: 5 * MINUTE,
    },
];

fn token(params: &ProxyRequestParams) -> &str {
    params.token_address.as_deref().unwrap_or_default()
}

fn pair(params: &ProxyRequestParams) -> &str {
    params.pair_address.as_deref().unwrap_or_default()
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::TokenMetadata,
        Operation::TokenPrice,
        Operation::PairReserves,
        Operation::TokenHolders,
        Operation::TokenTransfers,
    ];

    pub fn spec(self) -> &'static OperationSpec {
        &OPERATIONS[self as usize]
    }

    pub fn action(self) -> &'static str {
        self.spec().action
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.action())
    }
}

impl FromStr for Operation {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OPERATIONS
            .iter()
            .find(|spec| spec.action == s)
            .map(|spec| spec.operation)
            .ok_or_else(|| ProxyError::Validation(format!("Unsupported action: {}", s)))
    }
}
