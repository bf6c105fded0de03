//! Rate limiting module
//!
//! In-process sliding-window rate limiting keyed by client address.
//!
//! - Each client keeps the timestamps of its allowed requests inside the window
//! - A request is rejected once the window already holds the quota
//! - The number of tracked clients is capped; the oldest-inserted client is evicted first
//! - A background sweep drops clients that stopped sending requests
//!
//! State is per process. Multiple instances do not share counts.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use token_proxy::clock::SystemClock;
//! use token_proxy::rate_limit::{RateLimiterConfig, SlidingWindowLimiter};
//!
//! let limiter = SlidingWindowLimiter::new(
//!     RateLimiterConfig::configure(60_000, 500),
//!     Arc::new(SystemClock),
//! );
//!
//! match limiter.check("203.0.113.7", 10) {
//!     Ok(result) => println!("{} requests left", result.remaining),
//!     Err(e) => println!("rejected: {}", e),
//! }
//! ```

pub mod headers;
pub mod local;
pub mod types;

pub use headers::{add_exhausted_headers, add_rate_limit_headers, client_key, ANONYMOUS_CLIENT};
pub use local::SlidingWindowLimiter;
pub use types::{RateLimitResult, RateLimiterConfig};
