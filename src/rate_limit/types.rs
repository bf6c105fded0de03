use std::time::Duration;

/// Rate limiter configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Length of the rolling window
    pub interval: Duration,
    /// Maximum number of distinct clients tracked at once
    pub max_tracked_clients: usize,
    /// Retry hint handed to rejected clients
    pub retry_after: Duration,
}

impl RateLimiterConfig {
    /// Window of `interval_ms` tracking at most `max_tracked_clients` keys.
    /// The retry hint defaults to the window length.
    pub fn configure(interval_ms: u64, max_tracked_clients: usize) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms),
            max_tracked_clients,
            retry_after: Duration::from_millis(interval_ms),
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Window length in milliseconds
    pub fn interval_ms(&self) -> u64 {
        self.interval.as_millis() as u64
    }

    /// Retry hint rounded up to whole seconds
    pub fn retry_after_secs(&self) -> u64 {
        let millis = self.retry_after.as_millis() as u64;
        millis.div_ceil(1000)
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::configure(60_000, 500)
    }
}

/// Outcome of an allowed rate limit check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Requests allowed per window
    pub limit: u32,
    /// Requests left in the current window
    pub remaining: u32,
    /// Seconds until the oldest tracked request leaves the window
    pub reset_after_secs: u64,
}
