use super::types::{RateLimitResult, RateLimiterConfig};
use crate::clock::Clock;
use crate::error::{ProxyError, Result};
use crate::metrics;
use crate::sweep::SweepTask;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, warn};

/// Request history for one client
#[derive(Debug)]
struct ClientWindow {
    /// Insertion sequence number, used for eviction order
    seq: u64,
    /// Request timestamps in milliseconds, oldest first
    stamps: VecDeque<u64>,
}

impl ClientWindow {
    /// Drop timestamps that have left the window
    fn prune(&mut self, now: u64, interval_ms: u64) {
        while let Some(&oldest) = self.stamps.front() {
            if now.saturating_sub(oldest) >= interval_ms {
                self.stamps.pop_front();
            } else {
                break;
            }
        }
    }
}

#[derive(Debug, Default)]
struct LimiterState {
    clients: HashMap<String, ClientWindow>,
    /// seq -> client key, oldest insertion first
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

impl LimiterState {
    fn insert(&mut self, key: &str, now: u64) {
        let seq = self.next_seq;
        self.next_seq += 1;

        let mut stamps = VecDeque::new();
        stamps.push_back(now);

        self.clients
            .insert(key.to_string(), ClientWindow { seq, stamps });
        self.order.insert(seq, key.to_string());
    }

    fn remove(&mut self, key: &str) {
        if let Some(window) = self.clients.remove(key) {
            self.order.remove(&window.seq);
        }
    }

    /// Evict oldest-inserted clients until at most `max` remain
    fn evict_overflow(&mut self, max: usize) -> usize {
        let mut evicted = 0;
        while self.clients.len() > max {
            let Some((_, key)) = self.order.pop_first() else {
                break;
            };
            self.clients.remove(&key);
            debug!(client = %key, "Evicted rate limit entry over capacity");
            evicted += 1;
        }
        evicted
    }

    /// Prune every client and drop the ones left empty
    fn prune_all(&mut self, now: u64, interval_ms: u64) -> usize {
        let mut emptied = Vec::new();
        for (key, window) in self.clients.iter_mut() {
            window.prune(now, interval_ms);
            if window.stamps.is_empty() {
                emptied.push(key.clone());
            }
        }

        for key in &emptied {
            self.remove(key);
        }
        emptied.len()
    }
}

/// In-memory sliding-window rate limiter
///
/// Every client keeps the timestamps of its requests inside the window. A
/// request is allowed while fewer than `max_requests` timestamps remain after
/// pruning. Memory is bounded by `max_tracked_clients`; past that the
/// client inserted first is evicted.
pub struct SlidingWindowLimiter {
    config: RateLimiterConfig,
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<LimiterState>>,
    sweeper: Mutex<Option<SweepTask>>,
}

impl SlidingWindowLimiter {
    /// Create a new rate limiter
    pub fn new(config: RateLimiterConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            state: Arc::new(Mutex::new(LimiterState::default())),
            sweeper: Mutex::new(None),
        }
    }

    /// Record one request attempt for `client_key`.
    ///
    /// Rejected attempts are not recorded. If the internal state cannot be
    /// locked the request is rejected.
    pub fn check(&self, client_key: &str, max_requests: u32) -> Result<RateLimitResult> {
        let now = self.clock.now_millis();
        let interval_ms = self.config.interval_ms();

        let mut state = self.lock_state().ok_or_else(|| self.exceeded())?;

        let (count, oldest) = match state.clients.get_mut(client_key) {
            Some(window) => {
                window.prune(now, interval_ms);
                (window.stamps.len(), window.stamps.front().copied())
            }
            None => (0, None),
        };

        if count == 0 {
            state.remove(client_key);
        }

        if count >= max_requests as usize {
            warn!(client = %client_key, limit = max_requests, "Rate limit exceeded");
            let reset_after_ms = oldest
                .map(|t| t.saturating_add(interval_ms).saturating_sub(now))
                .unwrap_or(interval_ms);
            return Err(ProxyError::RateLimitExceeded {
                retry_after_secs: self.config.retry_after_secs(),
                reset_after_secs: reset_after_ms.div_ceil(1000),
            });
        }

        let oldest = match state.clients.get_mut(client_key) {
            Some(window) => {
                window.stamps.push_back(now);
                window.stamps.front().copied().unwrap_or(now)
            }
            None => {
                state.insert(client_key, now);
                now
            }
        };

        state.evict_overflow(self.config.max_tracked_clients);
        metrics::record_tracked_clients(state.clients.len());

        let remaining = max_requests - (count as u32 + 1);
        let reset_after_ms = oldest.saturating_add(interval_ms).saturating_sub(now);

        debug!(client = %client_key, remaining, "Rate limit check passed");

        Ok(RateLimitResult {
            limit: max_requests,
            remaining,
            reset_after_secs: reset_after_ms.div_ceil(1000),
        })
    }

    /// Remove expired timestamps from every client, dropping empty clients.
    /// Returns the number of clients removed.
    pub fn sweep(&self) -> usize {
        sweep_state(&self.state, self.clock.as_ref(), self.config.interval_ms())
    }

    /// Run [`sweep`](Self::sweep) every `interval` in the background until
    /// the limiter is dropped or [`stop_sweeper`](Self::stop_sweeper) is called.
    pub fn start_sweeper(&self) {
        let state = self.state.clone();
        let clock = self.clock.clone();
        let interval_ms = self.config.interval_ms();

        let task = SweepTask::spawn("rate_limit_sweep", self.config.interval, move || {
            let removed = sweep_state(&state, clock.as_ref(), interval_ms);
            async move {
                if removed > 0 {
                    debug!(removed, "Swept idle rate limit clients");
                }
            }
        });

        if let Ok(mut slot) = self.sweeper.lock() {
            *slot = Some(task);
        }
    }

    pub fn stop_sweeper(&self) {
        if let Ok(mut slot) = self.sweeper.lock() {
            if let Some(task) = slot.take() {
                task.stop();
            }
        }
    }

    /// Number of distinct clients currently tracked
    pub fn tracked_clients(&self) -> usize {
        self.lock_state().map(|s| s.clients.len()).unwrap_or(0)
    }

    fn lock_state(&self) -> Option<MutexGuard<'_, LimiterState>> {
        match self.state.lock() {
            Ok(guard) => Some(guard),
            Err(_) => {
                error!("Rate limiter state lock poisoned, rejecting request");
                None
            }
        }
    }

    /// Rejection used when the window state is unavailable
    fn exceeded(&self) -> ProxyError {
        ProxyError::RateLimitExceeded {
            retry_after_secs: self.config.retry_after_secs(),
            reset_after_secs: self.config.retry_after_secs(),
        }
    }
}

fn sweep_state(state: &Mutex<LimiterState>, clock: &dyn Clock, interval_ms: u64) -> usize {
    let now = clock.now_millis();
    match state.lock() {
        Ok(mut guard) => {
            let removed = guard.prune_all(now, interval_ms);
            metrics::record_tracked_clients(guard.clients.len());
            removed
        }
        Err(_) => {
            error!("Rate limiter state lock poisoned, skipping sweep");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    fn limiter(interval_ms: u64, max_clients: usize) -> (SlidingWindowLimiter, ManualClock) {
        let clock = ManualClock::new(1_000_000);
        let limiter = SlidingWindowLimiter::new(
            RateLimiterConfig::configure(interval_ms, max_clients),
            Arc::new(clock.clone()),
        );
        (limiter, clock)
    }

    #[test]
    fn test_allows_exactly_max_then_denies() {
        let (limiter, clock) = limiter(60_000, 500);

        for i in 0..10 {
            let result = limiter.check("192.168.1.1", 10);
            assert!(result.is_ok(), "Request {} should be allowed", i);
            assert_eq!(result.unwrap().remaining, 9 - i);
            clock.advance(Duration::from_millis(100));
        }

        let err = limiter.check("192.168.1.1", 10).unwrap_err();
        assert!(matches!(
            err,
            ProxyError::RateLimitExceeded {
                retry_after_secs: 60,
                ..
            }
        ));
    }

    #[test]
    fn test_window_rollover() {
        let (limiter, clock) = limiter(60_000, 500);

        for _ in 0..5 {
            limiter.check("client", 5).unwrap();
        }
        assert!(limiter.check("client", 5).is_err());

        clock.advance(Duration::from_millis(60_001));
        let result = limiter.check("client", 5).unwrap();
        assert_eq!(result.remaining, 4);
    }

    #[test]
    fn test_denied_requests_are_not_recorded() {
        let (limiter, clock) = limiter(1_000, 500);

        limiter.check("client", 1).unwrap();
        clock.advance(Duration::from_millis(500));
        assert!(limiter.check("client", 1).is_err());

        // Only the first request counts, so it leaves the window at t+1000
        clock.advance(Duration::from_millis(500));
        assert!(limiter.check("client", 1).is_ok());
    }

    #[test]
    fn test_same_millisecond_requests_all_count() {
        let (limiter, _clock) = limiter(60_000, 500);

        for _ in 0..3 {
            limiter.check("burst", 3).unwrap();
        }
        assert!(limiter.check("burst", 3).is_err());
    }

    #[test]
    fn test_clients_are_independent() {
        let (limiter, _clock) = limiter(60_000, 500);

        for _ in 0..2 {
            limiter.check("192.168.1.1", 2).unwrap();
        }
        assert!(limiter.check("192.168.1.1", 2).is_err());
        assert!(limiter.check("192.168.1.2", 2).is_ok());
        assert_eq!(limiter.tracked_clients(), 2);
    }

    #[test]
    fn test_evicts_oldest_inserted_client() {
        let (limiter, clock) = limiter(60_000, 2);

        limiter.check("first", 1).unwrap();
        clock.advance(Duration::from_millis(1));
        limiter.check("second", 5).unwrap();
        clock.advance(Duration::from_millis(1));

        // Touching "first" again does not refresh its position
        assert!(limiter.check("first", 1).is_err());

        limiter.check("third", 5).unwrap();
        assert_eq!(limiter.tracked_clients(), 2);

        // "first" was evicted and starts over
        assert!(limiter.check("first", 1).is_ok());
        assert_eq!(limiter.tracked_clients(), 2);
    }

    #[test]
    fn test_sweep_removes_idle_clients() {
        let (limiter, clock) = limiter(60_000, 500);

        limiter.check("idle", 10).unwrap();
        clock.advance(Duration::from_secs(30));
        limiter.check("active", 10).unwrap();

        clock.advance(Duration::from_secs(31));
        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.tracked_clients(), 1);

        clock.advance(Duration::from_secs(30));
        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[test]
    fn test_reset_after_tracks_oldest_request() {
        let (limiter, clock) = limiter(60_000, 500);

        limiter.check("client", 10).unwrap();
        clock.advance(Duration::from_secs(20));
        let result = limiter.check("client", 10).unwrap();
        assert_eq!(result.reset_after_secs, 40);
        assert_eq!(result.limit, 10);
    }

    #[test]
    fn test_rejection_reports_time_until_window_frees() {
        let (limiter, clock) = limiter(60_000, 500);

        limiter.check("client", 2).unwrap();
        clock.advance(Duration::from_secs(15));
        limiter.check("client", 2).unwrap();
        clock.advance(Duration::from_millis(10_500));

        // Oldest request leaves the window 34.5s from now
        match limiter.check("client", 2) {
            Err(ProxyError::RateLimitExceeded {
                retry_after_secs,
                reset_after_secs,
            }) => {
                assert_eq!(retry_after_secs, 60);
                assert_eq!(reset_after_secs, 35);
            }
            other => panic!("expected rate limit rejection, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_zero_quota_denies_everything() {
        let (limiter, _clock) = limiter(60_000, 500);
        assert!(limiter.check("client", 0).is_err());
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[test]
    fn test_poisoned_state_fails_closed() {
        let (limiter, _clock) = limiter(60_000, 500);
        let state = limiter.state.clone();

        let _ = std::thread::spawn(move || {
            let _guard = state.lock().unwrap();
            panic!("poison the lock");
        })
        .join();

        assert!(matches!(
            limiter.check("client", 10),
            Err(ProxyError::RateLimitExceeded { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweeper() {
        let (limiter, clock) = limiter(60_000, 500);
        limiter.start_sweeper();

        limiter.check("client", 10).unwrap();
        assert_eq!(limiter.tracked_clients(), 1);

        clock.advance(Duration::from_secs(61));
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(limiter.tracked_clients(), 0);

        limiter.stop_sweeper();
    }
}
