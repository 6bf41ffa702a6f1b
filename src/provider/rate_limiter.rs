//! Client-side sliding-window rate limiter for provider requests.
//!
//! Proactively throttles requests to stay within a requests-per-minute budget
//! instead of relying on 429 backpressure. Spreads requests across the minute
//! window to avoid bursts.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// A sliding-window limiter tracking request timestamps within one minute.
#[derive(Debug)]
pub struct RpmLimiter {
    /// Requests per minute limit (0 = unlimited).
    rpm: usize,
    /// Timestamps of recent requests within the window.
    requests: VecDeque<Instant>,
    /// Sliding window duration (1 minute).
    window: Duration,
}

impl RpmLimiter {
    /// Create a limiter with the given requests-per-minute budget.
    #[must_use]
    pub const fn new(rpm: usize) -> Self {
        Self {
            rpm,
            requests: VecDeque::new(),
            window: Duration::from_secs(60),
        }
    }

    /// Check if a request can proceed now.
    ///
    /// Returns `None` if the request can proceed immediately, or `Some(delay)`
    /// indicating how long to wait before retrying.
    pub fn check(&mut self) -> Option<Duration> {
        let now = Instant::now();
        self.prune(now);

        if self.rpm > 0 && self.requests.len() >= self.rpm {
            if let Some(&oldest) = self.requests.front() {
                let wait = self.window.saturating_sub(now.duration_since(oldest));
                if !wait.is_zero() {
                    return Some(wait);
                }
            }
        }

        None
    }

    /// Record a dispatched request.
    pub fn record(&mut self) {
        self.requests.push_back(Instant::now());
    }

    /// Check if a budget is configured.
    #[must_use]
    pub const fn has_limit(&self) -> bool {
        self.rpm > 0
    }

    /// Requests dispatched within the current window.
    pub fn current_usage(&mut self) -> usize {
        self.prune(Instant::now());
        self.requests.len()
    }

    /// Remove entries older than the sliding window.
    fn prune(&mut self, now: Instant) {
        let cutoff = now - self.window;
        while self.requests.front().is_some_and(|t| *t < cutoff) {
            self.requests.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limiter_unlimited() {
        let mut limiter = RpmLimiter::new(0);
        assert!(!limiter.has_limit());
        for _ in 0..100 {
            assert!(limiter.check().is_none());
            limiter.record();
        }
    }

    #[test]
    fn test_limiter_rpm_budget() {
        let mut limiter = RpmLimiter::new(2);

        // First two requests should pass
        assert!(limiter.check().is_none());
        limiter.record();
        assert!(limiter.check().is_none());
        limiter.record();

        // Third request should be delayed
        let delay = limiter.check();
        assert!(delay.is_some());
        assert!(delay.unwrap() > Duration::ZERO);
    }

    #[test]
    fn test_current_usage() {
        let mut limiter = RpmLimiter::new(10);
        limiter.record();
        limiter.record();
        limiter.record();
        assert_eq!(limiter.current_usage(), 3);
    }
}
