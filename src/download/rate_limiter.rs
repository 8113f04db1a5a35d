//! Per-service rate limiting via sliding call windows.
//!
//! This module provides the [`ServiceRateLimiter`] struct which enforces a
//! maximum number of calls per time window for each named external service
//! (the structured full-text API, the metadata source, the LLM provider).
//!
//! # Overview
//!
//! Each service has its own window, so calls to different services proceed
//! independently. A window is a list of admission timestamps pruned to the
//! last `window` seconds; a call is admitted when fewer than `max_calls`
//! timestamps remain after pruning, and every admitted call is stamped into
//! the window.
//!
//! Services without a configured limit pass through unthrottled.
//!
//! # Example
//!
//! ```
//! use pubminer_core::config::RateLimitConfig;
//! use pubminer_core::download::ServiceRateLimiter;
//!
//! # async fn example() {
//! // At most 3 calls per second to the "pubmed" service
//! let limiter = ServiceRateLimiter::new(&[RateLimitConfig::new("pubmed", 3, 1)]);
//!
//! limiter.acquire("pubmed").await; // immediate
//! limiter.acquire("pubmed").await; // immediate
//! limiter.acquire("pubmed").await; // immediate
//! limiter.acquire("pubmed").await; // waits for the window to slide
//! limiter.acquire("crossref").await; // unconfigured - immediate
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::config::RateLimitConfig;

/// Floor applied to waits so a saturated window does not spin.
const MIN_WAIT: Duration = Duration::from_millis(10);

/// Sliding-window state for one service.
///
/// The timestamp list is the shared resource mutated by concurrent workers;
/// it lives behind a `tokio::sync::Mutex` so read-prune-admit is atomic.
#[derive(Debug)]
struct ServiceWindow {
    max_calls: usize,
    window: Duration,
    calls: Mutex<VecDeque<Instant>>,
}

impl ServiceWindow {
    fn new(max_calls: usize, window: Duration) -> Self {
        Self {
            max_calls,
            window,
            calls: Mutex::new(VecDeque::new()),
        }
    }

    /// Attempts one admission. Returns `None` on success, or the duration to
    /// wait before the next attempt.
    async fn try_admit(&self) -> Option<Duration> {
        let mut calls = self.calls.lock().await;
        let now = Instant::now();

        // Prune entries that slid out of [now - window, now]
        while calls
            .front()
            .is_some_and(|&t| now.duration_since(t) >= self.window)
        {
            calls.pop_front();
        }

        if calls.len() < self.max_calls {
            calls.push_back(now);
            return None;
        }

        // Wait until the oldest admission leaves the window
        let wait = calls
            .front()
            .map(|&t| (t + self.window).saturating_duration_since(now))
            .unwrap_or(MIN_WAIT);
        Some(wait.max(MIN_WAIT))
    }
}

/// Per-service rate limiter shared across worker tasks.
///
/// Wrap in `Arc` and clone the handle into each worker; all state is
/// interior and mutex-guarded.
#[derive(Debug)]
pub struct ServiceRateLimiter {
    services: DashMap<String, Arc<ServiceWindow>>,
}

impl ServiceRateLimiter {
    /// Creates a limiter from configured per-service limits.
    #[must_use]
    pub fn new(limits: &[RateLimitConfig]) -> Self {
        let services = DashMap::new();
        for limit in limits {
            services.insert(
                limit.service.clone(),
                Arc::new(ServiceWindow::new(
                    limit.max_calls as usize,
                    Duration::from_secs(limit.window_secs),
                )),
            );
        }
        Self { services }
    }

    /// Creates a limiter with no configured services (everything unthrottled).
    #[must_use]
    pub fn unlimited() -> Self {
        Self {
            services: DashMap::new(),
        }
    }

    /// Returns true if the named service has a configured limit.
    #[must_use]
    pub fn is_limited(&self, service: &str) -> bool {
        self.services.contains_key(service)
    }

    /// Blocks until the named service admits one more call, then records it.
    ///
    /// Unconfigured services return immediately.
    #[instrument(skip(self))]
    pub async fn acquire(&self, service: &str) {
        // Clone the Arc so the DashMap shard lock is released before awaiting
        let Some(window) = self.services.get(service).map(|e| Arc::clone(e.value())) else {
            return;
        };

        loop {
            match window.try_admit().await {
                None => return,
                Some(wait) => {
                    debug!(service, wait_ms = wait.as_millis(), "rate limit window full");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn limiter(max_calls: u32, window_secs: u64) -> ServiceRateLimiter {
        ServiceRateLimiter::new(&[RateLimitConfig::new("svc", max_calls, window_secs)])
    }

    #[tokio::test]
    async fn test_calls_within_window_are_immediate() {
        tokio::time::pause();
        let limiter = limiter(3, 1);
        let start = Instant::now();

        limiter.acquire("svc").await;
        limiter.acquire("svc").await;
        limiter.acquire("svc").await;

        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_call_over_window_limit_waits() {
        tokio::time::pause();
        let limiter = limiter(3, 1);
        let start = Instant::now();

        limiter.acquire("svc").await;
        limiter.acquire("svc").await;
        limiter.acquire("svc").await;
        // Fourth call must wait for the first admission to age out
        limiter.acquire("svc").await;

        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_window_slides_rather_than_resets() {
        tokio::time::pause();
        let limiter = limiter(2, 2);

        limiter.acquire("svc").await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        limiter.acquire("svc").await;

        // First admission ages out after 2s total; third call should wait
        // roughly 1 more second, not the full window.
        let start = Instant::now();
        limiter.acquire("svc").await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(900), "waited {waited:?}");
        assert!(waited < Duration::from_millis(1600), "waited {waited:?}");
    }

    #[tokio::test]
    async fn test_unconfigured_service_passes_through() {
        tokio::time::pause();
        let limiter = limiter(1, 60);
        let start = Instant::now();

        limiter.acquire("other").await;
        limiter.acquire("other").await;
        limiter.acquire("other").await;

        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_services_are_independent() {
        tokio::time::pause();
        let limiter = ServiceRateLimiter::new(&[
            RateLimitConfig::new("a", 1, 60),
            RateLimitConfig::new("b", 1, 60),
        ]);

        let start = Instant::now();
        limiter.acquire("a").await;
        limiter.acquire("b").await;
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[test]
    fn test_is_limited() {
        let limiter = limiter(1, 1);
        assert!(limiter.is_limited("svc"));
        assert!(!limiter.is_limited("other"));
    }

    #[test]
    fn test_unlimited_has_no_services() {
        let limiter = ServiceRateLimiter::unlimited();
        assert!(!limiter.is_limited("pubmed"));
    }
}
