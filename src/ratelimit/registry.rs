//! Ownership of per-client limiter state.

use std::sync::Arc;
use tracing::info;

use super::algorithm::Algorithm;
use super::fixed_window::{FixedWindow, FixedWindowConfig, FixedWindowLimiter, FixedWindowOutcome};
use super::token_bucket::{TokenBucket, TokenBucketConfig, TokenBucketLimiter, TokenBucketOutcome};
use crate::error::Result;

/// A handle to one client's state under one algorithm.
#[derive(Debug, Clone)]
pub enum LimiterHandle {
    /// A token bucket
    TokenBucket(Arc<TokenBucket>),
    /// A fixed window counter
    FixedWindow(Arc<FixedWindow>),
}

impl LimiterHandle {
    /// The algorithm this handle applies.
    pub fn algorithm(&self) -> Algorithm {
        match self {
            LimiterHandle::TokenBucket(_) => Algorithm::TokenBucket,
            LimiterHandle::FixedWindow(_) => Algorithm::FixedWindow,
        }
    }

    /// Attempt to admit one request at `now`.
    pub fn try_consume(&self, now: f64) -> LimiterOutcome {
        match self {
            LimiterHandle::TokenBucket(bucket) => LimiterOutcome::TokenBucket(bucket.try_consume(now)),
            LimiterHandle::FixedWindow(window) => LimiterOutcome::FixedWindow(window.try_consume(now)),
        }
    }
}

/// The algorithm-specific result of an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LimiterOutcome {
    /// Result from a token bucket
    TokenBucket(TokenBucketOutcome),
    /// Result from a fixed window counter
    FixedWindow(FixedWindowOutcome),
}

impl LimiterOutcome {
    /// Whether the request was admitted.
    pub fn allowed(&self) -> bool {
        match self {
            LimiterOutcome::TokenBucket(outcome) => outcome.allowed,
            LimiterOutcome::FixedWindow(outcome) => outcome.allowed,
        }
    }

    /// Seconds the client should wait before retrying, when rejected.
    ///
    /// For a fixed window this is the time until the window rolls over.
    pub fn retry_after_seconds(&self) -> Option<f64> {
        match self {
            LimiterOutcome::TokenBucket(outcome) => outcome.retry_after_seconds,
            LimiterOutcome::FixedWindow(outcome) if !outcome.allowed => {
                Some(outcome.window_reset_in_seconds)
            }
            LimiterOutcome::FixedWindow(_) => None,
        }
    }

    /// Remaining tokens, or remaining requests in the window.
    pub fn remaining(&self) -> f64 {
        match self {
            LimiterOutcome::TokenBucket(outcome) => outcome.tokens_remaining,
            LimiterOutcome::FixedWindow(outcome) => outcome.remaining as f64,
        }
    }
}

/// Lazily creates and owns one limiter state per (algorithm, client key).
///
/// Algorithm parameters are process-wide: every client of an algorithm gets
/// the same capacity/refill rate or window size/limit.
#[derive(Debug)]
pub struct RateLimitRegistry {
    token_buckets: TokenBucketLimiter,
    fixed_windows: FixedWindowLimiter,
}

impl RateLimitRegistry {
    /// Create a registry, validating both algorithms' parameters.
    pub fn new(token_bucket: TokenBucketConfig, fixed_window: FixedWindowConfig) -> Result<Self> {
        Ok(Self {
            token_buckets: TokenBucketLimiter::new(token_bucket)?,
            fixed_windows: FixedWindowLimiter::new(fixed_window)?,
        })
    }

    /// Get or create `key`'s state for `algorithm`.
    ///
    /// Returns `None` for [`Algorithm::None`], which keeps no state.
    pub fn get_or_create(&self, algorithm: Algorithm, key: &str) -> Option<LimiterHandle> {
        match algorithm {
            Algorithm::TokenBucket => {
                Some(LimiterHandle::TokenBucket(self.token_buckets.get_or_create(key)))
            }
            Algorithm::FixedWindow => {
                Some(LimiterHandle::FixedWindow(self.fixed_windows.get_or_create(key)))
            }
            Algorithm::None => None,
        }
    }

    /// The token bucket limiter.
    pub fn token_buckets(&self) -> &TokenBucketLimiter {
        &self.token_buckets
    }

    /// The fixed window limiter.
    pub fn fixed_windows(&self) -> &FixedWindowLimiter {
        &self.fixed_windows
    }

    /// Evict state that has been idle for at least `idle_ttl` seconds.
    ///
    /// Returns the number of entries removed.
    pub fn reap_idle(&self, now: f64, idle_ttl: f64) -> usize {
        let buckets = self.token_buckets.remove_idle(now, idle_ttl);
        let windows = self.fixed_windows.remove_idle(now, idle_ttl);

        if buckets + windows > 0 {
            info!(
                token_buckets = buckets,
                fixed_windows = windows,
                remaining = self.len(),
                "Evicted idle rate limit state"
            );
        }
        buckets + windows
    }

    /// Total number of tracked (algorithm, key) pairs.
    pub fn len(&self) -> usize {
        self.token_buckets.len() + self.fixed_windows.len()
    }

    /// Whether no state is tracked.
    pub fn is_empty(&self) -> bool {
        self.token_buckets.is_empty() && self.fixed_windows.is_empty()
    }

    /// Drop all state.
    pub fn clear(&self) {
        self.token_buckets.clear();
        self.fixed_windows.clear();
    }
}

impl Default for RateLimitRegistry {
    fn default() -> Self {
        Self {
            token_buckets: TokenBucketLimiter::default(),
            fixed_windows: FixedWindowLimiter::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_registry_creation() {
        let registry = RateLimitRegistry::default();
        assert!(registry.is_empty());
        assert_eq!(registry.token_buckets().config().capacity, 10);
        assert_eq!(registry.fixed_windows().config().window_size_secs, 60);
    }

    #[test]
    fn test_registry_rejects_invalid_parameters() {
        let err = RateLimitRegistry::new(
            TokenBucketConfig::default(),
            FixedWindowConfig::new(60, 0),
        )
        .unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_none_has_no_state() {
        let registry = RateLimitRegistry::default();
        assert!(registry.get_or_create(Algorithm::None, "client").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_algorithms_keep_separate_state() {
        let registry = RateLimitRegistry::new(
            TokenBucketConfig::new(1, 1.0),
            FixedWindowConfig::new(60, 1),
        )
        .unwrap();

        let bucket = registry.get_or_create(Algorithm::TokenBucket, "client").unwrap();
        let window = registry.get_or_create(Algorithm::FixedWindow, "client").unwrap();
        assert_eq!(bucket.algorithm(), Algorithm::TokenBucket);
        assert_eq!(window.algorithm(), Algorithm::FixedWindow);

        assert!(bucket.try_consume(0.0).allowed());
        // Draining the bucket leaves the window untouched
        assert!(window.try_consume(0.0).allowed());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_concurrent_get_or_create_builds_one_instance() {
        let registry = Arc::new(RateLimitRegistry::default());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    match registry.get_or_create(Algorithm::TokenBucket, "racy") {
                        Some(LimiterHandle::TokenBucket(bucket)) => bucket,
                        other => panic!("unexpected handle: {:?}", other),
                    }
                })
            })
            .collect();

        let buckets: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(buckets.iter().all(|b| Arc::ptr_eq(b, &buckets[0])));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_outcome_retry_hints() {
        let registry = RateLimitRegistry::new(
            TokenBucketConfig::new(1, 0.5),
            FixedWindowConfig::new(60, 1),
        )
        .unwrap();

        let bucket = registry.get_or_create(Algorithm::TokenBucket, "client").unwrap();
        assert_eq!(bucket.try_consume(0.0).retry_after_seconds(), None);
        let denied = bucket.try_consume(0.0);
        assert!(!denied.allowed());
        assert_eq!(denied.retry_after_seconds(), Some(2.0));

        let window = registry.get_or_create(Algorithm::FixedWindow, "client").unwrap();
        let allowed = window.try_consume(15.0);
        assert_eq!(allowed.retry_after_seconds(), None);
        assert_eq!(allowed.remaining(), 0.0);
        assert_eq!(window.try_consume(15.0).retry_after_seconds(), Some(45.0));
    }

    #[test]
    fn test_reap_idle_and_clear() {
        let registry = RateLimitRegistry::default();
        registry.token_buckets().try_consume("a", 0.0);
        registry.fixed_windows().try_consume("b", 0.0);
        registry.token_buckets().try_consume("c", 500.0);

        assert_eq!(registry.reap_idle(600.0, 300.0), 2);
        assert_eq!(registry.len(), 1);

        registry.clear();
        assert!(registry.is_empty());
    }
}
