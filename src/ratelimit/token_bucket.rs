//! Token bucket rate limiting.
//!
//! Each client key owns a bucket holding up to `capacity` tokens. Tokens are
//! refilled continuously at `refill_rate_per_second` and one token is drained
//! per admitted request.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::error::{Result, TollgateError};

/// Parameters shared by every token bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenBucketConfig {
    /// Maximum number of tokens a bucket can hold
    #[serde(default = "default_capacity")]
    pub capacity: u64,

    /// Tokens added per second
    #[serde(default = "default_refill_rate")]
    pub refill_rate_per_second: f64,
}

fn default_capacity() -> u64 {
    10
}

fn default_refill_rate() -> f64 {
    1.0
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            refill_rate_per_second: default_refill_rate(),
        }
    }
}

impl TokenBucketConfig {
    /// Create a new token bucket configuration.
    pub fn new(capacity: u64, refill_rate_per_second: f64) -> Self {
        Self {
            capacity,
            refill_rate_per_second,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.capacity < 1 {
            return Err(TollgateError::invalid("capacity", "must be at least 1"));
        }
        if !self.refill_rate_per_second.is_finite() || self.refill_rate_per_second <= 0.0 {
            return Err(TollgateError::invalid(
                "refill_rate_per_second",
                format!("must be a positive number, got {}", self.refill_rate_per_second),
            ));
        }
        Ok(())
    }
}

/// Result of a single token bucket consumption attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucketOutcome {
    /// Whether a token was consumed
    pub allowed: bool,
    /// Tokens left in the bucket after this attempt
    pub tokens_remaining: f64,
    /// Seconds until one full token is available, when denied
    pub retry_after_seconds: Option<f64>,
}

#[derive(Debug)]
struct TokenBucketState {
    tokens: f64,
    /// `None` until the first request arrives
    last_refill: Option<f64>,
}

/// A single client's token bucket.
///
/// All updates go through one mutex, so concurrent attempts against the same
/// bucket are serialized.
#[derive(Debug)]
pub struct TokenBucket {
    config: TokenBucketConfig,
    state: Mutex<TokenBucketState>,
}

impl TokenBucket {
    /// Create a full bucket. The configuration must already be validated.
    pub(crate) fn new(config: TokenBucketConfig) -> Self {
        Self {
            config,
            state: Mutex::new(TokenBucketState {
                tokens: config.capacity as f64,
                last_refill: None,
            }),
        }
    }

    /// Refill the bucket up to `now`, then try to take one token.
    pub fn try_consume(&self, now: f64) -> TokenBucketOutcome {
        let rate = self.config.refill_rate_per_second;
        let mut state = self.state.lock();

        Self::refill(&mut state, &self.config, now);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            TokenBucketOutcome {
                allowed: true,
                tokens_remaining: state.tokens,
                retry_after_seconds: None,
            }
        } else {
            TokenBucketOutcome {
                allowed: false,
                tokens_remaining: state.tokens,
                retry_after_seconds: Some((1.0 - state.tokens) / rate),
            }
        }
    }

    /// Tokens that would be available at `now`, without consuming any.
    pub fn available_tokens(&self, now: f64) -> f64 {
        let state = self.state.lock();
        match state.last_refill {
            Some(last) => {
                let elapsed = (now - last).max(0.0);
                (state.tokens + elapsed * self.config.refill_rate_per_second)
                    .min(self.config.capacity as f64)
            }
            None => state.tokens,
        }
    }

    /// Whether the bucket has not been touched for at least `idle_ttl` seconds
    /// and has refilled to capacity, so dropping it loses nothing.
    pub(crate) fn is_idle(&self, now: f64, idle_ttl: f64) -> bool {
        let state = self.state.lock();
        match state.last_refill {
            Some(last) => {
                let elapsed = (now - last).max(0.0);
                let capacity = self.config.capacity as f64;
                let refilled = state.tokens + elapsed * self.config.refill_rate_per_second;
                elapsed >= idle_ttl && refilled >= capacity
            }
            None => true,
        }
    }

    fn refill(state: &mut TokenBucketState, config: &TokenBucketConfig, now: f64) {
        let last = *state.last_refill.get_or_insert(now);
        let elapsed = (now - last).max(0.0);

        state.tokens =
            (state.tokens + elapsed * config.refill_rate_per_second).min(config.capacity as f64);
        // A clock that steps backwards must not let the same interval be credited twice.
        state.last_refill = Some(last.max(now));
    }
}

/// Token buckets for every client key.
#[derive(Debug)]
pub struct TokenBucketLimiter {
    config: TokenBucketConfig,
    buckets: DashMap<String, Arc<TokenBucket>>,
}

impl TokenBucketLimiter {
    /// Create a limiter, rejecting invalid parameters.
    pub fn new(config: TokenBucketConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            buckets: DashMap::new(),
        })
    }

    /// The parameters every bucket is created with.
    pub fn config(&self) -> &TokenBucketConfig {
        &self.config
    }

    /// Get the bucket for `key`, creating a full one on first use.
    ///
    /// Concurrent callers for the same key always receive the same bucket.
    pub fn get_or_create(&self, key: &str) -> Arc<TokenBucket> {
        if let Some(bucket) = self.buckets.get(key) {
            return Arc::clone(bucket.value());
        }

        let entry = self.buckets.entry(key.to_string()).or_insert_with(|| {
            debug!(
                key = %key,
                capacity = self.config.capacity,
                refill_rate = self.config.refill_rate_per_second,
                "Creating new token bucket"
            );
            Arc::new(TokenBucket::new(self.config))
        });
        Arc::clone(entry.value())
    }

    /// Try to consume a token from `key`'s bucket at time `now`.
    pub fn try_consume(&self, key: &str, now: f64) -> TokenBucketOutcome {
        // The map guard is released before the bucket lock is taken.
        let bucket = self.get_or_create(key);
        bucket.try_consume(now)
    }

    /// Remove buckets idle for at least `idle_ttl` seconds.
    ///
    /// Buckets currently held by an in-flight request are kept.
    pub fn remove_idle(&self, now: f64, idle_ttl: f64) -> usize {
        let mut removed = 0;
        self.buckets.retain(|_, bucket| {
            let evict = Arc::strong_count(bucket) == 1 && bucket.is_idle(now, idle_ttl);
            if evict {
                removed += 1;
            }
            !evict
        });
        removed
    }

    /// Number of tracked client keys.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether no client key is tracked.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Drop all buckets.
    pub fn clear(&self) {
        self.buckets.clear();
    }
}

impl Default for TokenBucketLimiter {
    fn default() -> Self {
        Self {
            config: TokenBucketConfig::default(),
            buckets: DashMap::new(),
        }
    }
}
