//! Admission decisions for (client key, request path) pairs.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, trace};

use super::algorithm::Algorithm;
use super::registry::RateLimitRegistry;
use super::store::ConfigStore;
use crate::clock::{Clock, SystemClock};
use crate::config::{LimitsConfig, TollgateConfig};
use crate::error::Result;

/// The outcome of evaluating one request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// The algorithm the path resolved to
    pub algorithm: Algorithm,
    /// Seconds to wait before retrying, when rejected
    pub retry_after_seconds: Option<f64>,
    /// Tokens or window requests left, when the path is limited
    pub remaining: Option<f64>,
}

impl Decision {
    fn unlimited() -> Self {
        Self {
            allowed: true,
            algorithm: Algorithm::None,
            retry_after_seconds: None,
            remaining: None,
        }
    }

    /// Whole seconds for a `Retry-After` header: rounded up, at least 1.
    pub fn retry_after_header_secs(&self) -> Option<u64> {
        self.retry_after_seconds
            .map(|secs| (secs.ceil() as u64).max(1))
    }
}

/// The admission-control entry point.
///
/// Resolves each request path against the live [`ConfigStore`] and applies
/// the selected algorithm to the client's state in the [`RateLimitRegistry`].
/// This struct is thread-safe and can be shared across request handlers.
pub struct RateLimiter {
    store: Arc<ConfigStore>,
    registry: RateLimitRegistry,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("store", &self.store)
            .field("registry", &self.registry)
            .finish()
    }
}

impl RateLimiter {
    /// Create a rate limiter reading wall-clock time.
    pub fn new(store: Arc<ConfigStore>, limits: &LimitsConfig) -> Result<Self> {
        Self::with_clock(store, limits, Arc::new(SystemClock))
    }

    /// Create a rate limiter with an explicit time source.
    pub fn with_clock(
        store: Arc<ConfigStore>,
        limits: &LimitsConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Ok(Self {
            store,
            registry: RateLimitRegistry::new(limits.token_bucket, limits.fixed_window)?,
            clock,
        })
    }

    /// Build the limiter and its configuration store from service configuration.
    pub fn from_config(config: &TollgateConfig) -> Result<Self> {
        let store = Arc::new(ConfigStore::new(config.route_configuration()));
        Self::new(store, &config.limits)
    }

    /// Decide whether `client_key` may access `path` at time `now`.
    ///
    /// Never fails: a path no rule matches falls back to the default algorithm.
    pub fn evaluate(&self, client_key: &str, path: &str, now: f64) -> Decision {
        let algorithm = self.store.snapshot().resolve(path);

        trace!(
            client = %client_key,
            path = %path,
            algorithm = %algorithm,
            "Evaluating request"
        );

        let Some(handle) = self.registry.get_or_create(algorithm, client_key) else {
            return Decision::unlimited();
        };

        let outcome = handle.try_consume(now);
        let decision = Decision {
            allowed: outcome.allowed(),
            algorithm,
            retry_after_seconds: outcome.retry_after_seconds(),
            remaining: Some(outcome.remaining()),
        };

        if !decision.allowed {
            debug!(
                client = %client_key,
                path = %path,
                algorithm = %algorithm,
                retry_after = ?decision.retry_after_seconds,
                "Rate limit exceeded"
            );
        }

        decision
    }

    /// Decide using the limiter's own clock.
    pub fn check(&self, client_key: &str, path: &str) -> Decision {
        self.evaluate(client_key, path, self.clock.now())
    }

    /// Current time according to the limiter's clock.
    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    /// The live route configuration.
    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    /// Per-client limiter state.
    pub fn registry(&self) -> &RateLimitRegistry {
        &self.registry
    }

    /// Admin surface: see [`ConfigStore::set_limit_for_path`].
    pub fn set_limit_for_path(&self, path: &str, limit_type: &str) -> Result<()> {
        self.store.set_limit_for_path(path, limit_type)
    }

    /// Admin surface: see [`ConfigStore::set_limit_for_paths`].
    pub fn set_limit_for_paths<S: AsRef<str>>(&self, paths: &[S], limit_type: &str) -> Result<()> {
        self.store.set_limit_for_paths(paths, limit_type)
    }

    /// Admin surface: see [`ConfigStore::exempt_path`].
    pub fn exempt_path(&self, prefix: &str) {
        self.store.exempt_path(prefix)
    }

    /// Evict client state idle for at least `idle_ttl` seconds.
    pub fn reap_idle(&self, idle_ttl: f64) -> usize {
        self.registry.reap_idle(self.clock.now(), idle_ttl)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self {
            store: Arc::new(ConfigStore::default()),
            registry: RateLimitRegistry::default(),
            clock: Arc::new(SystemClock),
        }
    }
}
