//! Fixed window counter rate limiting.
//!
//! Time is cut into non-overlapping windows of `window_size_secs`, aligned to
//! the epoch. Each client key may make `max_requests` admitted requests per
//! window; the count starts over at every window boundary.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::error::{Result, TollgateError};

/// Parameters shared by every fixed window counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedWindowConfig {
    /// Length of each window in seconds
    #[serde(default = "default_window_size")]
    pub window_size_secs: u64,

    /// Requests admitted per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,
}

fn default_window_size() -> u64 {
    60
}

fn default_max_requests() -> u64 {
    10
}

impl Default for FixedWindowConfig {
    fn default() -> Self {
        Self {
            window_size_secs: default_window_size(),
            max_requests: default_max_requests(),
        }
    }
}

impl FixedWindowConfig {
    /// Create a new fixed window configuration.
    pub fn new(window_size_secs: u64, max_requests: u64) -> Self {
        Self {
            window_size_secs,
            max_requests,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.window_size_secs == 0 {
            return Err(TollgateError::invalid("window_size_secs", "must be positive"));
        }
        if self.max_requests < 1 {
            return Err(TollgateError::invalid("max_requests", "must be at least 1"));
        }
        Ok(())
    }

    /// Index of the window containing `now`.
    pub fn window_key(&self, now: f64) -> i64 {
        (now / self.window_size_secs as f64).floor() as i64
    }
}

/// Result of a single fixed window attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedWindowOutcome {
    /// Whether the request was counted
    pub allowed: bool,
    /// Admitted requests in the current window, including this one if allowed
    pub count: u64,
    /// Requests still admissible in the current window
    pub remaining: u64,
    /// Seconds until the current window ends
    pub window_reset_in_seconds: f64,
}

#[derive(Debug, Default)]
struct FixedWindowState {
    window: Option<i64>,
    count: u64,
    last_seen: Option<f64>,
}

/// A single client's window counter.
#[derive(Debug)]
pub struct FixedWindow {
    config: FixedWindowConfig,
    state: Mutex<FixedWindowState>,
}

impl FixedWindow {
    /// Create an empty counter. The configuration must already be validated.
    pub(crate) fn new(config: FixedWindowConfig) -> Self {
        Self {
            config,
            state: Mutex::new(FixedWindowState::default()),
        }
    }

    /// Roll the window over if needed, then try to count one request.
    ///
    /// A rejected request does not change the count.
    pub fn try_consume(&self, now: f64) -> FixedWindowOutcome {
        let window = self.config.window_key(now);
        let mut state = self.state.lock();

        if state.window != Some(window) {
            state.window = Some(window);
            state.count = 0;
        }
        state.last_seen = Some(now);

        let allowed = state.count < self.config.max_requests;
        if allowed {
            state.count += 1;
        }

        let window_end = (window + 1) as f64 * self.config.window_size_secs as f64;
        FixedWindowOutcome {
            allowed,
            count: state.count,
            remaining: self.config.max_requests.saturating_sub(state.count),
            window_reset_in_seconds: window_end - now,
        }
    }

    /// Admitted requests in the window containing `now`.
    pub fn current_count(&self, now: f64) -> u64 {
        let state = self.state.lock();
        if state.window == Some(self.config.window_key(now)) {
            state.count
        } else {
            0
        }
    }

    /// Whether the counter belongs to an expired window and has not been
    /// touched for at least `idle_ttl` seconds.
    pub(crate) fn is_idle(&self, now: f64, idle_ttl: f64) -> bool {
        let state = self.state.lock();
        let expired = state.window != Some(self.config.window_key(now));
        match state.last_seen {
            Some(last) => expired && now - last >= idle_ttl,
            None => true,
        }
    }
}

/// Window counters for every client key.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    config: FixedWindowConfig,
    windows: DashMap<String, Arc<FixedWindow>>,
}

impl FixedWindowLimiter {
    /// Create a limiter, rejecting invalid parameters.
    pub fn new(config: FixedWindowConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            windows: DashMap::new(),
        })
    }

    /// The parameters every counter is created with.
    pub fn config(&self) -> &FixedWindowConfig {
        &self.config
    }

    /// Get the counter for `key`, creating it on first use.
    pub fn get_or_create(&self, key: &str) -> Arc<FixedWindow> {
        if let Some(window) = self.windows.get(key) {
            return Arc::clone(window.value());
        }

        let entry = self.windows.entry(key.to_string()).or_insert_with(|| {
            debug!(
                key = %key,
                window_size_secs = self.config.window_size_secs,
                max_requests = self.config.max_requests,
                "Creating new fixed window counter"
            );
            Arc::new(FixedWindow::new(self.config))
        });
        Arc::clone(entry.value())
    }

    /// Try to count a request for `key` at time `now`.
    pub fn try_consume(&self, key: &str, now: f64) -> FixedWindowOutcome {
        let window = self.get_or_create(key);
        window.try_consume(now)
    }

    /// Remove counters whose window has passed and that have been idle for at
    /// least `idle_ttl` seconds. Counters held by an in-flight request are kept.
    pub fn remove_idle(&self, now: f64, idle_ttl: f64) -> usize {
        let mut removed = 0;
        self.windows.retain(|_, window| {
            let evict = Arc::strong_count(window) == 1 && window.is_idle(now, idle_ttl);
            if evict {
                removed += 1;
            }
            !evict
        });
        removed
    }

    /// Number of tracked client keys.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Whether no client key is tracked.
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Drop all counters.
    pub fn clear(&self) {
        self.windows.clear();
    }
}

impl Default for FixedWindowLimiter {
    fn default() -> Self {
        Self {
            config: FixedWindowConfig::default(),
            windows: DashMap::new(),
        }
    }
}
