//! Time sources for rate limit decisions.
//!
//! Limiters never read the system time themselves; every decision takes a
//! `now` timestamp in seconds. The [`Clock`] trait is how the façade obtains
//! that timestamp, so tests can drive time explicitly with a [`ManualClock`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A source of the current time, in seconds since the Unix epoch.
///
/// Implementors must be thread-safe since a single clock is shared by every
/// request handler.
pub trait Clock: Send + Sync {
    /// Current time in (fractional) seconds.
    fn now(&self) -> f64;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same underlying time, so a test can hand one clone to a
/// limiter and keep another to advance it.
#[derive(Debug, Clone)]
pub struct ManualClock {
    /// `f64` seconds stored as raw bits
    bits: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock frozen at `seconds`.
    pub fn new(seconds: f64) -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(seconds.to_bits())),
        }
    }

    /// Jump to an absolute time.
    pub fn set(&self, seconds: f64) {
        self.bits.store(seconds.to_bits(), Ordering::SeqCst);
    }

    /// Move the clock forward (or backward, for negative values).
    pub fn advance(&self, seconds: f64) {
        self.bits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |bits| {
                Some((f64::from_bits(bits) + seconds).to_bits())
            })
            .ok();
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_set_and_advance() {
        let clock = ManualClock::new(5.0);
        assert_eq!(clock.now(), 5.0);

        clock.advance(2.5);
        assert_eq!(clock.now(), 7.5);

        clock.set(0.0);
        assert_eq!(clock.now(), 0.0);

        clock.advance(-1.5);
        assert_eq!(clock.now(), -1.5);
    }

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::default();
        let handle = clock.clone();

        handle.advance(60.0);
        assert_eq!(clock.now(), 60.0);
    }

    #[test]
    fn test_system_clock_is_after_2020() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock.now() > 1_577_836_800.0);
    }
}
