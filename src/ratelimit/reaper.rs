//! Background eviction of idle client state.
//!
//! Limiter state is created lazily for every client key and is otherwise kept
//! for the life of the process. With unbounded key cardinality that grows
//! without limit, so the reaper periodically drops state that has been idle
//! long enough to be indistinguishable from a fresh client.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::limiter::RateLimiter;
use crate::config::ReaperConfig;

/// Spawn a task that sweeps `limiter` every `interval`, evicting state idle
/// for at least `idle_ttl`. Abort the returned handle to stop it.
pub fn spawn_idle_reaper(
    limiter: Arc<RateLimiter>,
    interval: Duration,
    idle_ttl: Duration,
) -> JoinHandle<()> {
    info!(
        interval_secs = interval.as_secs_f64(),
        idle_ttl_secs = idle_ttl.as_secs_f64(),
        "Starting idle state reaper"
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let removed = limiter.reap_idle(idle_ttl.as_secs_f64());
            debug!(
                removed = removed,
                tracked = limiter.registry().len(),
                "Idle reaper sweep finished"
            );
        }
    })
}

/// Spawn the reaper if `config` enables it.
pub fn spawn_from_config(limiter: Arc<RateLimiter>, config: &ReaperConfig) -> Option<JoinHandle<()>> {
    config
        .enabled
        .then(|| spawn_idle_reaper(limiter, config.interval(), config.idle_ttl()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::LimitsConfig;
    use crate::ratelimit::ConfigStore;

    fn limiter(clock: &ManualClock) -> Arc<RateLimiter> {
        let limiter = RateLimiter::with_clock(
            Arc::new(ConfigStore::default()),
            &LimitsConfig::default(),
            Arc::new(clock.clone()),
        )
        .unwrap();
        limiter.set_limit_for_path("/api", "token_bucket").unwrap();
        Arc::new(limiter)
    }

    #[tokio::test]
    async fn test_reaper_evicts_idle_state() {
        let clock = ManualClock::new(0.0);
        let limiter = limiter(&clock);
        limiter.check("idle", "/api");
        clock.advance(1000.0);
        limiter.check("active", "/api");

        let handle = spawn_idle_reaper(
            Arc::clone(&limiter),
            Duration::from_millis(10),
            Duration::from_secs(60),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert_eq!(limiter.registry().len(), 1);
        let active = limiter.registry().token_buckets().get_or_create("active");
        assert!(active.available_tokens(1000.0) < 10.0);
    }

    #[tokio::test]
    async fn test_disabled_reaper_is_not_spawned() {
        let clock = ManualClock::new(0.0);
        assert!(spawn_from_config(limiter(&clock), &ReaperConfig::default()).is_none());

        let config = ReaperConfig {
            enabled: true,
            ..ReaperConfig::default()
        };
        let handle = spawn_from_config(limiter(&clock), &config).unwrap();
        handle.abort();
    }
}
