//! Rate limiting logic and state management.

mod algorithm;
mod fixed_window;
mod limiter;
mod reaper;
mod registry;
mod rules;
mod store;
mod token_bucket;

pub use algorithm::{Algorithm, MatchKind};
pub use fixed_window::{FixedWindow, FixedWindowConfig, FixedWindowLimiter, FixedWindowOutcome};
pub use limiter::{Decision, RateLimiter};
pub use reaper::{spawn_from_config, spawn_idle_reaper};
pub use registry::{LimiterHandle, LimiterOutcome, RateLimitRegistry};
pub use rules::{
    Resolution, RouteConfiguration, RouteRule, RoutingConfig, RuleConfig, DEFAULT_EXEMPT_PREFIXES,
};
pub use store::{ConfigStore, ADMIN_RULE_PRIORITY};
pub use token_bucket::{TokenBucket, TokenBucketConfig, TokenBucketLimiter, TokenBucketOutcome};
