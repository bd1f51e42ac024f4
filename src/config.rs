//! Configuration management for Tollgate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, TollgateError};
use crate::ratelimit::{FixedWindowConfig, RouteConfiguration, RoutingConfig, TokenBucketConfig};

/// Prefix for environment overrides, e.g. `TOLLGATE__LIMITS__TOKEN_BUCKET__CAPACITY`.
pub const ENV_PREFIX: &str = "TOLLGATE";

/// Main configuration for Tollgate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Algorithm parameters
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Route rules and exemptions
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Idle state eviction
    #[serde(default)]
    pub reaper: ReaperConfig,
}

/// Process-wide algorithm parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Token bucket capacity and refill rate
    #[serde(default)]
    pub token_bucket: TokenBucketConfig,

    /// Fixed window size and request limit
    #[serde(default)]
    pub fixed_window: FixedWindowConfig,
}

impl LimitsConfig {
    /// Validate both algorithms' parameters.
    pub fn validate(&self) -> Result<()> {
        self.token_bucket.validate()?;
        self.fixed_window.validate()
    }
}

/// Background eviction of idle client state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaperConfig {
    /// Whether the reaper runs at all
    #[serde(default)]
    pub enabled: bool,

    /// Seconds between sweeps
    #[serde(default = "default_reaper_interval")]
    pub interval_secs: u64,

    /// Seconds of inactivity after which a client's state may be dropped
    #[serde(default = "default_idle_ttl")]
    pub idle_ttl_secs: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_reaper_interval(),
            idle_ttl_secs: default_idle_ttl(),
        }
    }
}

fn default_reaper_interval() -> u64 {
    60
}

fn default_idle_ttl() -> u64 {
    600
}

impl ReaperConfig {
    /// Time between sweeps.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Idle time after which state is evicted.
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }

    /// Validate the reaper settings.
    pub fn validate(&self) -> Result<()> {
        if self.enabled && self.interval_secs == 0 {
            return Err(TollgateError::invalid("reaper.interval_secs", "must be positive"));
        }
        Ok(())
    }
}

impl TollgateConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TollgateConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional file, overridden by
    /// `TOLLGATE__*` environment variables.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: TollgateConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check every parameter, failing on the first invalid one.
    pub fn validate(&self) -> Result<()> {
        self.limits.validate()?;
        self.reaper.validate()
    }

    /// The route configuration described by the `routing` section.
    pub fn route_configuration(&self) -> RouteConfiguration {
        RouteConfiguration::from_routing(&self.routing)
    }
}
