//! Algorithm selection and rule match kinds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TollgateError;

/// The rate limiting algorithm applied to a request.
///
/// This is a closed set: strings arriving from configuration or the admin
/// surface are parsed into it at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Continuous-refill token bucket
    TokenBucket,
    /// Fixed window counter
    FixedWindow,
    /// Not rate limited
    None,
}

impl Algorithm {
    /// The limit type name used in configuration and admin calls.
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::TokenBucket => "token_bucket",
            Algorithm::FixedWindow => "fixed_window",
            Algorithm::None => "none",
        }
    }

    /// Whether requests under this algorithm are rate limited at all.
    pub fn is_limited(&self) -> bool {
        !matches!(self, Algorithm::None)
    }
}

impl FromStr for Algorithm {
    type Err = TollgateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "token_bucket" => Ok(Algorithm::TokenBucket),
            "fixed_window" => Ok(Algorithm::FixedWindow),
            "none" => Ok(Algorithm::None),
            _ => Err(TollgateError::UnknownLimitType(s.to_string())),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a route rule's pattern is compared against a request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// The path must equal the pattern
    Exact,
    /// The path must start with the pattern
    #[default]
    Prefix,
}

impl MatchKind {
    /// Check whether `path` is matched by `pattern` under this kind.
    pub fn matches(&self, pattern: &str, path: &str) -> bool {
        match self {
            MatchKind::Exact => path == pattern,
            MatchKind::Prefix => path.starts_with(pattern),
        }
    }
}
