//! Route rules and path resolution.
//!
//! A [`RouteConfiguration`] maps a request path to exactly one [`Algorithm`].
//! Resolution is a pure function of the path and the configuration:
//!
//! 1. A path under any exempt prefix is never limited.
//! 2. Exact rules for the path win; the highest priority is chosen, then the
//!    most recently registered.
//! 3. Otherwise the longest matching prefix rule wins; ties go to the highest
//!    priority, then the most recently registered.
//! 4. With no matching rule the default algorithm applies.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::info;

use super::algorithm::{Algorithm, MatchKind};
use crate::error::Result;

/// Prefixes exempt from rate limiting unless configured otherwise.
pub const DEFAULT_EXEMPT_PREFIXES: &[&str] = &["/health", "/docs", "/redoc", "/openapi.json"];

/// A rule binding a path pattern to an algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRule {
    /// Exact path or path prefix
    pub pattern: String,
    /// How `pattern` is compared against request paths
    pub match_kind: MatchKind,
    /// Algorithm applied to matching requests
    pub algorithm: Algorithm,
    /// Higher wins on conflict
    pub priority: i32,
    /// Registration order; later rules have larger values
    pub sequence: u64,
}

impl RouteRule {
    /// Whether this rule applies to `path`.
    pub fn matches(&self, path: &str) -> bool {
        self.match_kind.matches(&self.pattern, path)
    }
}

/// Why a path resolved to the algorithm it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution<'a> {
    /// The path falls under an exempt prefix
    Exempt(&'a str),
    /// A route rule matched
    Rule(&'a RouteRule),
    /// Nothing matched; the default algorithm applies
    Default(Algorithm),
}

impl Resolution<'_> {
    /// The algorithm selected.
    pub fn algorithm(&self) -> Algorithm {
        match self {
            Resolution::Exempt(_) => Algorithm::None,
            Resolution::Rule(rule) => rule.algorithm,
            Resolution::Default(algorithm) => *algorithm,
        }
    }
}

/// An immutable-once-published set of route rules.
///
/// Instances are shared as snapshots by [`ConfigStore`](super::ConfigStore);
/// mutation happens on a private copy before it is published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteConfiguration {
    rules: Vec<RouteRule>,
    default_algorithm: Algorithm,
    exempt_prefixes: BTreeSet<String>,
    next_sequence: u64,
}

impl RouteConfiguration {
    /// Create an empty configuration with no rules and no exemptions.
    pub fn new(default_algorithm: Algorithm) -> Self {
        Self {
            rules: Vec::new(),
            default_algorithm,
            exempt_prefixes: BTreeSet::new(),
            next_sequence: 0,
        }
    }

    /// Build a configuration from its serialized form, registering rules in
    /// document order.
    pub fn from_routing(routing: &RoutingConfig) -> Self {
        let mut config = Self::new(routing.default_algorithm);
        for prefix in &routing.exempt_prefixes {
            config.exempt(prefix.clone());
        }
        for rule in &routing.rules {
            config.add_rule(rule.path.clone(), rule.algorithm, rule.match_kind, rule.priority);
        }
        config
    }

    /// Resolve the algorithm for `path`.
    pub fn resolve(&self, path: &str) -> Algorithm {
        self.resolve_detailed(path).algorithm()
    }

    /// Resolve `path`, reporting which exemption or rule decided it.
    pub fn resolve_detailed(&self, path: &str) -> Resolution<'_> {
        if let Some(prefix) = self
            .exempt_prefixes
            .iter()
            .find(|prefix| path.starts_with(prefix.as_str()))
        {
            return Resolution::Exempt(prefix);
        }

        let exact = self
            .rules
            .iter()
            .filter(|rule| rule.match_kind == MatchKind::Exact && rule.matches(path))
            .max_by_key(|rule| (rule.priority, rule.sequence));
        if let Some(rule) = exact {
            return Resolution::Rule(rule);
        }

        let prefix = self
            .rules
            .iter()
            .filter(|rule| rule.match_kind == MatchKind::Prefix && rule.matches(path))
            .max_by_key(|rule| (rule.pattern.len(), rule.priority, rule.sequence));

        match prefix {
            Some(rule) => Resolution::Rule(rule),
            None => Resolution::Default(self.default_algorithm),
        }
    }

    /// Register a rule.
    ///
    /// A rule with the same pattern, match kind and priority as an existing
    /// one replaces it and becomes the most recently registered.
    pub fn add_rule(
        &mut self,
        pattern: impl Into<String>,
        algorithm: Algorithm,
        match_kind: MatchKind,
        priority: i32,
    ) {
        let pattern = pattern.into();
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        self.rules.retain(|rule| {
            !(rule.pattern == pattern && rule.match_kind == match_kind && rule.priority == priority)
        });
        self.rules.push(RouteRule {
            pattern,
            match_kind,
            algorithm,
            priority,
            sequence,
        });
    }

    /// Remove every rule whose pattern is `pattern`, returning how many went.
    pub fn remove_rules(&mut self, pattern: &str) -> usize {
        let before = self.rules.len();
        self.rules.retain(|rule| rule.pattern != pattern);
        before - self.rules.len()
    }

    /// Exempt every path starting with `prefix`.
    pub fn exempt(&mut self, prefix: impl Into<String>) -> bool {
        self.exempt_prefixes.insert(prefix.into())
    }

    /// Lift an exemption. Returns whether it existed.
    pub fn remove_exemption(&mut self, prefix: &str) -> bool {
        self.exempt_prefixes.remove(prefix)
    }

    /// Change the algorithm used when no rule matches.
    pub fn set_default_algorithm(&mut self, algorithm: Algorithm) {
        self.default_algorithm = algorithm;
    }

    /// The algorithm used when no rule matches.
    pub fn default_algorithm(&self) -> Algorithm {
        self.default_algorithm
    }

    /// Rules in registration order.
    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    /// Exempt prefixes, sorted.
    pub fn exempt_prefixes(&self) -> impl Iterator<Item = &str> {
        self.exempt_prefixes.iter().map(String::as_str)
    }

    /// Whether `path` falls under an exempt prefix.
    pub fn is_exempt(&self, path: &str) -> bool {
        matches!(self.resolve_detailed(path), Resolution::Exempt(_))
    }
}

impl Default for RouteConfiguration {
    /// No rules, no limiting by default, and the stock exemptions.
    fn default() -> Self {
        Self::from_routing(&RoutingConfig::default())
    }
}

/// Serialized routing section of the configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Algorithm used when no rule matches
    #[serde(default = "default_algorithm")]
    pub default_algorithm: Algorithm,

    /// Path prefixes that are never rate limited
    #[serde(default = "default_exempt_prefixes")]
    pub exempt_prefixes: Vec<String>,

    /// Route rules, registered in order
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

/// A route rule as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Exact path or prefix
    pub path: String,
    /// `exact` or `prefix`
    #[serde(rename = "match", default)]
    pub match_kind: MatchKind,
    /// `token_bucket`, `fixed_window` or `none`
    pub algorithm: Algorithm,
    /// Higher wins on conflict
    #[serde(default)]
    pub priority: i32,
}

fn default_algorithm() -> Algorithm {
    Algorithm::None
}

fn default_exempt_prefixes() -> Vec<String> {
    DEFAULT_EXEMPT_PREFIXES.iter().map(|p| p.to_string()).collect()
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_algorithm: default_algorithm(),
            exempt_prefixes: default_exempt_prefixes(),
            rules: Vec::new(),
        }
    }
}

impl RoutingConfig {
    /// Load routing rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading routing configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load routing rules from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TollgateError;

    fn empty() -> RouteConfiguration {
        RouteConfiguration::new(Algorithm::None)
    }

    #[test]
    fn test_default_configuration() {
        let config = RouteConfiguration::default();
        assert_eq!(config.default_algorithm(), Algorithm::None);
        assert!(config.rules().is_empty());
        assert_eq!(
            config.exempt_prefixes().collect::<Vec<_>>(),
            vec!["/docs", "/health", "/openapi.json", "/redoc"]
        );
        assert_eq!(config.resolve("/health"), Algorithm::None);
        assert_eq!(config.resolve("/anything"), Algorithm::None);
    }

    #[test]
    fn test_exact_beats_prefix() {
        let mut config = empty();
        config.add_rule("/api", Algorithm::TokenBucket, MatchKind::Prefix, 1);
        config.add_rule("/api/users", Algorithm::FixedWindow, MatchKind::Exact, 5);

        assert_eq!(config.resolve("/api/users"), Algorithm::FixedWindow);
        assert_eq!(config.resolve("/api/posts"), Algorithm::TokenBucket);
    }

    #[test]
    fn test_exact_beats_prefix_regardless_of_priority() {
        let mut config = empty();
        config.add_rule("/api", Algorithm::TokenBucket, MatchKind::Prefix, 100);
        config.add_rule("/api/users", Algorithm::FixedWindow, MatchKind::Exact, -5);

        assert_eq!(config.resolve("/api/users"), Algorithm::FixedWindow);
        // Exact rules never match longer paths
        assert_eq!(config.resolve("/api/users/7"), Algorithm::TokenBucket);
    }

    #[test]
    fn test_exact_rules_prefer_priority_then_recency() {
        let mut config = empty();
        config.add_rule("/login", Algorithm::FixedWindow, MatchKind::Exact, 5);
        config.add_rule("/login", Algorithm::TokenBucket, MatchKind::Exact, 1);
        assert_eq!(config.resolve("/login"), Algorithm::FixedWindow);

        config.add_rule("/login", Algorithm::None, MatchKind::Exact, 5);
        // Same priority: the later registration wins
        assert_eq!(config.resolve("/login"), Algorithm::None);
    }

    #[test]
    fn test_longest_prefix_wins() {
        let mut config = empty();
        config.add_rule("/api", Algorithm::TokenBucket, MatchKind::Prefix, 10);
        config.add_rule("/api/users", Algorithm::FixedWindow, MatchKind::Prefix, 0);

        assert_eq!(config.resolve("/api/users/123"), Algorithm::FixedWindow);
        assert_eq!(config.resolve("/api/posts"), Algorithm::TokenBucket);
    }

    #[test]
    fn test_prefix_ties_prefer_priority_then_recency() {
        let mut config = empty();
        config.add_rule("/api", Algorithm::FixedWindow, MatchKind::Prefix, 2);
        config.add_rule("/api", Algorithm::TokenBucket, MatchKind::Prefix, 1);
        assert_eq!(config.resolve("/api/x"), Algorithm::FixedWindow);

        config.add_rule("/api", Algorithm::TokenBucket, MatchKind::Prefix, 2);
        assert_eq!(config.resolve("/api/x"), Algorithm::TokenBucket);
    }

    #[test]
    fn test_reregistering_replaces_rule() {
        let mut config = empty();
        config.add_rule("/api/users", Algorithm::TokenBucket, MatchKind::Prefix, 0);
        config.add_rule("/api/users", Algorithm::FixedWindow, MatchKind::Prefix, 0);

        assert_eq!(config.rules().len(), 1);
        assert_eq!(config.resolve("/api/users"), Algorithm::FixedWindow);
    }

    #[test]
    fn test_exemption_beats_any_rule() {
        let mut config = empty();
        config.add_rule("/public/feed", Algorithm::TokenBucket, MatchKind::Exact, i32::MAX);
        config.exempt("/public");

        assert_eq!(config.resolve("/public/feed"), Algorithm::None);
        assert!(matches!(config.resolve_detailed("/public/feed"), Resolution::Exempt("/public")));
        assert!(config.is_exempt("/public/feed"));

        assert!(config.remove_exemption("/public"));
        assert_eq!(config.resolve("/public/feed"), Algorithm::TokenBucket);
    }

    #[test]
    fn test_default_algorithm_when_nothing_matches() {
        let mut config = empty();
        config.add_rule("/api", Algorithm::FixedWindow, MatchKind::Prefix, 0);
        assert_eq!(config.resolve("/unknown/path"), Algorithm::None);
        assert_eq!(config.resolve_detailed("/unknown/path"), Resolution::Default(Algorithm::None));

        config.set_default_algorithm(Algorithm::TokenBucket);
        assert_eq!(config.resolve("/unknown/path"), Algorithm::TokenBucket);
    }

    #[test]
    fn test_remove_rules() {
        let mut config = empty();
        config.add_rule("/api", Algorithm::FixedWindow, MatchKind::Prefix, 0);
        config.add_rule("/api", Algorithm::TokenBucket, MatchKind::Exact, 3);
        config.add_rule("/other", Algorithm::TokenBucket, MatchKind::Prefix, 0);

        assert_eq!(config.remove_rules("/api"), 2);
        assert_eq!(config.remove_rules("/api"), 0);
        assert_eq!(config.resolve("/api"), Algorithm::None);
        assert_eq!(config.rules().len(), 1);
    }

    #[test]
    fn test_parse_routing_config() {
        let yaml = r#"
default_algorithm: token_bucket
exempt_prefixes:
  - /health
rules:
  - path: /api
    algorithm: token_bucket
    priority: 1
  - path: /api/users
    match: exact
    algorithm: fixed_window
    priority: 5
  - path: /static
    algorithm: none
"#;
        let routing = RoutingConfig::from_yaml(yaml).unwrap();
        assert_eq!(routing.rules.len(), 3);
        assert_eq!(routing.rules[0].match_kind, MatchKind::Prefix);
        assert_eq!(routing.rules[2].priority, 0);

        let config = RouteConfiguration::from_routing(&routing);
        assert_eq!(config.resolve("/api/users"), Algorithm::FixedWindow);
        assert_eq!(config.resolve("/api/posts"), Algorithm::TokenBucket);
        assert_eq!(config.resolve("/static/app.js"), Algorithm::None);
        assert_eq!(config.resolve("/health/live"), Algorithm::None);
        assert_eq!(config.resolve("/docs"), Algorithm::TokenBucket);
    }

    #[test]
    fn test_parse_empty_routing_config_uses_defaults() {
        let routing = RoutingConfig::from_yaml("{}").unwrap();
        assert_eq!(routing, RoutingConfig::default());
    }

    #[test]
    fn test_parse_rejects_unknown_algorithm() {
        let yaml = r#"
rules:
  - path: /api
    algorithm: sliding_window
"#;
        let err = RoutingConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, TollgateError::Config(_)));
    }
}
