//! Concurrency-safe holder of the live route configuration.
//!
//! Readers take a cheap [`Arc`] snapshot and resolve against it without
//! holding any lock. Writers copy the current configuration, apply their
//! change to the copy and publish it with a single pointer swap, so a reader
//! sees either the whole update or none of it.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

use super::algorithm::{Algorithm, MatchKind};
use super::rules::RouteConfiguration;
use crate::error::Result;

/// Priority given to rules registered through the admin surface.
pub const ADMIN_RULE_PRIORITY: i32 = 0;

/// The live route configuration.
#[derive(Debug)]
pub struct ConfigStore {
    current: RwLock<Arc<RouteConfiguration>>,
}

impl ConfigStore {
    /// Create a store publishing `config`.
    pub fn new(config: RouteConfiguration) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
        }
    }

    /// The configuration as of now. Later updates do not affect it.
    pub fn snapshot(&self) -> Arc<RouteConfiguration> {
        Arc::clone(&self.current.read())
    }

    /// Apply `f` to a copy of the configuration and publish the result.
    ///
    /// Writers are serialized; readers keep using the previous snapshot until
    /// the swap.
    pub fn update<T>(&self, f: impl FnOnce(&mut RouteConfiguration) -> T) -> T {
        let mut current = self.current.write();
        let mut next = RouteConfiguration::clone(&current);
        let out = f(&mut next);
        *current = Arc::new(next);
        out
    }

    /// Replace the whole configuration, e.g. after a reload.
    pub fn replace(&self, config: RouteConfiguration) {
        info!(
            rules = config.rules().len(),
            default_algorithm = %config.default_algorithm(),
            "Replacing route configuration"
        );
        *self.current.write() = Arc::new(config);
    }

    /// Register a rule for one path.
    pub fn set_rule_for_path(
        &self,
        path: &str,
        algorithm: Algorithm,
        match_kind: MatchKind,
        priority: i32,
    ) {
        self.update(|config| config.add_rule(path, algorithm, match_kind, priority));
        info!(
            path = %path,
            algorithm = %algorithm,
            match_kind = ?match_kind,
            priority = priority,
            "Route rule set"
        );
    }

    /// Register the same rule for several paths in one atomic update.
    pub fn set_rules_for_paths<S: AsRef<str>>(
        &self,
        paths: &[S],
        algorithm: Algorithm,
        match_kind: MatchKind,
        priority: i32,
    ) {
        self.update(|config| {
            for path in paths {
                config.add_rule(path.as_ref(), algorithm, match_kind, priority);
            }
        });
        info!(
            paths = paths.len(),
            algorithm = %algorithm,
            match_kind = ?match_kind,
            priority = priority,
            "Route rules set"
        );
    }

    /// Exempt every path starting with `prefix` from rate limiting.
    pub fn exempt_path(&self, prefix: &str) {
        let added = self.update(|config| config.exempt(prefix));
        if added {
            info!(prefix = %prefix, "Path exempted from rate limiting");
        }
    }

    /// Lift an exemption. Returns whether it existed.
    pub fn remove_exemption(&self, prefix: &str) -> bool {
        let removed = self.update(|config| config.remove_exemption(prefix));
        if removed {
            info!(prefix = %prefix, "Path exemption removed");
        }
        removed
    }

    /// Remove every rule for `path`. Returns how many were removed.
    pub fn remove_rule(&self, path: &str) -> usize {
        let removed = self.update(|config| config.remove_rules(path));
        info!(path = %path, removed = removed, "Route rules removed");
        removed
    }

    /// Change the algorithm applied when no rule matches.
    pub fn set_default_algorithm(&self, algorithm: Algorithm) {
        self.update(|config| config.set_default_algorithm(algorithm));
        info!(algorithm = %algorithm, "Default algorithm set");
    }

    /// Admin surface: limit `path` (as a prefix) with the named limit type.
    ///
    /// An unknown limit type is rejected and nothing changes.
    pub fn set_limit_for_path(&self, path: &str, limit_type: &str) -> Result<()> {
        let algorithm: Algorithm = limit_type.parse()?;
        self.set_rule_for_path(path, algorithm, MatchKind::Prefix, ADMIN_RULE_PRIORITY);
        Ok(())
    }

    /// Admin surface: limit several paths with the named limit type at once.
    pub fn set_limit_for_paths<S: AsRef<str>>(&self, paths: &[S], limit_type: &str) -> Result<()> {
        let algorithm: Algorithm = limit_type.parse()?;
        self.set_rules_for_paths(paths, algorithm, MatchKind::Prefix, ADMIN_RULE_PRIORITY);
        Ok(())
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(RouteConfiguration::default())
    }
}
