//! Ordered rule registry.
//!
//! Rules are appended while the registry is being built and never removed or
//! reordered. Once handed to an [`crate::AdmissionController`] the registry is
//! shared read-only, so lookups need no locking.

use std::time::Duration;

use tracing::{debug, info};

use super::rule::Rule;
use crate::error::{ConfigError, Result};

/// Ordered collection of rules where the first match wins.
#[derive(Debug, Clone, Default)]
pub struct RuleRegistry {
    rules: Vec<Rule>,
}

impl RuleRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and append a rule.
    ///
    /// `window` is a human readable duration such as `1s`, `5m` or `1h`.
    pub fn add_rule(&mut self, host_pattern: &str, window: &str, limit: u64) -> Result<()> {
        if host_pattern.is_empty() {
            return Err(ConfigError::InvalidHostPattern.into());
        }
        let window_duration = parse_window(window)?;
        let rule = Rule::new(host_pattern, window_duration, limit)?;

        info!(
            host = %host_pattern,
            window = %window,
            limit = limit,
            "Added rate limit"
        );
        self.rules.push(rule);
        Ok(())
    }

    /// Find the first rule governing `destination`.
    ///
    /// A destination that cannot be parsed fails the lookup instead of being
    /// skipped. `None` means the destination is not rate limited.
    pub fn resolve(&self, destination: &str) -> Result<Option<&Rule>> {
        for rule in &self.rules {
            if rule.matches(destination)? {
                return Ok(Some(rule));
            }
        }

        debug!(destination = %destination, "No rate limit for destination");
        Ok(None)
    }

    /// Registered rules in match order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn parse_window(spec: &str) -> std::result::Result<Duration, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidWindowSpec {
        spec: spec.to_string(),
        reason,
    };

    if spec.trim().is_empty() {
        return Err(invalid("window should not be empty".to_string()));
    }
    humantime::parse_duration(spec.trim()).map_err(|e| invalid(e.to_string()))
}
