//! Error types for Hostgate.

use thiserror::Error;

use crate::ratelimit::StoreError;

/// Main error type for Hostgate operations.
///
/// Evaluation errors are denials: a caller receiving `RateLimited`,
/// `BackendDown` or `InvalidState` must not send the request.
#[derive(Error, Debug)]
pub enum HostgateError {
    /// The destination's rule has no quota left in the current window
    #[error("rate limited: {destination}")]
    RateLimited { destination: String },

    /// The shared counter cache is unreachable, erroring or too slow
    #[error("rate limiting is down: {0}")]
    BackendDown(#[from] StoreError),

    /// The shared counter holds something that is not an integer
    #[error("invalid internal data in rate limiting: counter {key} holds {value:?}")]
    InvalidState { key: String, value: String },

    /// The destination could not be parsed as an absolute URL with a host
    #[error("malformed destination {destination:?}: {reason}")]
    MalformedDestination { destination: String, reason: String },

    /// A rate limit rule was rejected at registration time
    #[error("invalid rate limit: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// The configuration file could not be loaded
    #[error("configuration error: {0}")]
    Settings(String),
}

impl HostgateError {
    /// Whether this error means the request must not be sent.
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            HostgateError::RateLimited { .. }
                | HostgateError::BackendDown(_)
                | HostgateError::InvalidState { .. }
                | HostgateError::MalformedDestination { .. }
        )
    }
}

/// Reasons a rule is rejected by [`crate::ratelimit::RuleRegistry::add_rule`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("host pattern should not be empty")]
    InvalidHostPattern,

    #[error("invalid window {spec:?}: {reason}")]
    InvalidWindowSpec { spec: String, reason: String },

    #[error("limit should be greater than zero")]
    InvalidLimit,
}

/// Result type alias for Hostgate operations.
pub type Result<T> = std::result::Result<T, HostgateError>;
