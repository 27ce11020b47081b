//! Host rate limit rules.
//!
//! A rule is a host pattern, a fixed window and the number of requests
//! admitted per window. Windows are aligned to the Unix epoch, so every
//! process derives the same bucket key for the same second.

use std::time::Duration;

use chrono::{DateTime, Utc};
use http::Uri;
use url::Url;

use crate::error::{ConfigError, HostgateError, Result};

/// Namespace tag at the front of every counter key.
const KEY_NAMESPACE: &str = "rate";
/// Separator between the parts of a counter key.
const KEY_SEPARATOR: &str = ".";
/// Counters live for this many windows after their last admitted request.
const EXPIRY_WINDOWS: u32 = 4;

/// An immutable admission policy for every host containing `host_pattern`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    host_pattern: String,
    window: Duration,
    limit: u64,
}

impl Rule {
    /// Create a rule, rejecting an empty pattern, a zero limit, or a window
    /// that is not a positive whole number of seconds.
    ///
    /// The window is also bounded so that its counter expiry still fits in
    /// the signed seconds Redis and chrono work with.
    pub fn new(host_pattern: impl Into<String>, window: Duration, limit: u64) -> Result<Self> {
        let host_pattern = host_pattern.into();
        if host_pattern.is_empty() {
            return Err(ConfigError::InvalidHostPattern.into());
        }
        if window.is_zero() || window.subsec_nanos() != 0 {
            return Err(ConfigError::InvalidWindowSpec {
                spec: humantime::format_duration(window).to_string(),
                reason: "window must be a positive whole number of seconds".to_string(),
            }
            .into());
        }
        let expiry = window
            .checked_mul(EXPIRY_WINDOWS)
            .filter(|expiry| i64::try_from(expiry.as_secs()).is_ok());
        if expiry.is_none() {
            return Err(ConfigError::InvalidWindowSpec {
                spec: humantime::format_duration(window).to_string(),
                reason: "window is too large".to_string(),
            }
            .into());
        }
        if limit == 0 {
            return Err(ConfigError::InvalidLimit.into());
        }

        Ok(Self {
            host_pattern,
            window,
            limit,
        })
    }

    /// The substring matched against destination hosts.
    pub fn host_pattern(&self) -> &str {
        &self.host_pattern
    }

    /// The fixed window size.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Requests admitted per window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// How long a counter is kept after it was last refreshed.
    pub fn expiry(&self) -> Duration {
        self.window * EXPIRY_WINDOWS
    }

    /// Whether the destination's host contains this rule's pattern.
    ///
    /// The host is taken as written, case included, together with any
    /// explicit port (`host:port`), so a pattern can single out one port.
    /// Matching is plain case-sensitive substring containment:
    /// `nseindia.com` also governs `www1.nseindia.com`.
    pub fn matches(&self, destination: &str) -> Result<bool> {
        let host = destination_host(destination)?;
        Ok(host.contains(&self.host_pattern))
    }

    /// Floor `now` to the start of its window, in seconds since the epoch.
    pub fn window_start(&self, now: DateTime<Utc>) -> i64 {
        let secs = now.timestamp();
        let window = self.window.as_secs() as i64;
        secs - secs.rem_euclid(window)
    }

    /// Counter key for the window containing `now`.
    pub fn bucket_key_at(&self, now: DateTime<Utc>) -> String {
        format!(
            "{KEY_NAMESPACE}{KEY_SEPARATOR}{}{KEY_SEPARATOR}{}",
            self.host_pattern,
            self.window_start(now)
        )
    }

    /// Counter key for the current window.
    pub fn bucket_key(&self) -> String {
        self.bucket_key_at(Utc::now())
    }
}

/// Extract `host[:port]` from an absolute URL.
///
/// `Url` validates the destination but normalizes the host (lowercase,
/// default port dropped), so the host is read back from `http::Uri`, which
/// keeps the authority as written. Destinations `http::Uri` refuses fall back
/// to the normalized host.
fn destination_host(destination: &str) -> Result<String> {
    let malformed = |reason: String| HostgateError::MalformedDestination {
        destination: destination.to_string(),
        reason,
    };

    let url = Url::parse(destination).map_err(|e| malformed(e.to_string()))?;
    let normalized = url
        .host_str()
        .ok_or_else(|| malformed("destination has no host".to_string()))?;

    if let Ok(uri) = destination.trim().parse::<Uri>() {
        if let Some(host) = uri.host() {
            return Ok(match uri.port() {
                Some(port) => format!("{host}:{}", port.as_str()),
                None => host.to_string(),
            });
        }
    }

    Ok(match url.port() {
        Some(port) => format!("{normalized}:{port}"),
        None => normalized.to_string(),
    })
}
