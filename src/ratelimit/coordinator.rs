//! Shared counter coordination.
//!
//! Decides admission for one rule by reading, incrementing and expiring a
//! per-window counter in a [`CounterStore`]. The store's atomic increment is
//! the only serialization point between callers; nothing is locked or cached
//! in this process.
//!
//! Racing callers can push the counter past the limit: each one that read a
//! count at or below the limit still increments, and whoever lands above the
//! limit is denied without rolling its increment back.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, trace, warn};

use super::clock::{Clock, SystemClock};
use super::rule::Rule;
use super::store::{CounterStore, StoreError};
use crate::error::{HostgateError, Result};

/// Whether a shared counter store has been wired in.
#[derive(Clone, Default)]
pub enum CounterBackend {
    /// No store: every evaluation is admitted.
    #[default]
    Unconfigured,
    /// Counters live in this store.
    Shared(Arc<dyn CounterStore>),
}

impl CounterBackend {
    pub fn shared(store: impl CounterStore + 'static) -> Self {
        CounterBackend::Shared(Arc::new(store))
    }

    pub fn is_configured(&self) -> bool {
        matches!(self, CounterBackend::Shared(_))
    }
}

impl std::fmt::Debug for CounterBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CounterBackend::Unconfigured => f.write_str("Unconfigured"),
            CounterBackend::Shared(_) => f.write_str("Shared(..)"),
        }
    }
}

/// Runs the check, increment and expire protocol against a counter backend.
#[derive(Clone)]
pub struct Coordinator {
    backend: CounterBackend,
    clock: Arc<dyn Clock>,
}

impl Coordinator {
    /// Create a coordinator using the system clock.
    pub fn new(backend: CounterBackend) -> Self {
        Self::with_clock(backend, Arc::new(SystemClock::new()))
    }

    /// Create a coordinator with a custom clock for window alignment.
    pub fn with_clock(backend: CounterBackend, clock: Arc<dyn Clock>) -> Self {
        Self { backend, clock }
    }

    pub fn backend(&self) -> &CounterBackend {
        &self.backend
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Decide whether a request governed by `rule` is over its limit.
    ///
    /// Returns `Ok(true)` when limited and `Ok(false)` when admitted. Errors
    /// are denials too: `BackendDown` when the store fails or `deadline`
    /// passes, `InvalidState` when the counter is not an integer. Without a
    /// configured store the request is admitted.
    pub async fn evaluate(&self, rule: &Rule, deadline: Instant) -> Result<bool> {
        let store = match &self.backend {
            CounterBackend::Shared(store) => store,
            CounterBackend::Unconfigured => {
                warn!(
                    host = %rule.host_pattern(),
                    "Counter store is not configured, admitting request without rate limiting"
                );
                return Ok(false);
            }
        };

        let key = rule.bucket_key_at(self.clock.now());
        let budget = deadline.saturating_duration_since(Instant::now());
        let limit = rule.limit();

        let raw = bounded(deadline, budget, "get", &key, store.get(&key)).await?;
        let current = match raw.as_deref() {
            None | Some("") => 0,
            Some(value) => value.parse::<i64>().map_err(|e| {
                error!(key = %key, value = %value, error = %e, "Counter holds a non-integer value");
                HostgateError::InvalidState {
                    key: key.clone(),
                    value: value.to_string(),
                }
            })?,
        };

        trace!(key = %key, count = current, limit = limit, "Read counter");

        if exceeds(current, limit) {
            debug!(key = %key, count = current, limit = limit, "Rate limit exceeded");
            return Ok(true);
        }

        let count = bounded(deadline, budget, "incr", &key, store.incr(&key)).await?;
        trace!(key = %key, count = count, limit = limit, "Incremented counter");

        if exceeds(count, limit) {
            debug!(key = %key, count = count, limit = limit, "Rate limit exceeded");
            return Ok(true);
        }

        let applied = bounded(
            deadline,
            budget,
            "expire",
            &key,
            store.expire(&key, rule.expiry()),
        )
        .await?;
        if !applied {
            trace!(key = %key, "Counter vanished before its expiry could be set");
        }

        Ok(false)
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}

fn exceeds(count: i64, limit: u64) -> bool {
    u64::try_from(count).is_ok_and(|count| count > limit)
}

/// Run one store call under the evaluation deadline, mapping failures to
/// `BackendDown`.
async fn bounded<T, F>(
    deadline: Instant,
    budget: Duration,
    step: &'static str,
    key: &str,
    call: F,
) -> Result<T>
where
    F: Future<Output = std::result::Result<T, StoreError>>,
{
    let outcome = match timeout_at(deadline, call).await {
        Ok(outcome) => outcome,
        Err(_) => Err(StoreError::Timeout(budget)),
    };

    outcome.map_err(|e| {
        error!(step = step, key = %key, error = %e, "Counter store call failed");
        HostgateError::BackendDown(e)
    })
}
