//! Admission control for outbound requests.
//!
//! The request-issuing layer asks [`AdmissionController::admit`] right before
//! sending each request. Destinations without a governing rule are always
//! admitted; governed ones are counted in the shared store.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::error::{HostgateError, Result};
use crate::ratelimit::{Clock, Coordinator, CounterBackend, CounterStore, RuleRegistry};

/// Default deadline for each evaluation's store calls.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(1);

/// Entry point deciding whether a destination may be contacted now.
///
/// The rule registry is frozen when the controller is built, so a controller
/// can be cloned and shared across tasks without locking.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    registry: Arc<RuleRegistry>,
    coordinator: Coordinator,
    call_timeout: Duration,
}

impl AdmissionController {
    /// Create a controller from a fully built registry.
    pub fn new(registry: RuleRegistry, backend: CounterBackend) -> Self {
        Self {
            registry: Arc::new(registry),
            coordinator: Coordinator::new(backend),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Attach a counter store, replacing any previous one.
    pub fn with_store(mut self, store: Arc<dyn CounterStore>) -> Self {
        let clock = self.coordinator.clock().clone();
        self.coordinator = Coordinator::with_clock(CounterBackend::Shared(store), clock);
        self
    }

    /// Use a custom clock for window alignment.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        let backend = self.coordinator.backend().clone();
        self.coordinator = Coordinator::with_clock(backend, clock);
        self
    }

    /// Set the deadline applied by [`Self::is_limited`] and [`Self::admit`].
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Whether `destination` is currently rate limited.
    pub async fn is_limited(&self, destination: &str) -> Result<bool> {
        self.is_limited_before(destination, Instant::now() + self.call_timeout)
            .await
    }

    /// Like [`Self::is_limited`], but bounded by the caller's own deadline.
    ///
    /// Dropping the returned future cancels any in-flight store call, so a
    /// caller abandoning its request abandons the check with it.
    pub async fn is_limited_before(&self, destination: &str, deadline: Instant) -> Result<bool> {
        match self.registry.resolve(destination)? {
            Some(rule) => self.coordinator.evaluate(rule, deadline).await,
            None => Ok(false),
        }
    }

    /// Guard for the request-issuing layer.
    ///
    /// `Ok(())` means send. A limited destination yields
    /// [`HostgateError::RateLimited`]; store and parsing errors come back
    /// unchanged and must abort the request as well.
    pub async fn admit(&self, destination: &str) -> Result<()> {
        if self.is_limited(destination).await? {
            debug!(destination = %destination, "Request rejected by rate limit");
            return Err(HostgateError::RateLimited {
                destination: destination.to_string(),
            });
        }
        Ok(())
    }
}
