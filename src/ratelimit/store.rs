//! Counter store trait for abstracting the shared cache.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Failure talking to a counter store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Redis transport or command error
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The call did not complete before its deadline
    #[error("counter store call timed out after {0:?}")]
    Timeout(Duration),

    /// The store refused or could not serve the call
    #[error("counter store unavailable: {0}")]
    Unavailable(String),

    /// INCR was issued against a key whose value is not an integer
    #[error("value at {key} is not an integer")]
    NotAnInteger { key: String },
}

/// The capability set consumed from the shared cache.
///
/// Implementations must make `incr` a single atomic read-modify-write that is
/// linearizable across every process sharing the store. Callers impose their
/// own deadlines, so implementations do not need internal timeouts.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Read the raw value at `key`. `None` when the key is absent.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Atomically add one to the integer at `key` (absent counts as 0) and
    /// return the new value.
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    /// Set the time-to-live of `key`. Returns `false` if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;
}
