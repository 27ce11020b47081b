//! In-process counter store.
//!
//! Follows Redis semantics for the three commands the coordinator issues:
//! GET returns the raw string, INCR creates missing keys at 0 and rejects
//! non-integer values, EXPIRE only applies to existing keys. Expiry uses
//! `tokio::time::Instant`, so paused-time tests can step over TTLs.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use tokio::time::Instant;

use super::store::{CounterStore, StoreError};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Counter store held in this process's memory.
///
/// Suitable when all callers share one process. Cross-process coordination
/// needs [`super::RedisCounterStore`].
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    entries: DashMap<String, Entry>,
}

impl MemoryCounterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the raw value at `key`, clearing any TTL.
    pub fn raw_set(&self, key: &str, value: impl Into<String>) {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.into(),
                expires_at: None,
            },
        );
    }

    /// Whether `key` exists and has not expired.
    pub fn contains(&self, key: &str) -> bool {
        self.live(key).is_some()
    }

    /// Remaining time-to-live of `key`, if it exists and has one.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let entry = self.live(key)?;
        entry
            .expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.sweep(Instant::now());
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry.
    fn sweep(&self, now: Instant) {
        self.entries.retain(|_, entry| !entry.is_expired(now));
    }

    fn live(&self, key: &str) -> Option<Entry> {
        let now = Instant::now();
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        self.entries.get(key).map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.live(key).map(|entry| entry.value))
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let now = Instant::now();
        // Must run before `entry` takes the shard lock
        if !self.entries.contains_key(key) {
            self.sweep(now);
        }
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.is_expired(now) {
                    *entry = Entry {
                        value: "1".to_string(),
                        expires_at: None,
                    };
                    return Ok(1);
                }
                let next = entry
                    .value
                    .parse::<i64>()
                    .ok()
                    .and_then(|current| current.checked_add(1))
                    .ok_or_else(|| StoreError::NotAnInteger {
                        key: key.to_string(),
                    })?;
                entry.value = next.to_string();
                Ok(next)
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry {
                    value: "1".to_string(),
                    expires_at: None,
                });
                Ok(1)
            }
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
