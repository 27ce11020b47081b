//! Wall clock used to align counter windows.
//!
//! Windows are aligned to the Unix epoch so every process sharing a counter
//! store derives the same bucket key for the same instant. That needs wall
//! time rather than a monotonic `Instant`.

use chrono::{DateTime, Utc};

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// System clock backed by `Utc::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(any(test, feature = "test-helpers"))]
pub use manual::ManualClock;

#[cfg(any(test, feature = "test-helpers"))]
mod manual {
    use super::Clock;
    use chrono::{DateTime, TimeZone, Utc};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    /// Clock that only moves when told to.
    ///
    /// Clones share the same time, so advancing one clone advances all of them.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        current: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock frozen at `start`.
        pub fn new(start: DateTime<Utc>) -> Self {
            Self {
                current: Arc::new(Mutex::new(start)),
            }
        }

        /// Create a clock frozen at a whole number of seconds since the epoch.
        pub fn at_unix(secs: i64) -> Self {
            let start = Utc
                .timestamp_opt(secs, 0)
                .single()
                .unwrap_or(DateTime::<Utc>::default());
            Self::new(start)
        }

        /// Move the clock forward.
        pub fn advance(&self, by: Duration) {
            let mut current = self.current.lock();
            *current += chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
        }

        /// Jump to a specific time.
        pub fn set(&self, to: DateTime<Utc>) {
            *self.current.lock() = to;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.current.lock()
        }
    }
}
