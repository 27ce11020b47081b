//! Rate limit rules and shared counter coordination.

mod clock;
mod coordinator;
mod memory;
mod redis_store;
mod registry;
mod rule;
mod store;

pub use clock::{Clock, SystemClock};
#[cfg(any(test, feature = "test-helpers"))]
pub use clock::ManualClock;
pub use coordinator::{Coordinator, CounterBackend};
pub use memory::MemoryCounterStore;
pub use redis_store::RedisCounterStore;
pub use registry::RuleRegistry;
pub use rule::Rule;
pub use store::{CounterStore, StoreError};
