//! Hostgate - Outbound Request Admission Control
//!
//! This crate decides whether an outbound HTTP request may be sent to its
//! destination host right now. Hosts are governed by fixed-window rate limit
//! rules whose counters live in a shared cache (Redis), so every process
//! talking to the same cache enforces the same limits.

pub mod admission;
pub mod config;
pub mod error;
pub mod ratelimit;

pub use admission::AdmissionController;
pub use error::{ConfigError, HostgateError, Result};
