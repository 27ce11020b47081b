//! Configuration management for Hostgate.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::admission::{AdmissionController, DEFAULT_CALL_TIMEOUT};
use crate::error::{HostgateError, Result};
use crate::ratelimit::{CounterBackend, RedisCounterStore, RuleRegistry, StoreError};

/// Prefix for environment overrides, e.g. `HOSTGATE__CACHE__URL`.
const ENV_PREFIX: &str = "HOSTGATE";

/// Main configuration for Hostgate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostgateConfig {
    /// Shared counter cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Rate limit rules, in match order
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

/// Shared counter cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Redis URL. Without one, every request is admitted.
    #[serde(default)]
    pub url: Option<String>,

    /// Deadline for the store calls of one evaluation
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout: default_timeout(),
        }
    }
}

fn default_timeout() -> Duration {
    DEFAULT_CALL_TIMEOUT
}

/// One rate limit rule as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Substring matched against destination hosts
    pub host: String,
    /// Window size, e.g. `1s` or `1h`
    pub window: String,
    /// Requests admitted per window
    pub limit: u64,
}

impl HostgateConfig {
    /// Load configuration from a YAML file, applying `HOSTGATE__*` overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        config::Config::builder()
            .add_source(File::new(&path.to_string_lossy(), FileFormat::Yaml))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| HostgateError::Settings(e.to_string()))
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| HostgateError::Settings(format!("Failed to parse configuration: {}", e)))
    }

    /// Register every configured rule, in file order.
    pub fn build_registry(&self) -> Result<RuleRegistry> {
        let mut registry = RuleRegistry::new();
        for rule in &self.rules {
            registry.add_rule(&rule.host, &rule.window, rule.limit)?;
        }
        Ok(registry)
    }

    /// Build a controller, connecting to Redis when a URL is configured.
    pub async fn into_controller(self) -> Result<AdmissionController> {
        let registry = self.build_registry()?;
        let backend = match &self.cache.url {
            Some(url) => {
                let store = RedisCounterStore::connect(url)
                    .await
                    .map_err(StoreError::from)?;
                info!("Connected to counter store");
                CounterBackend::Shared(Arc::new(store))
            }
            None => CounterBackend::Unconfigured,
        };

        Ok(AdmissionController::new(registry, backend).with_call_timeout(self.cache.timeout))
    }
}
