//! Configuration management for Gatekeep.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::{GatekeepError, Result};
use crate::ratelimit::key::DEFAULT_NAMESPACE;
use crate::ratelimit::{ConfigRegistry, RateLimitEngine};
use crate::store::{AttemptStore, FileStore};

/// Environment variable prefix, e.g. `GATEKEEP__STORAGE__PATH`.
pub const ENV_PREFIX: &str = "GATEKEEP";

/// Main configuration for Gatekeep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatekeepConfig {
    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Policy configuration
    #[serde(default)]
    pub policies: PoliciesConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where and how attempt records are persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path of the JSON state file
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,

    /// Key namespace for attempt records
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Expire records untouched for this long; unset keeps them forever
    #[serde(default)]
    pub record_ttl_secs: Option<u64>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            namespace: default_namespace(),
            record_ttl_secs: None,
        }
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("gatekeep-state.json")
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

/// Policy configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoliciesConfig {
    /// Path to a YAML file of per-endpoint policy overrides
    #[serde(default)]
    pub overrides_path: Option<PathBuf>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl GatekeepConfig {
    /// Load configuration from an optional YAML file, overlaid with
    /// `GATEKEEP__*` environment variables.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::new(path, config::FileFormat::Yaml));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| GatekeepError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| GatekeepError::Config(e.to_string()))
    }

    /// Load configuration from a YAML file only.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&contents).map_err(|e| GatekeepError::Config(e.to_string()))
    }

    /// Build the policy registry, applying overrides if configured.
    pub fn registry(&self) -> Result<ConfigRegistry> {
        match &self.policies.overrides_path {
            Some(path) => ConfigRegistry::from_file(path),
            None => Ok(ConfigRegistry::new()),
        }
    }

    /// Build an engine over the configured file store.
    pub fn engine(&self) -> Result<RateLimitEngine> {
        let kv = Arc::new(FileStore::open(&self.storage.path)?);
        let store = AttemptStore::new(kv)
            .with_namespace(self.storage.namespace.clone())
            .with_ttl(self.storage.record_ttl_secs.map(Duration::from_secs));

        info!(
            path = %self.storage.path.display(),
            namespace = %self.storage.namespace,
            "Rate limit engine initialized"
        );

        Ok(RateLimitEngine::new(store).with_registry(self.registry()?))
    }
}
