//! Service configuration.
//!
//! Sources, later ones overriding earlier ones:
//!
//! 1. `/etc/replay-engine/service.yaml`
//! 2. `./config/service.yaml`
//! 3. an explicit file (`--config` / `REPLAY_CONFIG_FILE`)
//! 4. environment variables prefixed `REPLAY__`, e.g.
//!    `REPLAY__REPLAY__PAGE_SIZE=500` sets `replay.page_size`
//!
//! Every field has a default, so an unconfigured environment yields a
//! working in-memory service.

use crate::ServiceError;
use replay_core::ReplayConfig;
use replay_transport::{ConfigurationError, ConsumerConfig, QueueName};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Batch sizes, page size and topics
    pub replay: ReplayConfig,

    /// Work queue polling
    pub consumer: ConsumerConfig,

    /// Name of the work queue subscribed to the work topic
    pub queue_name: String,

    /// Progress store backend
    pub storage: StorageConfig,

    /// JSON record catalog served as the record source; empty when unset
    pub catalog_path: Option<PathBuf>,

    pub logging: LoggingConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            replay: ReplayConfig::default(),
            consumer: ConsumerConfig::default(),
            queue_name: "replay-work-queue".to_string(),
            storage: StorageConfig::default(),
            catalog_path: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.replay.validate()?;
        self.consumer.validate()?;
        self.storage.validate()?;
        self.queue_name()?;
        Ok(())
    }

    pub fn queue_name(&self) -> Result<QueueName, ConfigurationError> {
        QueueName::new(&self.queue_name).map_err(|e| ConfigurationError::Invalid {
            message: format!("queue_name: {}", e),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Memory,
    Filesystem,
}

/// Progress store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    /// Base directory; required for the filesystem backend
    pub path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: None,
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.backend == StorageBackend::Filesystem && self.path.is_none() {
            return Err(ConfigurationError::Missing {
                key: "storage.path".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Text,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,

    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Load and validate configuration from the standard sources
pub fn load_config(explicit_path: Option<&Path>) -> Result<ServiceConfig, ServiceError> {
    let mut builder = config::Config::builder()
        .add_source(
            config::File::with_name("/etc/replay-engine/service")
                .required(false)
                .format(config::FileFormat::Yaml),
        )
        .add_source(
            config::File::with_name("config/service")
                .required(false)
                .format(config::FileFormat::Yaml),
        );

    if let Some(path) = explicit_path {
        info!(path = %path.display(), "Loading configuration from explicit path");
        builder = builder.add_source(
            config::File::from(path)
                .required(true)
                .format(config::FileFormat::Yaml),
        );
    }

    let service_config: ServiceConfig = builder
        .add_source(config::Environment::with_prefix("REPLAY").separator("__"))
        .build()?
        .try_deserialize()?;

    service_config.validate()?;
    Ok(service_config)
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
