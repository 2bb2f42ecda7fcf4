//! # Replay Service
//!
//! Process-level wiring of the replay engine:
//!
//! - [`config`] - layered service configuration
//! - [`app`] - construction of backends, dispatcher, worker and consumer
//! - [`cli`] - command-line surface
//!
//! The binary in `main.rs` only parses arguments, initializes logging and
//! maps failures to exit codes.

use replay_core::{ProgressStoreError, RecordSourceError, ReplayError};
use replay_transport::{ConfigurationError, TransportError};
use thiserror::Error;

pub mod app;
pub mod cli;
pub mod config;

pub use app::ReplayApp;
pub use cli::{Cli, Commands};
pub use config::{LogFormat, LoggingConfig, ServiceConfig, StorageBackend, StorageConfig};

/// Service-level failures
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Failed to load configuration: {0}")]
    ConfigSource(#[from] ::config::ConfigError),

    #[error("Replay failed: {0}")]
    Replay(#[from] ReplayError),

    #[error("Progress storage error: {0}")]
    Storage(#[from] ProgressStoreError),

    #[error("Record catalog error: {0}")]
    Catalog(#[from] RecordSourceError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ServiceError {
    /// Process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) | Self::ConfigSource(_) => 3,
            Self::Replay(e) if e.is_client_error() => 4,
            Self::Storage(_) | Self::Io { .. } => 5,
            _ => 1,
        }
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
