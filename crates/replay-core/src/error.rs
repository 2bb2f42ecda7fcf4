//! Error types for replay orchestration.

use crate::ValidationError;
use replay_transport::{SerializationError, TransportError};
use thiserror::Error;

/// Errors surfaced by the coordinator, dispatcher and status queries
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("Invalid replay request: {message}")]
    InvalidRequest { message: String },

    #[error("Unsupported replay operation: '{operation}'")]
    InvalidOperation { operation: String },

    #[error("The requested kind does not exist: {}", kinds.join(", "))]
    KindNotFound { kinds: Vec<String> },

    #[error("Replay not found: {replay_id}")]
    ReplayNotFound { replay_id: String },

    #[error("Failed to write initial progress for: {}", keys.join(", "))]
    InitialProgressWriteFailed { keys: Vec<String> },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Progress store error: {0}")]
    Storage(#[from] ProgressStoreError),

    #[error("Record source error: {0}")]
    RecordSource(#[from] RecordSourceError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ReplayError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::InvalidRequest { .. } => false,
            Self::InvalidOperation { .. } => false,
            Self::KindNotFound { .. } => false,
            Self::ReplayNotFound { .. } => false,
            Self::InitialProgressWriteFailed { .. } => true,
            Self::Validation(_) => false,
            Self::Storage(e) => e.is_transient(),
            Self::RecordSource(e) => e.is_transient(),
            Self::Transport(e) => e.is_transient(),
            Self::Internal { .. } => true,
        }
    }

    /// Whether the error stems from the caller's input rather than the system
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest { .. }
                | Self::InvalidOperation { .. }
                | Self::KindNotFound { .. }
                | Self::ReplayNotFound { .. }
                | Self::Validation(_)
        )
    }
}

impl From<SerializationError> for ReplayError {
    fn from(e: SerializationError) -> Self {
        Self::Transport(TransportError::Serialization(e))
    }
}

/// Errors from a progress store backend
#[derive(Debug, Error)]
pub enum ProgressStoreError {
    #[error("Progress backend unavailable: {message}")]
    Unavailable { message: String },

    #[error("Progress record could not be encoded or decoded: {message}")]
    Serialization { message: String },

    #[error("Progress storage I/O failed: {message}")]
    Io { message: String },

    #[error("Batch of {size} exceeds backend limit of {max_size}")]
    BatchTooLarge { size: usize, max_size: usize },
}

impl ProgressStoreError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable { .. } => true,
            Self::Io { .. } => true,
            Self::Serialization { .. } => false,
            Self::BatchTooLarge { .. } => false,
        }
    }
}

impl From<serde_json::Error> for ProgressStoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization {
            message: e.to_string(),
        }
    }
}

impl From<std::io::Error> for ProgressStoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io {
            message: e.to_string(),
        }
    }
}

/// Errors from the record discovery and metadata collaborators
#[derive(Debug, Clone, Error)]
pub enum RecordSourceError {
    #[error("Record source unavailable: {message}")]
    Unavailable { message: String },

    #[error("Invalid pagination cursor: '{cursor}'")]
    InvalidCursor { cursor: String },

    #[error("Record source failed: {message}")]
    Internal { message: String },
}

impl RecordSourceError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable { .. } => true,
            Self::InvalidCursor { .. } => false,
            Self::Internal { .. } => false,
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
