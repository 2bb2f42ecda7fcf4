//! # Replay Core
//!
//! Orchestration engine for replaying (or reindexing) every record of one or
//! more record kinds. Each record is re-announced as a change event so that
//! downstream consumers can rebuild their view.
//!
//! ## Architecture
//!
//! - [`coordinator::ReplayCoordinator`] validates a request, writes the
//!   initial progress rows and acknowledges immediately; dispatch runs in a
//!   background task.
//! - [`dispatcher::BatchDispatcher`] splits kinds into batches, refreshes
//!   record counts and publishes one [`work_item::WorkItem`] per kind.
//! - [`worker::ReplayWorker`] pages through one kind, publishes change
//!   events and checkpoints its cursor after every page.
//! - [`progress_store::ProgressStore`] persists per-(kind, replay) progress
//!   with batch operations that fall back to point operations.
//! - [`status::StatusAggregator`] folds progress rows into one status.
//!
//! Record discovery and metadata lookups are external collaborators behind
//! the traits in [`records`]. Durable state lives in the progress store,
//! never in shared memory, so any number of instances can cooperate.
//!
//! ## Usage
//!
//! ```rust
//! use replay_core::{Kind, ReplayId};
//!
//! let replay_id = ReplayId::generate();
//! let kind = Kind::new("osdu:wks:master-data--Well:1.0.0").unwrap();
//! assert!(!kind.is_system());
//! # let _ = replay_id;
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod adapters;
pub mod audit;
pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod headers;
pub mod progress;
pub mod progress_store;
pub mod records;
pub mod status;
pub mod work_item;
pub mod worker;

pub use audit::{AuditAction, AuditOutcome, AuditRecord, ReplayAuditSink, TracingAuditSink};
pub use config::ReplayConfig;
pub use coordinator::{ReplayCoordinator, ReplayRequest, ReplaySubmission};
pub use dispatcher::{create_batches, BatchDispatcher, DispatchSummary};
pub use error::{ProgressStoreError, RecordSourceError, ReplayError};
pub use events::{ChangeEvent, OperationType};
pub use headers::{CollaborationContext, RequestHeaders};
pub use progress::{format_elapsed, ProgressKey, ReplayOperation, ReplayProgress, ReplayState};
pub use progress_store::{BatchGetOutput, BatchGetReport, BatchSaveReport, ProgressBackend, ProgressStore, StoreLimits};
pub use records::{RecordDiscovery, RecordIdPage, RecordMetadata, RecordMetadataSource};
pub use replay_transport::Timestamp;
pub use status::{ReplayStatus, StatusAggregator};
pub use work_item::WorkItem;
pub use worker::{ReplayMessageHandler, ReplayWorker, WorkerOutcome};

/// Standard result type for replay operations
pub type ReplayResult<T> = Result<T, ReplayError>;

// ============================================================================
// Domain Identifier Types
// ============================================================================

/// Identifier of one replay request.
///
/// Either supplied by the client or generated as a UUID v4.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReplayId(String);

impl ReplayId {
    /// Create replay ID with validation
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "replay_id".to_string(),
            });
        }

        if value.len() > 128 {
            return Err(ValidationError::TooLong {
                field: "replay_id".to_string(),
                max_length: 128,
            });
        }

        if !value.chars().all(|c| c.is_ascii_graphic()) {
            return Err(ValidationError::InvalidCharacters {
                field: "replay_id".to_string(),
                invalid_chars: "non-ASCII or whitespace".to_string(),
            });
        }

        Ok(Self(value))
    }

    /// Generate a new random replay ID
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ReplayId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ReplayId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ReplayId> for String {
    fn from(id: ReplayId) -> Self {
        id.0
    }
}

/// A logical record type; the unit of replay parallelism.
///
/// The reserved kind [`Kind::SYSTEM`] tags the overarching progress row of a
/// replay that discovers its kinds in the background.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Kind(String);

impl Kind {
    pub const SYSTEM: &'static str = "system";

    /// Create kind with validation
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "kind".to_string(),
            });
        }

        if value.len() > 256 {
            return Err(ValidationError::TooLong {
                field: "kind".to_string(),
                max_length: 256,
            });
        }

        if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(ValidationError::InvalidCharacters {
                field: "kind".to_string(),
                invalid_chars: "whitespace or control characters".to_string(),
            });
        }

        Ok(Self(value))
    }

    /// The reserved kind of the overarching progress row
    pub fn system() -> Self {
        Self(Self::SYSTEM.to_string())
    }

    pub fn is_system(&self) -> bool {
        self.0 == Self::SYSTEM
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Kind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Kind {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Kind> for String {
    fn from(kind: Kind) -> Self {
        kind.0
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Input validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required { field: String },

    #[error("Field '{field}' has invalid format: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    TooLong { field: String, max_length: usize },

    #[error("Field '{field}' contains invalid characters: {invalid_chars}")]
    InvalidCharacters {
        field: String,
        invalid_chars: String,
    },
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
