//! # Replay Progress
//!
//! Durable per-(kind, replay) progress record and its state machine:
//!
//! ```text
//! QUEUED -> IN_PROGRESS -> COMPLETED
//!                       -> FAILED -> IN_PROGRESS (resume from cursor)
//! ```
//!
//! COMPLETED is terminal. `last_cursor` is cleared exactly when a kind
//! completes and is preserved on failure so a resume continues from the
//! last checkpoint.

use crate::{Kind, ReplayId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Replay flavour requested by the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayOperation {
    Replay,
    Reindex,
}

impl ReplayOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Replay => "replay",
            Self::Reindex => "reindex",
        }
    }
}

impl fmt::Display for ReplayOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReplayOperation {
    type Err = crate::ReplayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replay" => Ok(Self::Replay),
            "reindex" => Ok(Self::Reindex),
            _ => Err(crate::ReplayError::InvalidOperation {
                operation: s.to_string(),
            }),
        }
    }
}

/// Lifecycle state of one kind within a replay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplayState {
    Queued,
    InProgress,
    Completed,
    Failed,
}

impl ReplayState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for ReplayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "QUEUED",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Primary key of a progress record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressKey {
    pub kind: Kind,
    pub replay_id: ReplayId,
}

impl ProgressKey {
    pub fn new(kind: Kind, replay_id: ReplayId) -> Self {
        Self { kind, replay_id }
    }
}

impl fmt::Display for ProgressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.replay_id, self.kind)
    }
}

/// Progress of one kind within one replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayProgress {
    pub kind: Kind,
    pub replay_id: ReplayId,
    pub operation: ReplayOperation,
    pub state: ReplayState,
    pub total_records: u64,
    pub processed_records: u64,
    pub started_at: Timestamp,
    pub last_updated_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_cursor: Option<String>,
    pub elapsed_time: String,
}

impl ReplayProgress {
    /// New QUEUED record with no records processed
    pub fn queued(
        kind: Kind,
        replay_id: ReplayId,
        operation: ReplayOperation,
        total_records: u64,
    ) -> Self {
        let now = Timestamp::now();
        Self {
            kind,
            replay_id,
            operation,
            state: ReplayState::Queued,
            total_records,
            processed_records: 0,
            started_at: now,
            last_updated_at: now,
            last_cursor: None,
            elapsed_time: format_elapsed(0),
        }
    }

    pub fn key(&self) -> ProgressKey {
        ProgressKey::new(self.kind.clone(), self.replay_id.clone())
    }

    /// Enter IN_PROGRESS, keeping counts and cursor (resume after failure).
    ///
    /// The clock starts when the row first leaves QUEUED, so elapsed time
    /// excludes the wait in the work queue. A resume keeps the first start.
    pub fn begin_processing(&mut self) {
        if self.state == ReplayState::Queued {
            self.started_at = Timestamp::now();
        }
        self.state = ReplayState::InProgress;
        self.touch();
    }

    /// Record a page boundary.
    ///
    /// Records created after the count was taken can push the processed
    /// count past the total; the total follows so the invariant
    /// `processed_records <= total_records` holds.
    pub fn checkpoint(&mut self, processed_records: u64, cursor: Option<String>) {
        self.processed_records = processed_records;
        self.total_records = self.total_records.max(processed_records);
        self.last_cursor = cursor;
        self.touch();
    }

    pub fn complete(&mut self) {
        self.state = ReplayState::Completed;
        self.last_cursor = None;
        self.touch();
    }

    /// Enter FAILED, preserving the cursor of the last checkpoint
    pub fn fail(&mut self) {
        self.state = ReplayState::Failed;
        self.touch();
    }

    pub fn elapsed_millis(&self) -> u64 {
        self.last_updated_at.millis_since(&self.started_at)
    }

    fn touch(&mut self) {
        self.last_updated_at = Timestamp::now();
        self.elapsed_time = format_elapsed(self.elapsed_millis());
    }
}

/// Format a duration as `"<h>h <m>m <s>s"`, omitting leading zero units.
///
/// ```rust
/// use replay_core::format_elapsed;
///
/// assert_eq!(format_elapsed(5_000), "5s");
/// assert_eq!(format_elapsed(125_000), "2m 5s");
/// assert_eq!(format_elapsed(3_725_000), "1h 2m 5s");
/// ```
pub fn format_elapsed(millis: u64) -> String {
    let total_seconds = millis / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
#[path = "progress_tests.rs"]
mod tests;
