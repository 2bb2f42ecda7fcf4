//! Change events re-announced for every replayed record.

use crate::headers::CollaborationContext;
use crate::progress::ReplayOperation;
use crate::records::RecordMetadata;
use crate::Kind;
use serde::{Deserialize, Serialize};

/// Record blocks announced as changed by a replay
pub const REPLAY_RECORD_BLOCKS: &str = "data metadata";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

impl From<ReplayOperation> for OperationType {
    /// Replays and reindexes both re-announce existing records
    fn from(_operation: ReplayOperation) -> Self {
        Self::Update
    }
}

/// Notification that a record changed; derived from metadata, never stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    #[serde(rename = "id")]
    pub record_id: String,
    pub kind: Kind,
    pub version: i64,
    #[serde(rename = "modifiedBy", skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub op: OperationType,
    pub record_blocks: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_context: Option<CollaborationContext>,
}

impl ChangeEvent {
    pub fn from_metadata(
        metadata: &RecordMetadata,
        operation: ReplayOperation,
        collaboration: Option<&CollaborationContext>,
    ) -> Self {
        Self {
            record_id: metadata.id.clone(),
            kind: metadata.kind.clone(),
            version: metadata.version,
            user: metadata.last_user().map(str::to_string),
            op: operation.into(),
            record_blocks: REPLAY_RECORD_BLOCKS.to_string(),
            correlation_context: collaboration.cloned(),
        }
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
