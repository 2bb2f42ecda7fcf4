//! Work item: "replay this kind for this replay", one per queued message.

use crate::headers::RequestHeaders;
use crate::progress::ReplayOperation;
use crate::{Kind, ReplayId, Timestamp};
use replay_transport::{Message, SerializationError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub kind: Kind,
    pub replay_id: ReplayId,
    pub operation: ReplayOperation,
    /// Unique per item so log lines of redeliveries can be told apart
    pub created_id: String,
    #[serde(rename = "startedAtTimestamp")]
    pub started_at: Timestamp,
    #[serde(default)]
    pub headers: RequestHeaders,
}

impl WorkItem {
    pub fn new(
        kind: Kind,
        replay_id: ReplayId,
        operation: ReplayOperation,
        headers: RequestHeaders,
    ) -> Self {
        Self {
            kind,
            replay_id,
            operation,
            created_id: uuid::Uuid::new_v4().to_string(),
            started_at: Timestamp::now(),
            headers,
        }
    }

    /// Encode as a queue message carrying the headers as attributes
    pub fn to_message(&self) -> Result<Message, SerializationError> {
        let mut message = Message::from_json(self)?
            .with_attributes(self.headers.as_map())
            .with_operation(self.operation.as_str());
        if let Some(correlation_id) = self.headers.correlation_id() {
            message = message.with_correlation_id(correlation_id);
        }
        Ok(message)
    }
}

#[cfg(test)]
#[path = "work_item_tests.rs"]
mod tests;
