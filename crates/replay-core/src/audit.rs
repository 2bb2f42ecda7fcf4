//! # Replay Audit Trail
//!
//! Audit records for the externally meaningful events of a replay: request
//! accepted, kind completed, kind failed, delivery attempts exhausted.
//! Sinks are write-only and must not fail the caller.

use crate::progress::ReplayOperation;
use crate::{Kind, ReplayId, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

/// What happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    ReplayAccepted,
    KindCompleted,
    KindFailed,
    /// A work item failed on every allowed delivery and was dropped
    DeliveryExhausted,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ReplayAccepted => "replay_accepted",
            Self::KindCompleted => "kind_completed",
            Self::KindFailed => "kind_failed",
            Self::DeliveryExhausted => "delivery_exhausted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
}

/// Single audit entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub action: AuditAction,
    pub replay_id: ReplayId,
    pub kind: Option<Kind>,
    pub operation: ReplayOperation,
    pub outcome: AuditOutcome,
    pub detail: Option<String>,
    /// Requesting user, from the request headers
    pub user: Option<String>,
    pub recorded_at: Timestamp,
}

impl AuditRecord {
    pub fn new(
        action: AuditAction,
        replay_id: ReplayId,
        operation: ReplayOperation,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            action,
            replay_id,
            kind: None,
            operation,
            outcome,
            detail: None,
            user: None,
            recorded_at: Timestamp::now(),
        }
    }

    pub fn with_kind(mut self, kind: Kind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_user(mut self, user: Option<&str>) -> Self {
        self.user = user.map(str::to_string);
        self
    }
}

/// Destination of audit records
#[async_trait]
pub trait ReplayAuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord);
}

/// Writes audit records as tracing events on the `audit` target
#[derive(Debug, Clone, Default)]
pub struct TracingAuditSink;

impl TracingAuditSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ReplayAuditSink for TracingAuditSink {
    async fn record(&self, record: AuditRecord) {
        let kind = record.kind.as_ref().map(Kind::as_str).unwrap_or("");
        let detail = record.detail.as_deref().unwrap_or("");
        let user = record.user.as_deref().unwrap_or("");

        match record.outcome {
            AuditOutcome::Success => info!(
                target: "audit",
                action = %record.action,
                replay_id = %record.replay_id,
                kind = kind,
                operation = %record.operation,
                user = user,
                detail = detail,
                recorded_at = %record.recorded_at,
                "Replay audit event"
            ),
            AuditOutcome::Failure => warn!(
                target: "audit",
                action = %record.action,
                replay_id = %record.replay_id,
                kind = kind,
                operation = %record.operation,
                user = user,
                detail = detail,
                recorded_at = %record.recorded_at,
                "Replay audit event"
            ),
        }
    }
}

#[cfg(test)]
#[path = "audit_tests.rs"]
mod tests;
