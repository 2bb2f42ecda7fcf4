//! # Status Aggregation
//!
//! Folds the progress rows of one replay into a single status. Read-only.
//!
//! Overall state precedence: any FAILED row makes the replay FAILED;
//! otherwise any QUEUED or IN_PROGRESS row makes it IN_PROGRESS; otherwise
//! it is COMPLETED. The `system` row of a full-discovery replay only counts
//! while no real kind rows exist.

use crate::error::ReplayError;
use crate::progress::{format_elapsed, ReplayOperation, ReplayProgress, ReplayState};
use crate::progress_store::ProgressStore;
use crate::{Kind, ReplayId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Aggregated view of a replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayStatus {
    pub replay_id: ReplayId,
    pub operation: ReplayOperation,
    pub overall_state: ReplayState,
    pub total_records: u64,
    pub processed_records: u64,
    /// Earliest start among the rows
    pub started_at: Option<Timestamp>,
    /// From `started_at` to the latest update
    pub elapsed_time: Option<String>,
    pub per_kind_status: Vec<ReplayProgress>,
}

#[derive(Clone)]
pub struct StatusAggregator {
    store: ProgressStore,
}

impl StatusAggregator {
    pub fn new(store: ProgressStore) -> Self {
        Self { store }
    }

    /// # Errors
    ///
    /// `ReplayNotFound` when no rows exist for `replay_id`.
    pub async fn get_status(&self, replay_id: &ReplayId) -> Result<ReplayStatus, ReplayError> {
        let rows = self.store.list_by_replay_id(replay_id).await?;
        aggregate(replay_id, rows).ok_or_else(|| ReplayError::ReplayNotFound {
            replay_id: replay_id.to_string(),
        })
    }

    /// Status restricted to `kinds`
    pub async fn get_status_for_kinds(
        &self,
        replay_id: &ReplayId,
        kinds: &[Kind],
    ) -> Result<ReplayStatus, ReplayError> {
        if kinds.is_empty() {
            return self.get_status(replay_id).await;
        }

        let wanted: HashSet<&Kind> = kinds.iter().collect();
        let rows: Vec<ReplayProgress> = self
            .store
            .list_by_replay_id(replay_id)
            .await?
            .into_iter()
            .filter(|row| wanted.contains(&row.kind))
            .collect();
        aggregate(replay_id, rows).ok_or_else(|| ReplayError::ReplayNotFound {
            replay_id: replay_id.to_string(),
        })
    }
}

/// Fold rows into a status; `None` when there are no rows
pub fn aggregate(replay_id: &ReplayId, rows: Vec<ReplayProgress>) -> Option<ReplayStatus> {
    let has_kind_rows = rows.iter().any(|row| !row.kind.is_system());
    let mut rows: Vec<ReplayProgress> = if has_kind_rows {
        rows.into_iter().filter(|row| !row.kind.is_system()).collect()
    } else {
        rows
    };
    if rows.is_empty() {
        return None;
    }
    rows.sort_by(|a, b| a.kind.cmp(&b.kind));

    let started_at = rows.iter().map(|row| row.started_at).min();
    let last_updated_at = rows.iter().map(|row| row.last_updated_at).max();
    let elapsed_time = match (started_at, last_updated_at) {
        (Some(start), Some(end)) => Some(format_elapsed(end.millis_since(&start))),
        _ => None,
    };

    Some(ReplayStatus {
        replay_id: replay_id.clone(),
        operation: rows[0].operation,
        overall_state: overall_state(&rows),
        total_records: rows.iter().map(|row| row.total_records).sum(),
        processed_records: rows.iter().map(|row| row.processed_records).sum(),
        started_at,
        elapsed_time,
        per_kind_status: rows,
    })
}

pub fn overall_state(rows: &[ReplayProgress]) -> ReplayState {
    if rows.iter().any(|row| row.state == ReplayState::Failed) {
        ReplayState::Failed
    } else if rows
        .iter()
        .any(|row| matches!(row.state, ReplayState::Queued | ReplayState::InProgress))
    {
        ReplayState::InProgress
    } else {
        ReplayState::Completed
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
