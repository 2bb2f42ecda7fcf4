//! # Progress Store
//!
//! Durable key-value persistence of [`ReplayProgress`] keyed by
//! (kind, replay id).
//!
//! [`ProgressBackend`] exposes the primitives a concrete store offers,
//! including native batch calls and their size limits. [`ProgressStore`]
//! layers the degradation contract on top: a batch call that fails, or
//! reports unprocessed items, is completed with point calls so one bad key
//! never blocks a whole batch. Batch operations therefore never fail the
//! caller; they report what could not be done.

use crate::error::ProgressStoreError;
use crate::progress::{ProgressKey, ReplayProgress};
use crate::{Kind, ReplayId};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Native batch limits of a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLimits {
    /// Maximum keys per batch read
    pub max_batch_get: usize,
    /// Maximum items per batch write
    pub max_batch_write: usize,
}

impl StoreLimits {
    /// Limits of a DynamoDB-style table
    pub const KEY_VALUE_TABLE: StoreLimits = StoreLimits {
        max_batch_get: 100,
        max_batch_write: 25,
    };
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self::KEY_VALUE_TABLE
    }
}

/// Result of a native batch read
#[derive(Debug, Clone, Default)]
pub struct BatchGetOutput {
    pub items: Vec<ReplayProgress>,
    /// Keys the backend did not get to; the caller must retry them
    pub unprocessed_keys: Vec<ProgressKey>,
}

/// Primitives of a concrete progress backend
#[async_trait]
pub trait ProgressBackend: Send + Sync {
    async fn get_item(&self, key: &ProgressKey) -> Result<Option<ReplayProgress>, ProgressStoreError>;

    /// Upsert keyed by (kind, replay id)
    async fn put_item(&self, progress: &ReplayProgress) -> Result<(), ProgressStoreError>;

    async fn batch_get_items(&self, keys: &[ProgressKey]) -> Result<BatchGetOutput, ProgressStoreError>;

    /// Returns the items the backend did not write
    async fn batch_put_items(
        &self,
        items: &[ReplayProgress],
    ) -> Result<Vec<ReplayProgress>, ProgressStoreError>;

    async fn query_by_replay_id(
        &self,
        replay_id: &ReplayId,
    ) -> Result<Vec<ReplayProgress>, ProgressStoreError>;

    fn limits(&self) -> StoreLimits;
}

/// Outcome of [`ProgressStore::batch_save`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSaveReport {
    pub saved: usize,
    /// Keys that could not be written even individually
    pub failed: Vec<ProgressKey>,
}

impl BatchSaveReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Outcome of [`ProgressStore::batch_get`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchGetReport {
    /// Rows that exist; absent keys are simply not listed
    pub items: Vec<ReplayProgress>,
    /// Keys whose row could not be read even individually. Their state is
    /// unknown, not missing.
    pub unreadable: Vec<ProgressKey>,
}

impl BatchGetReport {
    pub fn is_complete(&self) -> bool {
        self.unreadable.is_empty()
    }

    /// Whether the row for `kind` could not be read
    pub fn is_unreadable(&self, kind: &Kind) -> bool {
        self.unreadable.iter().any(|key| &key.kind == kind)
    }
}

/// Progress store with batch-to-point fallback
#[derive(Clone)]
pub struct ProgressStore {
    backend: Arc<dyn ProgressBackend>,
}

impl ProgressStore {
    pub fn new(backend: Arc<dyn ProgressBackend>) -> Self {
        Self { backend }
    }

    pub async fn get(
        &self,
        kind: &Kind,
        replay_id: &ReplayId,
    ) -> Result<Option<ReplayProgress>, ProgressStoreError> {
        self.backend
            .get_item(&ProgressKey::new(kind.clone(), replay_id.clone()))
            .await
    }

    pub async fn save(&self, progress: &ReplayProgress) -> Result<(), ProgressStoreError> {
        self.backend.put_item(progress).await
    }

    pub async fn list_by_replay_id(
        &self,
        replay_id: &ReplayId,
    ) -> Result<Vec<ReplayProgress>, ProgressStoreError> {
        self.backend.query_by_replay_id(replay_id).await
    }

    /// Read the progress rows of `kinds` for one replay.
    ///
    /// Missing rows are omitted. Keys the batch primitive could not serve
    /// are fetched one at a time; keys that fail individually are reported
    /// as unreadable.
    pub async fn batch_get(&self, kinds: &[Kind], replay_id: &ReplayId) -> BatchGetReport {
        let keys: Vec<ProgressKey> = kinds
            .iter()
            .map(|kind| ProgressKey::new(kind.clone(), replay_id.clone()))
            .collect();
        let chunk_size = self.backend.limits().max_batch_get.max(1);
        let mut report = BatchGetReport::default();

        for chunk in keys.chunks(chunk_size) {
            let retry = match self.backend.batch_get_items(chunk).await {
                Ok(output) => {
                    report.items.extend(output.items);
                    output.unprocessed_keys
                }
                Err(e) => {
                    warn!(
                        replay_id = %replay_id,
                        affected = chunk.len(),
                        error = %e,
                        "Batch read failed, falling back to individual reads"
                    );
                    chunk.to_vec()
                }
            };

            if retry.is_empty() {
                continue;
            }

            warn!(
                replay_id = %replay_id,
                affected = retry.len(),
                "Reading unprocessed progress keys individually"
            );
            for key in retry {
                match self.backend.get_item(&key).await {
                    Ok(Some(progress)) => report.items.push(progress),
                    Ok(None) => debug!(key = %key, "No progress row for key"),
                    Err(e) => {
                        warn!(key = %key, error = %e, "Failed to read progress row");
                        report.unreadable.push(key);
                    }
                }
            }
        }

        report
    }

    /// Upsert many rows.
    ///
    /// Items the batch primitive rejects, or every item of a chunk whose
    /// batch call fails, are written one at a time. Exactly one point write
    /// is issued per unprocessed item.
    pub async fn batch_save(&self, items: &[ReplayProgress]) -> BatchSaveReport {
        let chunk_size = self.backend.limits().max_batch_write.max(1);
        let mut report = BatchSaveReport::default();

        for chunk in items.chunks(chunk_size) {
            let retry = match self.backend.batch_put_items(chunk).await {
                Ok(unprocessed) => {
                    report.saved += chunk.len().saturating_sub(unprocessed.len());
                    unprocessed
                }
                Err(e) => {
                    warn!(
                        affected = chunk.len(),
                        error = %e,
                        "Batch write failed, falling back to individual writes"
                    );
                    chunk.to_vec()
                }
            };

            if retry.is_empty() {
                continue;
            }

            warn!(affected = retry.len(), "Writing unprocessed progress rows individually");
            for progress in retry {
                match self.backend.put_item(&progress).await {
                    Ok(()) => report.saved += 1,
                    Err(e) => {
                        warn!(key = %progress.key(), error = %e, "Failed to write progress row");
                        report.failed.push(progress.key());
                    }
                }
            }
        }

        report
    }
}

#[cfg(test)]
#[path = "progress_store_tests.rs"]
mod tests;
