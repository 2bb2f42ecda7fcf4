//! # In-Memory Progress Backend
//!
//! Thread-safe in-memory implementation for testing and development.

use crate::error::ProgressStoreError;
use crate::progress::{ProgressKey, ReplayProgress};
use crate::progress_store::{BatchGetOutput, ProgressBackend, StoreLimits};
use crate::ReplayId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// In-memory progress table.
///
/// Batch calls honour [`StoreLimits`] so callers exercise the same
/// chunking they would against a remote table.
#[derive(Clone)]
pub struct InMemoryProgressBackend {
    rows: Arc<RwLock<HashMap<ProgressKey, ReplayProgress>>>,
    limits: StoreLimits,
}

impl InMemoryProgressBackend {
    pub fn new() -> Self {
        Self::with_limits(StoreLimits::default())
    }

    pub fn with_limits(limits: StoreLimits) -> Self {
        Self {
            rows: Arc::new(RwLock::new(HashMap::new())),
            limits,
        }
    }

    pub fn len(&self) -> usize {
        self.read_rows().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_rows().is_empty()
    }

    fn read_rows(&self) -> RwLockReadGuard<'_, HashMap<ProgressKey, ReplayProgress>> {
        self.rows.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_rows(&self) -> RwLockWriteGuard<'_, HashMap<ProgressKey, ReplayProgress>> {
        self.rows.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for InMemoryProgressBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProgressBackend for InMemoryProgressBackend {
    async fn get_item(&self, key: &ProgressKey) -> Result<Option<ReplayProgress>, ProgressStoreError> {
        Ok(self.read_rows().get(key).cloned())
    }

    async fn put_item(&self, progress: &ReplayProgress) -> Result<(), ProgressStoreError> {
        self.write_rows().insert(progress.key(), progress.clone());
        Ok(())
    }

    async fn batch_get_items(&self, keys: &[ProgressKey]) -> Result<BatchGetOutput, ProgressStoreError> {
        if keys.len() > self.limits.max_batch_get {
            return Err(ProgressStoreError::BatchTooLarge {
                size: keys.len(),
                max_size: self.limits.max_batch_get,
            });
        }

        let rows = self.read_rows();
        Ok(BatchGetOutput {
            items: keys.iter().filter_map(|key| rows.get(key).cloned()).collect(),
            unprocessed_keys: Vec::new(),
        })
    }

    async fn batch_put_items(
        &self,
        items: &[ReplayProgress],
    ) -> Result<Vec<ReplayProgress>, ProgressStoreError> {
        if items.len() > self.limits.max_batch_write {
            return Err(ProgressStoreError::BatchTooLarge {
                size: items.len(),
                max_size: self.limits.max_batch_write,
            });
        }

        let mut rows = self.write_rows();
        for item in items {
            rows.insert(item.key(), item.clone());
        }
        Ok(Vec::new())
    }

    async fn query_by_replay_id(
        &self,
        replay_id: &ReplayId,
    ) -> Result<Vec<ReplayProgress>, ProgressStoreError> {
        let mut found: Vec<ReplayProgress> = self
            .read_rows()
            .values()
            .filter(|p| &p.replay_id == replay_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.kind.cmp(&b.kind));
        Ok(found)
    }

    fn limits(&self) -> StoreLimits {
        self.limits
    }
}

#[cfg(test)]
#[path = "memory_progress_tests.rs"]
mod tests;
