//! # In-Memory Record Catalog
//!
//! Implements both record collaborators over a fixed set of records. Used
//! by the service when no external record service is configured, and by
//! tests that need a realistic paginated source.
//!
//! Cursors are opaque to callers; here they are the decimal offset of the
//! next record within the kind.

use crate::error::RecordSourceError;
use crate::headers::RequestHeaders;
use crate::records::{RecordDiscovery, RecordIdPage, RecordMetadata, RecordMetadataSource};
use crate::Kind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard};

/// Catalog entry as stored in a catalog file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogRecord {
    #[serde(flatten)]
    pub metadata: RecordMetadata,
    /// Inactive records are neither counted nor listed
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Default)]
struct CatalogState {
    /// Record ids per kind, in insertion order
    by_kind: BTreeMap<Kind, Vec<String>>,
    records: HashMap<String, CatalogRecord>,
}

/// Record discovery and metadata over an in-memory set of records
#[derive(Clone, Default)]
pub struct InMemoryRecordCatalog {
    state: Arc<RwLock<CatalogState>>,
}

impl InMemoryRecordCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a catalog from a JSON array of [`CatalogRecord`]
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, RecordSourceError> {
        let records: Vec<CatalogRecord> =
            serde_json::from_slice(bytes).map_err(|e| RecordSourceError::Internal {
                message: format!("Failed to parse record catalog: {}", e),
            })?;

        let catalog = Self::new();
        for record in records {
            catalog.insert_record(record);
        }
        Ok(catalog)
    }

    /// Add `count` active records named `<kind>:<n>` at version 1
    pub fn with_generated_records(self, kind: &Kind, count: usize) -> Self {
        for n in 0..count {
            self.insert(RecordMetadata {
                id: format!("{}:{}", kind, n),
                kind: kind.clone(),
                version: 1,
                create_user: None,
                modify_user: None,
            });
        }
        self
    }

    /// Insert or replace an active record
    pub fn insert(&self, metadata: RecordMetadata) {
        self.insert_record(CatalogRecord {
            metadata,
            active: true,
        });
    }

    pub fn insert_record(&self, record: CatalogRecord) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let id = record.metadata.id.clone();
        let kind = record.metadata.kind.clone();
        if state.records.insert(id.clone(), record).is_none() {
            state.by_kind.entry(kind).or_default().push(id);
        }
    }

    /// Mark a record inactive; returns false if it is unknown
    pub fn deactivate(&self, record_id: &str) -> bool {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        match state.records.get_mut(record_id) {
            Some(record) => {
                record.active = false;
                true
            }
            None => false,
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, CatalogState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn active_ids(state: &CatalogState, kind: &Kind) -> Vec<String> {
        state
            .by_kind
            .get(kind)
            .map(|ids| {
                ids.iter()
                    .filter(|id| state.records.get(*id).is_some_and(|r| r.active))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl RecordDiscovery for InMemoryRecordCatalog {
    async fn list_record_ids_for_kind(
        &self,
        kind: &Kind,
        page_size: usize,
        cursor: Option<&str>,
        _headers: &RequestHeaders,
    ) -> Result<RecordIdPage, RecordSourceError> {
        let offset = match cursor.filter(|c| !c.is_empty()) {
            Some(c) => c.parse::<usize>().map_err(|_| RecordSourceError::InvalidCursor {
                cursor: c.to_string(),
            })?,
            None => 0,
        };

        let ids = Self::active_ids(&self.read_state(), kind);
        let end = offset.saturating_add(page_size.max(1)).min(ids.len());
        let page: Vec<String> = ids.get(offset..end).map(<[String]>::to_vec).unwrap_or_default();
        let next_cursor = (end < ids.len()).then(|| end.to_string());

        Ok(RecordIdPage {
            ids: page,
            next_cursor,
        })
    }

    async fn count_active_records(
        &self,
        kinds: &[Kind],
        _headers: &RequestHeaders,
    ) -> Result<HashMap<Kind, u64>, RecordSourceError> {
        let state = self.read_state();
        Ok(kinds
            .iter()
            .filter(|kind| state.by_kind.contains_key(*kind))
            .map(|kind| (kind.clone(), Self::active_ids(&state, kind).len() as u64))
            .collect())
    }

    async fn count_all_active_records(
        &self,
        _headers: &RequestHeaders,
    ) -> Result<HashMap<Kind, u64>, RecordSourceError> {
        let state = self.read_state();
        Ok(state
            .by_kind
            .keys()
            .map(|kind| (kind.clone(), Self::active_ids(&state, kind).len() as u64))
            .filter(|(_, count)| *count > 0)
            .collect())
    }
}

#[async_trait]
impl RecordMetadataSource for InMemoryRecordCatalog {
    async fn load_metadata(
        &self,
        record_id: &str,
        _headers: &RequestHeaders,
    ) -> Result<Option<RecordMetadata>, RecordSourceError> {
        Ok(self
            .read_state()
            .records
            .get(record_id)
            .filter(|r| r.active)
            .map(|r| r.metadata.clone()))
    }
}

#[cfg(test)]
#[path = "record_catalog_tests.rs"]
mod tests;
