//! # Record Collaborators
//!
//! Contracts of the external services that know about records. The replay
//! engine treats discovery as an opaque paginated source and metadata as a
//! point lookup. Every call carries the request headers so implementations
//! can scope the call to the right tenant.

use crate::error::RecordSourceError;
use crate::headers::RequestHeaders;
use crate::Kind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One page of record identifiers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordIdPage {
    pub ids: Vec<String>,
    /// `None` (or empty) when the kind has no further pages
    pub next_cursor: Option<String>,
}

/// Current metadata of a record, as needed to build a change event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMetadata {
    pub id: String,
    pub kind: Kind,
    /// Latest version of the record
    pub version: i64,
    #[serde(default)]
    pub create_user: Option<String>,
    #[serde(default)]
    pub modify_user: Option<String>,
}

impl RecordMetadata {
    /// Last user to touch the record
    pub fn last_user(&self) -> Option<&str> {
        self.modify_user
            .as_deref()
            .or(self.create_user.as_deref())
    }
}

/// Enumerates kinds and the record ids within a kind
#[async_trait]
pub trait RecordDiscovery: Send + Sync {
    /// One page of active record ids for `kind`, starting at `cursor`
    async fn list_record_ids_for_kind(
        &self,
        kind: &Kind,
        page_size: usize,
        cursor: Option<&str>,
        headers: &RequestHeaders,
    ) -> Result<RecordIdPage, RecordSourceError>;

    /// Active-record counts for exactly `kinds`. Unknown kinds may be
    /// absent from the result.
    async fn count_active_records(
        &self,
        kinds: &[Kind],
        headers: &RequestHeaders,
    ) -> Result<HashMap<Kind, u64>, RecordSourceError>;

    /// Active-record counts for every kind in the tenant
    async fn count_all_active_records(
        &self,
        headers: &RequestHeaders,
    ) -> Result<HashMap<Kind, u64>, RecordSourceError>;
}

/// Point lookup of record metadata
#[async_trait]
pub trait RecordMetadataSource: Send + Sync {
    /// `Ok(None)` when the record has no metadata (deleted or purged)
    async fn load_metadata(
        &self,
        record_id: &str,
        headers: &RequestHeaders,
    ) -> Result<Option<RecordMetadata>, RecordSourceError>;
}
