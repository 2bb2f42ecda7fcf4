//! # Replay Coordinator
//!
//! Request-facing entry point. Validates a replay request, writes the
//! initial progress rows and returns the replay id as soon as those rows are
//! durable. Dispatch runs in a background task; its outcome is only visible
//! through status polling (and the returned [`JoinHandle`], for callers that
//! want to wait).
//!
//! Two paths:
//!
//! - kinds supplied: every kind must have active records; one QUEUED row per
//!   kind is written before returning
//! - no kinds: a single `system` row is written; the background task
//!   discovers all kinds, dispatches them and finally settles the system row

use crate::audit::{AuditAction, AuditOutcome, AuditRecord, ReplayAuditSink};
use crate::dispatcher::{BatchDispatcher, DispatchSummary};
use crate::error::ReplayError;
use crate::headers::RequestHeaders;
use crate::progress::{ReplayOperation, ReplayProgress};
use crate::progress_store::ProgressStore;
use crate::records::RecordDiscovery;
use crate::{Kind, ReplayId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

/// Replay request as received from a client
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReplayRequest {
    /// Generated when absent or blank
    pub replay_id: Option<String>,
    /// `replay` or `reindex`, case-insensitive
    pub operation: String,
    /// Empty means every kind of the tenant
    pub kinds: Vec<String>,
}

impl ReplayRequest {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Default::default()
        }
    }

    pub fn with_replay_id(mut self, replay_id: impl Into<String>) -> Self {
        self.replay_id = Some(replay_id.into());
        self
    }

    pub fn with_kinds<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.kinds = kinds.into_iter().map(Into::into).collect();
        self
    }
}

/// Acknowledgement of an accepted request
#[derive(Debug)]
pub struct ReplaySubmission {
    pub replay_id: ReplayId,
    /// Background dispatch; dropping the handle does not cancel it
    pub dispatch: JoinHandle<DispatchSummary>,
}

pub struct ReplayCoordinator {
    store: ProgressStore,
    discovery: Arc<dyn RecordDiscovery>,
    dispatcher: Arc<BatchDispatcher>,
    audit: Arc<dyn ReplayAuditSink>,
    dispatch_permits: Arc<Semaphore>,
}

impl ReplayCoordinator {
    /// `parallelism` bounds how many background dispatches run at once
    pub fn new(
        store: ProgressStore,
        discovery: Arc<dyn RecordDiscovery>,
        dispatcher: Arc<BatchDispatcher>,
        audit: Arc<dyn ReplayAuditSink>,
        parallelism: usize,
    ) -> Self {
        Self {
            store,
            discovery,
            dispatcher,
            audit,
            dispatch_permits: Arc::new(Semaphore::new(parallelism.max(1))),
        }
    }

    /// Accept a replay request.
    ///
    /// # Errors
    ///
    /// Invalid operation, replay id or kind names; kinds without active
    /// records; failure to write the initial progress rows. Nothing is
    /// dispatched when an error is returned.
    #[instrument(skip(self, request, headers), fields(operation = %request.operation, kinds = request.kinds.len()))]
    pub async fn submit(
        &self,
        request: ReplayRequest,
        headers: &RequestHeaders,
    ) -> Result<ReplaySubmission, ReplayError> {
        let operation: ReplayOperation = request.operation.parse()?;
        let replay_id = match request.replay_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => ReplayId::new(id)?,
            _ => ReplayId::generate(),
        };
        let kinds = unique_kinds(&request.kinds)?;

        let mut headers = headers.clone();
        headers.ensure_correlation_id();

        let dispatch = if kinds.is_empty() {
            self.accept_full_discovery(&replay_id, operation, headers.clone())
                .await?
        } else {
            self.accept_kinds(&replay_id, operation, kinds, headers.clone())
                .await?
        };

        info!(
            replay_id = %replay_id,
            operation = %operation,
            correlation_id = headers.correlation_id().unwrap_or(""),
            "Replay request accepted"
        );
        self.audit
            .record(
                AuditRecord::new(
                    AuditAction::ReplayAccepted,
                    replay_id.clone(),
                    operation,
                    AuditOutcome::Success,
                )
                .with_detail(if request.kinds.is_empty() {
                    "all kinds".to_string()
                } else {
                    format!("{} kinds", request.kinds.len())
                })
                .with_user(headers.user()),
            )
            .await;

        Ok(ReplaySubmission {
            replay_id,
            dispatch,
        })
    }

    async fn accept_kinds(
        &self,
        replay_id: &ReplayId,
        operation: ReplayOperation,
        kinds: Vec<Kind>,
        headers: RequestHeaders,
    ) -> Result<JoinHandle<DispatchSummary>, ReplayError> {
        let counts = self
            .discovery
            .count_active_records(&kinds, &headers)
            .await?;

        let missing: Vec<String> = kinds
            .iter()
            .filter(|kind| counts.get(*kind).copied().unwrap_or(0) == 0)
            .map(|kind| kind.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ReplayError::KindNotFound { kinds: missing });
        }

        let rows: Vec<ReplayProgress> = kinds
            .iter()
            .map(|kind| {
                let total = counts.get(kind).copied().unwrap_or(0);
                ReplayProgress::queued(kind.clone(), replay_id.clone(), operation, total)
            })
            .collect();

        let report = self.store.batch_save(&rows).await;
        if !report.is_complete() {
            return Err(ReplayError::InitialProgressWriteFailed {
                keys: report.failed.iter().map(|k| k.to_string()).collect(),
            });
        }

        let dispatcher = self.dispatcher.clone();
        let permits = self.dispatch_permits.clone();
        let replay_id = replay_id.clone();
        Ok(tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            dispatcher
                .dispatch(&replay_id, operation, &kinds, &headers)
                .await
        }))
    }

    async fn accept_full_discovery(
        &self,
        replay_id: &ReplayId,
        operation: ReplayOperation,
        headers: RequestHeaders,
    ) -> Result<JoinHandle<DispatchSummary>, ReplayError> {
        let system = ReplayProgress::queued(Kind::system(), replay_id.clone(), operation, 0);
        self.store.save(&system).await?;

        let store = self.store.clone();
        let discovery = self.discovery.clone();
        let dispatcher = self.dispatcher.clone();
        let permits = self.dispatch_permits.clone();
        Ok(tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            discover_and_dispatch(store, discovery, dispatcher, system, headers).await
        }))
    }
}

/// Background half of a full-discovery replay
async fn discover_and_dispatch(
    store: ProgressStore,
    discovery: Arc<dyn RecordDiscovery>,
    dispatcher: Arc<BatchDispatcher>,
    mut system: ReplayProgress,
    headers: RequestHeaders,
) -> DispatchSummary {
    let replay_id = system.replay_id.clone();
    let operation = system.operation;

    system.begin_processing();
    if let Err(e) = store.save(&system).await {
        warn!(replay_id = %replay_id, error = %e, "Failed to mark discovery in progress");
    }

    let counts = match discovery.count_all_active_records(&headers).await {
        Ok(counts) => counts,
        Err(e) => {
            error!(replay_id = %replay_id, error = %e, "Kind discovery failed");
            system.fail();
            if let Err(e) = store.save(&system).await {
                error!(replay_id = %replay_id, error = %e, "Failed to mark discovery FAILED");
            }
            return DispatchSummary::default();
        }
    };

    let mut kinds: Vec<Kind> = counts
        .iter()
        .filter(|(kind, count)| **count > 0 && !kind.is_system())
        .map(|(kind, _)| kind.clone())
        .collect();
    kinds.sort();
    info!(replay_id = %replay_id, kinds = kinds.len(), "Discovered kinds for replay");

    let rows: Vec<ReplayProgress> = kinds
        .iter()
        .map(|kind| {
            let total = counts.get(kind).copied().unwrap_or(0);
            ReplayProgress::queued(kind.clone(), replay_id.clone(), operation, total)
        })
        .collect();
    let report = store.batch_save(&rows).await;
    if !report.is_complete() {
        warn!(
            replay_id = %replay_id,
            failed = report.failed.len(),
            "Failed to write progress rows for some discovered kinds"
        );
    }

    let summary = dispatcher
        .dispatch(&replay_id, operation, &kinds, &headers)
        .await;

    system.total_records = rows.iter().map(|r| r.total_records).sum();
    system.complete();
    if let Err(e) = store.save(&system).await {
        error!(replay_id = %replay_id, error = %e, "Failed to mark discovery COMPLETED");
    }

    summary
}

/// Parse kind names, collapsing duplicates (first occurrence wins)
fn unique_kinds(names: &[String]) -> Result<Vec<Kind>, ReplayError> {
    let mut seen = HashSet::new();
    let mut kinds = Vec::with_capacity(names.len());
    for name in names {
        let kind = Kind::new(name.trim())?;
        if seen.insert(kind.clone()) {
            kinds.push(kind);
        }
    }
    Ok(kinds)
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
