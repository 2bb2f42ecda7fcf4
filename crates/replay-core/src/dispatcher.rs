//! # Batch Dispatcher
//!
//! Fans a list of kinds out into work items. Kinds are processed in
//! consecutive batches; for each batch the dispatcher refreshes record
//! counts in the progress store and publishes one work item per kind in a
//! single publish call.
//!
//! Dispatch is best-effort per batch: a failing batch is logged, its kinds
//! are marked FAILED so polling shows the failure, and the next batch is
//! attempted.

use crate::error::ReplayError;
use crate::headers::{item_correlation_id, RequestHeaders};
use crate::progress::{ReplayOperation, ReplayProgress, ReplayState};
use crate::progress_store::{BatchSaveReport, ProgressStore};
use crate::records::RecordDiscovery;
use crate::work_item::WorkItem;
use crate::{Kind, ReplayId};
use replay_transport::{Message, Publisher, TopicName, CORRELATION_ID_HEADER};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Split `items` into consecutive chunks of `batch_size`; the last chunk
/// holds the remainder.
///
/// ```rust
/// use replay_core::create_batches;
///
/// let batches = create_batches(&[1, 2, 3, 4, 5], 2);
/// assert_eq!(batches, vec![vec![1, 2], vec![3, 4], vec![5]]);
/// assert!(create_batches::<u8>(&[], 2).is_empty());
/// ```
pub fn create_batches<T: Clone>(items: &[T], batch_size: usize) -> Vec<Vec<T>> {
    items
        .chunks(batch_size.max(1))
        .map(<[T]>::to_vec)
        .collect()
}

/// Totals of one dispatch run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub batches: usize,
    /// Work items the publisher accepted
    pub published_items: usize,
    pub failed_batches: usize,
    /// Kinds marked FAILED because their batch could not be dispatched
    pub failed_kinds: Vec<Kind>,
}

impl DispatchSummary {
    pub fn is_success(&self) -> bool {
        self.failed_batches == 0
    }
}

pub struct BatchDispatcher {
    store: ProgressStore,
    discovery: Arc<dyn RecordDiscovery>,
    publisher: Arc<dyn Publisher>,
    work_topic: TopicName,
    batch_size: usize,
}

impl BatchDispatcher {
    pub fn new(
        store: ProgressStore,
        discovery: Arc<dyn RecordDiscovery>,
        publisher: Arc<dyn Publisher>,
        work_topic: TopicName,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            discovery,
            publisher,
            work_topic,
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Dispatch every kind, batch by batch. Never fails; per-batch failures
    /// are reported in the summary.
    #[instrument(skip(self, kinds, headers), fields(replay_id = %replay_id, kinds = kinds.len()))]
    pub async fn dispatch(
        &self,
        replay_id: &ReplayId,
        operation: ReplayOperation,
        kinds: &[Kind],
        headers: &RequestHeaders,
    ) -> DispatchSummary {
        let mut headers = headers.clone();
        let base_correlation_id = headers.ensure_correlation_id();
        let batches = create_batches(kinds, self.batch_size);
        let mut summary = DispatchSummary::default();
        let mut item_counter = 0usize;

        info!(
            replay_id = %replay_id,
            kinds = kinds.len(),
            batches = batches.len(),
            batch_size = self.batch_size,
            "Dispatching replay"
        );

        for (index, batch) in batches.iter().enumerate() {
            summary.batches += 1;

            let result = match self
                .update_record_counts(replay_id, operation, batch, &headers)
                .await
            {
                Ok(_) => {
                    let messages = self.build_messages(
                        replay_id,
                        operation,
                        batch,
                        &headers,
                        &base_correlation_id,
                        &mut item_counter,
                    );
                    self.publisher
                        .publish_batch(&self.work_topic, messages)
                        .await
                        .map_err(ReplayError::from)
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(ids) => {
                    debug!(
                        replay_id = %replay_id,
                        batch = index,
                        published = ids.len(),
                        "Published work item batch"
                    );
                    summary.published_items += ids.len();
                }
                Err(e) => {
                    error!(
                        replay_id = %replay_id,
                        batch = index,
                        kinds = batch.len(),
                        error = %e,
                        "Failed to dispatch batch, continuing with next batch"
                    );
                    summary.failed_batches += 1;
                    self.mark_failed(replay_id, operation, batch).await;
                    summary.failed_kinds.extend(batch.iter().cloned());
                }
            }
        }

        info!(
            replay_id = %replay_id,
            batches = summary.batches,
            published = summary.published_items,
            failed_batches = summary.failed_batches,
            "Replay dispatch finished"
        );

        summary
    }

    /// Refresh `total_records` of the batch's progress rows from live counts.
    ///
    /// Rows that do not exist yet are created QUEUED. Rows keep their state
    /// and cursor so a FAILED kind resumes where it stopped. Kinds whose row
    /// could not be read are not written, since their current state is
    /// unknown.
    pub async fn update_record_counts(
        &self,
        replay_id: &ReplayId,
        operation: ReplayOperation,
        kinds: &[Kind],
        headers: &RequestHeaders,
    ) -> Result<BatchSaveReport, ReplayError> {
        let counts = self.discovery.count_active_records(kinds, headers).await?;
        let read = self.store.batch_get(kinds, replay_id).await;
        if !read.is_complete() {
            warn!(
                replay_id = %replay_id,
                unreadable = read.unreadable.len(),
                "Progress rows unreadable, leaving their counts unchanged"
            );
        }
        let existing: HashMap<Kind, ReplayProgress> =
            read.items.iter().map(|p| (p.kind.clone(), p.clone())).collect();

        let mut rows = Vec::with_capacity(kinds.len());
        for kind in kinds.iter().filter(|kind| !read.is_unreadable(kind)) {
            let count = counts.get(kind).copied().unwrap_or(0);
            match existing.get(kind) {
                Some(row) if row.state == ReplayState::Completed => {
                    debug!(replay_id = %replay_id, kind = %kind, "Kind already completed, count left unchanged");
                }
                Some(row) => {
                    let mut row = row.clone();
                    row.total_records = count.max(row.processed_records);
                    rows.push(row);
                }
                None => rows.push(ReplayProgress::queued(
                    kind.clone(),
                    replay_id.clone(),
                    operation,
                    count,
                )),
            }
        }

        let report = self.store.batch_save(&rows).await;
        if !report.is_complete() {
            warn!(
                replay_id = %replay_id,
                failed = report.failed.len(),
                "Failed to update record counts for some kinds"
            );
        }
        Ok(report)
    }

    fn build_messages(
        &self,
        replay_id: &ReplayId,
        operation: ReplayOperation,
        batch: &[Kind],
        headers: &RequestHeaders,
        base_correlation_id: &str,
        item_counter: &mut usize,
    ) -> Vec<Option<Message>> {
        batch
            .iter()
            .map(|kind| {
                let correlation_id = item_correlation_id(base_correlation_id, *item_counter);
                let item_headers = headers.clone().with(CORRELATION_ID_HEADER, correlation_id);
                *item_counter += 1;

                let item = WorkItem::new(kind.clone(), replay_id.clone(), operation, item_headers);
                match item.to_message() {
                    Ok(message) => Some(message),
                    Err(e) => {
                        error!(
                            replay_id = %replay_id,
                            kind = %kind,
                            error = %e,
                            "Failed to serialize work item, skipping"
                        );
                        None
                    }
                }
            })
            .collect()
    }

    async fn mark_failed(&self, replay_id: &ReplayId, operation: ReplayOperation, kinds: &[Kind]) {
        let read = self.store.batch_get(kinds, replay_id).await;
        if !read.is_complete() {
            error!(
                replay_id = %replay_id,
                unreadable = read.unreadable.len(),
                "Progress rows unreadable, cannot mark them FAILED"
            );
        }
        let existing: HashMap<Kind, ReplayProgress> =
            read.items.iter().map(|p| (p.kind.clone(), p.clone())).collect();

        let rows: Vec<ReplayProgress> = kinds
            .iter()
            .filter(|kind| !read.is_unreadable(kind))
            .filter_map(|kind| {
                let mut row = existing.get(kind).cloned().unwrap_or_else(|| {
                    ReplayProgress::queued(kind.clone(), replay_id.clone(), operation, 0)
                });
                if row.state == ReplayState::Completed {
                    return None;
                }
                row.fail();
                Some(row)
            })
            .collect();

        let report = self.store.batch_save(&rows).await;
        if !report.is_complete() {
            error!(
                replay_id = %replay_id,
                failed = report.failed.len(),
                "Failed to mark kinds of a failed batch as FAILED"
            );
        }
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
