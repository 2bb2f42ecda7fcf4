//! # Replay Worker
//!
//! Processes one work item: pages through every record id of a kind,
//! re-announces each record as a [`ChangeEvent`] and checkpoints progress
//! after every page.
//!
//! Progress writes per invocation:
//!
//! - one write entering IN_PROGRESS
//! - one checkpoint per page that has a successor (processed count and the
//!   cursor of the next page)
//! - one final checkpoint that also completes the kind and clears the cursor
//!
//! A crash after a checkpoint costs at most one page of duplicate events on
//! resume. Failures inside the page loop mark the kind FAILED with its
//! cursor intact and are reported to the audit sink; they are not returned
//! to the queue consumer. Only an unreachable progress store is surfaced,
//! so that the work item is redelivered.

use crate::audit::{AuditAction, AuditOutcome, AuditRecord, ReplayAuditSink};
use crate::error::ReplayError;
use crate::events::ChangeEvent;
use crate::headers::{CollaborationContext, RequestHeaders};
use crate::progress::{ReplayProgress, ReplayState};
use crate::progress_store::ProgressStore;
use crate::records::{RecordDiscovery, RecordMetadataSource};
use crate::work_item::WorkItem;
use async_trait::async_trait;
use replay_transport::{HandlerError, Message, MessageHandler, Publisher, TopicName};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Result of processing one work item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// Kind was COMPLETED before this delivery; nothing was done
    AlreadyCompleted,
    /// No progress row exists for the item; nothing was done
    ProgressMissing,
    /// Progress could not be loaded or claimed; the item should be retried
    Unavailable { error: String },
    Completed { processed_records: u64, pages: u32 },
    /// Kind marked FAILED; `last_cursor` is where a resume continues
    Failed {
        processed_records: u64,
        last_cursor: Option<String>,
        error: String,
    },
}

pub struct ReplayWorker {
    store: ProgressStore,
    discovery: Arc<dyn RecordDiscovery>,
    metadata: Arc<dyn RecordMetadataSource>,
    publisher: Arc<dyn Publisher>,
    audit: Arc<dyn ReplayAuditSink>,
    change_topic: TopicName,
    page_size: usize,
    publish_batch_size: usize,
}

impl ReplayWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: ProgressStore,
        discovery: Arc<dyn RecordDiscovery>,
        metadata: Arc<dyn RecordMetadataSource>,
        publisher: Arc<dyn Publisher>,
        audit: Arc<dyn ReplayAuditSink>,
        change_topic: TopicName,
        page_size: usize,
        publish_batch_size: usize,
    ) -> Self {
        Self {
            store,
            discovery,
            metadata,
            publisher,
            audit,
            change_topic,
            page_size: page_size.max(1),
            publish_batch_size: publish_batch_size.max(1),
        }
    }

    /// Replay one kind, resuming from its last checkpoint
    #[instrument(skip(self, item, headers), fields(replay_id = %item.replay_id, kind = %item.kind, created_id = %item.created_id))]
    pub async fn process(&self, item: &WorkItem, headers: &RequestHeaders) -> WorkerOutcome {
        let mut progress = match self.store.get(&item.kind, &item.replay_id).await {
            Ok(Some(progress)) => progress,
            Ok(None) => {
                warn!(
                    replay_id = %item.replay_id,
                    kind = %item.kind,
                    "No progress row for work item, ignoring"
                );
                return WorkerOutcome::ProgressMissing;
            }
            Err(e) => {
                warn!(
                    replay_id = %item.replay_id,
                    kind = %item.kind,
                    error = %e,
                    "Failed to load progress"
                );
                return WorkerOutcome::Unavailable {
                    error: e.to_string(),
                };
            }
        };

        if progress.state == ReplayState::Completed {
            info!(
                replay_id = %item.replay_id,
                kind = %item.kind,
                "Kind already completed, skipping redelivered work item"
            );
            return WorkerOutcome::AlreadyCompleted;
        }

        let resumed = progress.last_cursor.is_some();
        progress.begin_processing();
        if let Err(e) = self.store.save(&progress).await {
            warn!(
                replay_id = %item.replay_id,
                kind = %item.kind,
                error = %e,
                "Failed to mark kind in progress"
            );
            return WorkerOutcome::Unavailable {
                error: e.to_string(),
            };
        }

        info!(
            replay_id = %item.replay_id,
            kind = %item.kind,
            operation = %item.operation,
            resumed,
            processed = progress.processed_records,
            "Replaying kind"
        );

        let mut pages = 0u32;
        match self.replay_pages(item, headers, &mut progress, &mut pages).await {
            Ok(()) => {
                info!(
                    replay_id = %item.replay_id,
                    kind = %item.kind,
                    processed = progress.processed_records,
                    pages,
                    elapsed = %progress.elapsed_time,
                    "Kind replay completed"
                );
                self.audit
                    .record(
                        AuditRecord::new(
                            AuditAction::KindCompleted,
                            item.replay_id.clone(),
                            item.operation,
                            AuditOutcome::Success,
                        )
                        .with_kind(item.kind.clone())
                        .with_detail(format!("{} records", progress.processed_records))
                        .with_user(headers.user()),
                    )
                    .await;
                WorkerOutcome::Completed {
                    processed_records: progress.processed_records,
                    pages,
                }
            }
            Err(e) => self.fail_kind(item, headers, &mut progress, &e).await,
        }
    }

    async fn replay_pages(
        &self,
        item: &WorkItem,
        headers: &RequestHeaders,
        progress: &mut ReplayProgress,
        pages: &mut u32,
    ) -> Result<(), ReplayError> {
        let collaboration = headers.collaboration_context();

        loop {
            let cursor = progress.last_cursor.clone();
            let page = self
                .discovery
                .list_record_ids_for_kind(&item.kind, self.page_size, cursor.as_deref(), headers)
                .await?;
            *pages += 1;

            let events = self
                .load_events(item, headers, &page.ids, collaboration.as_ref())
                .await?;
            self.publish_events(item, headers, &events).await?;

            let processed = progress.processed_records + page.ids.len() as u64;
            let next_cursor = page.next_cursor.filter(|c| !c.is_empty());

            match next_cursor {
                Some(next) => {
                    if cursor.as_deref() == Some(next.as_str()) {
                        return Err(ReplayError::Internal {
                            message: format!("record source returned cursor '{}' twice", next),
                        });
                    }
                    progress.checkpoint(processed, Some(next));
                    self.store.save(progress).await?;
                    debug!(
                        replay_id = %item.replay_id,
                        kind = %item.kind,
                        processed,
                        published = events.len(),
                        "Checkpointed page"
                    );
                }
                None => {
                    progress.checkpoint(processed, None);
                    progress.complete();
                    self.store.save(progress).await?;
                    return Ok(());
                }
            }
        }
    }

    /// Metadata for every id of a page; records without metadata are skipped
    async fn load_events(
        &self,
        item: &WorkItem,
        headers: &RequestHeaders,
        ids: &[String],
        collaboration: Option<&CollaborationContext>,
    ) -> Result<Vec<ChangeEvent>, ReplayError> {
        let mut events = Vec::with_capacity(ids.len());
        for id in ids {
            match self.metadata.load_metadata(id, headers).await? {
                Some(metadata) => events.push(ChangeEvent::from_metadata(
                    &metadata,
                    item.operation,
                    collaboration,
                )),
                None => warn!(
                    replay_id = %item.replay_id,
                    kind = %item.kind,
                    record_id = %id,
                    "Record metadata not found, skipping record"
                ),
            }
        }
        Ok(events)
    }

    async fn publish_events(
        &self,
        item: &WorkItem,
        headers: &RequestHeaders,
        events: &[ChangeEvent],
    ) -> Result<(), ReplayError> {
        for chunk in events.chunks(self.publish_batch_size) {
            let mut message = Message::from_json(&chunk)?
                .with_attributes(headers.as_map())
                .with_operation(item.operation.as_str());
            if let Some(correlation_id) = headers.correlation_id() {
                message = message.with_correlation_id(correlation_id);
            }
            self.publisher.publish(&self.change_topic, message).await?;
        }
        Ok(())
    }

    async fn fail_kind(
        &self,
        item: &WorkItem,
        headers: &RequestHeaders,
        progress: &mut ReplayProgress,
        cause: &ReplayError,
    ) -> WorkerOutcome {
        error!(
            replay_id = %item.replay_id,
            kind = %item.kind,
            processed = progress.processed_records,
            last_cursor = progress.last_cursor.as_deref().unwrap_or(""),
            error = %cause,
            "Kind replay failed"
        );

        progress.fail();
        if let Err(e) = self.store.save(progress).await {
            error!(
                replay_id = %item.replay_id,
                kind = %item.kind,
                error = %e,
                "Failed to persist FAILED state"
            );
        }

        self.audit
            .record(
                AuditRecord::new(
                    AuditAction::KindFailed,
                    item.replay_id.clone(),
                    item.operation,
                    AuditOutcome::Failure,
                )
                .with_kind(item.kind.clone())
                .with_detail(cause.to_string())
                .with_user(headers.user()),
            )
            .await;

        WorkerOutcome::Failed {
            processed_records: progress.processed_records,
            last_cursor: progress.last_cursor.clone(),
            error: cause.to_string(),
        }
    }

    /// Terminal handling of a work item that failed on every delivery
    pub async fn record_delivery_failure(&self, item: &WorkItem, headers: &RequestHeaders, error: &str) {
        match self.store.get(&item.kind, &item.replay_id).await {
            Ok(Some(mut progress)) if progress.state != ReplayState::Completed => {
                progress.fail();
                if let Err(e) = self.store.save(&progress).await {
                    error!(
                        replay_id = %item.replay_id,
                        kind = %item.kind,
                        error = %e,
                        "Failed to persist FAILED state after exhausted deliveries"
                    );
                }
            }
            Ok(_) => {}
            Err(e) => error!(
                replay_id = %item.replay_id,
                kind = %item.kind,
                error = %e,
                "Failed to load progress after exhausted deliveries"
            ),
        }

        self.audit
            .record(
                AuditRecord::new(
                    AuditAction::DeliveryExhausted,
                    item.replay_id.clone(),
                    item.operation,
                    AuditOutcome::Failure,
                )
                .with_kind(item.kind.clone())
                .with_detail(error)
                .with_user(headers.user()),
            )
            .await;
    }
}

// ============================================================================
// Queue Consumer Integration
// ============================================================================

/// Routes decoded work items from the queue consumer to a [`ReplayWorker`]
pub struct ReplayMessageHandler {
    worker: Arc<ReplayWorker>,
}

impl ReplayMessageHandler {
    pub fn new(worker: Arc<ReplayWorker>) -> Self {
        Self { worker }
    }
}

#[async_trait]
impl MessageHandler for ReplayMessageHandler {
    type Message = WorkItem;

    async fn handle(
        &self,
        item: WorkItem,
        attributes: &HashMap<String, String>,
    ) -> Result<(), HandlerError> {
        let headers = RequestHeaders::merged(attributes, &item.headers);
        match self.worker.process(&item, &headers).await {
            WorkerOutcome::Unavailable { error } => Err(HandlerError::new(error)),
            _ => Ok(()),
        }
    }

    async fn on_failure(
        &self,
        item: WorkItem,
        attributes: &HashMap<String, String>,
        error: &HandlerError,
    ) {
        let headers = RequestHeaders::merged(attributes, &item.headers);
        self.worker
            .record_delivery_failure(&item, &headers, &error.message)
            .await;
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
