//! Wiring of the replay engine from a [`ServiceConfig`].
//!
//! Transport is in-process: the work topic fans out into an in-memory work
//! queue that the consumer polls. Progress is kept in memory or on disk.

use crate::config::{ServiceConfig, StorageBackend};
use crate::ServiceError;
use replay_core::adapters::{FilesystemProgressBackend, InMemoryProgressBackend, InMemoryRecordCatalog};
use replay_core::{
    BatchDispatcher, ProgressBackend, ProgressStore, ReplayCoordinator, ReplayMessageHandler,
    ReplayStatus, ReplaySubmission, ReplayWorker, StatusAggregator, TracingAuditSink,
};
use replay_transport::{ConfigurationError, InMemoryPublisher, InMemoryWorkQueue, QueueConsumer};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

pub struct ReplayApp {
    coordinator: ReplayCoordinator,
    status: StatusAggregator,
    queue: Arc<InMemoryWorkQueue>,
    publisher: Arc<InMemoryPublisher>,
    consumer: QueueConsumer<ReplayMessageHandler>,
}

impl ReplayApp {
    pub async fn build(config: &ServiceConfig) -> Result<Self, ServiceError> {
        let backend: Arc<dyn ProgressBackend> = match config.storage.backend {
            StorageBackend::Memory => Arc::new(InMemoryProgressBackend::new()),
            StorageBackend::Filesystem => {
                let path = config.storage.path.clone().ok_or_else(|| ConfigurationError::Missing {
                    key: "storage.path".to_string(),
                })?;
                info!(path = %path.display(), "Using filesystem progress store");
                Arc::new(FilesystemProgressBackend::new(path).await?)
            }
        };
        let store = ProgressStore::new(backend);

        let catalog = Arc::new(load_catalog(config).await?);

        let work_topic = config.replay.work_topic()?;
        let queue = Arc::new(InMemoryWorkQueue::new(config.queue_name()?));
        let publisher = Arc::new(InMemoryPublisher::new().without_recording());
        publisher.subscribe(work_topic.clone(), queue.clone());

        let audit = Arc::new(TracingAuditSink::new());
        let dispatcher = Arc::new(BatchDispatcher::new(
            store.clone(),
            catalog.clone(),
            publisher.clone(),
            work_topic,
            config.replay.dispatch_batch_size,
        ));
        let coordinator = ReplayCoordinator::new(
            store.clone(),
            catalog.clone(),
            dispatcher,
            audit.clone(),
            config.replay.parallelism,
        );

        let worker = Arc::new(ReplayWorker::new(
            store.clone(),
            catalog.clone(),
            catalog,
            publisher.clone(),
            audit,
            config.replay.change_topic()?,
            config.replay.page_size,
            config.replay.publish_batch_size,
        ));
        let consumer = QueueConsumer::new(
            queue.clone(),
            Arc::new(ReplayMessageHandler::new(worker)),
            config.consumer.clone(),
        );

        Ok(Self {
            coordinator,
            status: StatusAggregator::new(store),
            queue,
            publisher,
            consumer,
        })
    }

    pub fn coordinator(&self) -> &ReplayCoordinator {
        &self.coordinator
    }

    pub fn status(&self) -> &StatusAggregator {
        &self.status
    }

    pub fn publisher(&self) -> &InMemoryPublisher {
        &self.publisher
    }

    /// Consume work items until `shutdown` flips to `true`
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        self.consumer.run(shutdown).await;
    }

    /// Wait for dispatch, then poll until the work queue is drained.
    /// Returns the final status of the replay.
    pub async fn drive_to_completion(
        &self,
        submission: ReplaySubmission,
    ) -> Result<ReplayStatus, ServiceError> {
        let summary = submission
            .dispatch
            .await
            .map_err(|e| ServiceError::Internal {
                message: format!("dispatch task failed: {}", e),
            })?;
        info!(
            replay_id = %submission.replay_id,
            published = summary.published_items,
            failed_batches = summary.failed_batches,
            "Dispatch finished, draining work queue"
        );

        while !self.queue.is_empty() {
            let poll = self.consumer.poll_once().await?;
            debug!(
                received = poll.received,
                completed = poll.completed,
                rescheduled = poll.rescheduled,
                failed = poll.failed,
                "Drained poll"
            );
        }

        Ok(self.status.get_status(&submission.replay_id).await?)
    }
}

async fn load_catalog(config: &ServiceConfig) -> Result<InMemoryRecordCatalog, ServiceError> {
    let Some(path) = &config.catalog_path else {
        return Ok(InMemoryRecordCatalog::new());
    };

    let bytes = tokio::fs::read(path).await.map_err(|e| ServiceError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let catalog = InMemoryRecordCatalog::from_json_slice(&bytes)?;
    info!(path = %path.display(), "Loaded record catalog");
    Ok(catalog)
}

#[cfg(test)]
#[path = "app_tests.rs"]
mod tests;
