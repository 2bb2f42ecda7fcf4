//! Common test utilities for replay engine integration tests
//!
//! This module provides:
//! - A progress backend that counts writes and can reject batch calls
//! - A record source that fails on a chosen cursor
//! - [`Harness`], the whole engine wired over in-memory adapters

use async_trait::async_trait;
use replay_core::adapters::{InMemoryProgressBackend, InMemoryRecordCatalog};
use replay_core::{
    BatchDispatcher, BatchGetOutput, Kind, ProgressBackend, ProgressKey, ProgressStore,
    ProgressStoreError, RecordDiscovery, RecordIdPage, RecordSourceError, ReplayConfig,
    ReplayCoordinator, ReplayId, ReplayMessageHandler, ReplayProgress, ReplayWorker,
    RequestHeaders, StoreLimits, TracingAuditSink,
};
use replay_transport::{
    AttributePolicy, ConsumerConfig, InMemoryPublisher, InMemoryWorkQueue, QueueConsumer,
    QueueName, RedeliveryBackoff,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Counting Progress Backend
// ============================================================================

/// In-memory backend recording every point write per kind
#[allow(dead_code)]
pub struct CountingBackend {
    inner: InMemoryProgressBackend,
    puts: Mutex<HashMap<Kind, u32>>,
    batch_put_calls: AtomicU32,
    reject_batch_puts: AtomicBool,
    failing_puts: AtomicU32,
}

#[allow(dead_code)]
impl CountingBackend {
    pub fn new() -> Self {
        Self {
            inner: InMemoryProgressBackend::new(),
            puts: Mutex::new(HashMap::new()),
            batch_put_calls: AtomicU32::new(0),
            reject_batch_puts: AtomicBool::new(false),
            failing_puts: AtomicU32::new(0),
        }
    }

    /// Make every batch write fail, forcing the store onto point writes
    pub fn reject_batch_puts(&self) {
        self.reject_batch_puts.store(true, Ordering::SeqCst);
    }

    /// Make the next `count` point writes fail
    pub fn fail_next_puts(&self, count: u32) {
        self.failing_puts.store(count, Ordering::SeqCst);
    }

    pub fn puts_for(&self, kind: &Kind) -> u32 {
        self.puts.lock().unwrap().get(kind).copied().unwrap_or(0)
    }

    pub fn total_puts(&self) -> u32 {
        self.puts.lock().unwrap().values().sum()
    }

    pub fn batch_put_calls(&self) -> u32 {
        self.batch_put_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProgressBackend for CountingBackend {
    async fn get_item(
        &self,
        key: &ProgressKey,
    ) -> Result<Option<ReplayProgress>, ProgressStoreError> {
        self.inner.get_item(key).await
    }

    async fn put_item(&self, progress: &ReplayProgress) -> Result<(), ProgressStoreError> {
        *self
            .puts
            .lock()
            .unwrap()
            .entry(progress.kind.clone())
            .or_insert(0) += 1;
        let failing = self
            .failing_puts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ProgressStoreError::Unavailable {
                message: "write capacity exceeded".to_string(),
            });
        }
        self.inner.put_item(progress).await
    }

    async fn batch_get_items(
        &self,
        keys: &[ProgressKey],
    ) -> Result<BatchGetOutput, ProgressStoreError> {
        self.inner.batch_get_items(keys).await
    }

    async fn batch_put_items(
        &self,
        items: &[ReplayProgress],
    ) -> Result<Vec<ReplayProgress>, ProgressStoreError> {
        self.batch_put_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_batch_puts.load(Ordering::SeqCst) {
            return Err(ProgressStoreError::Unavailable {
                message: "batch writes throttled".to_string(),
            });
        }
        self.inner.batch_put_items(items).await
    }

    async fn query_by_replay_id(
        &self,
        replay_id: &ReplayId,
    ) -> Result<Vec<ReplayProgress>, ProgressStoreError> {
        self.inner.query_by_replay_id(replay_id).await
    }

    fn limits(&self) -> StoreLimits {
        self.inner.limits()
    }
}

// ============================================================================
// Flaky Record Discovery
// ============================================================================

/// Catalog-backed discovery that fails page requests at one cursor while armed
#[allow(dead_code)]
pub struct FlakyDiscovery {
    catalog: Arc<InMemoryRecordCatalog>,
    failing_cursor: Mutex<Option<String>>,
    failures: AtomicU32,
}

#[allow(dead_code)]
impl FlakyDiscovery {
    pub fn new(catalog: Arc<InMemoryRecordCatalog>) -> Self {
        Self {
            catalog,
            failing_cursor: Mutex::new(None),
            failures: AtomicU32::new(0),
        }
    }

    pub fn fail_at(&self, cursor: &str) {
        *self.failing_cursor.lock().unwrap() = Some(cursor.to_string());
    }

    pub fn heal(&self) {
        *self.failing_cursor.lock().unwrap() = None;
    }

    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordDiscovery for FlakyDiscovery {
    async fn list_record_ids_for_kind(
        &self,
        kind: &Kind,
        page_size: usize,
        cursor: Option<&str>,
        headers: &RequestHeaders,
    ) -> Result<RecordIdPage, RecordSourceError> {
        let failing = self.failing_cursor.lock().unwrap().clone();
        if failing.is_some() && failing.as_deref() == cursor {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(RecordSourceError::Unavailable {
                message: format!("search backend timed out at cursor {:?}", cursor),
            });
        }
        self.catalog
            .list_record_ids_for_kind(kind, page_size, cursor, headers)
            .await
    }

    async fn count_active_records(
        &self,
        kinds: &[Kind],
        headers: &RequestHeaders,
    ) -> Result<HashMap<Kind, u64>, RecordSourceError> {
        self.catalog.count_active_records(kinds, headers).await
    }

    async fn count_all_active_records(
        &self,
        headers: &RequestHeaders,
    ) -> Result<HashMap<Kind, u64>, RecordSourceError> {
        self.catalog.count_all_active_records(headers).await
    }
}

// ============================================================================
// Harness
// ============================================================================

/// The replay engine wired over in-memory adapters
#[allow(dead_code)]
pub struct Harness {
    pub backend: Arc<CountingBackend>,
    pub store: ProgressStore,
    pub catalog: Arc<InMemoryRecordCatalog>,
    pub discovery: Arc<FlakyDiscovery>,
    pub publisher: Arc<InMemoryPublisher>,
    pub queue: Arc<InMemoryWorkQueue>,
    pub coordinator: ReplayCoordinator,
    pub worker: Arc<ReplayWorker>,
    pub consumer: QueueConsumer<ReplayMessageHandler>,
    pub config: ReplayConfig,
}

#[allow(dead_code)]
impl Harness {
    pub fn new(catalog: InMemoryRecordCatalog, config: ReplayConfig) -> Self {
        Self::with_policy(catalog, config, None)
    }

    pub fn with_policy(
        catalog: InMemoryRecordCatalog,
        config: ReplayConfig,
        policy: Option<AttributePolicy>,
    ) -> Self {
        let backend = Arc::new(CountingBackend::new());
        let store = ProgressStore::new(backend.clone());
        let catalog = Arc::new(catalog);
        let discovery = Arc::new(FlakyDiscovery::new(catalog.clone()));

        let publisher = Arc::new(match policy {
            Some(policy) => InMemoryPublisher::with_policy(policy),
            None => InMemoryPublisher::new(),
        });
        let queue = Arc::new(InMemoryWorkQueue::new(
            QueueName::new("replay-work-queue").unwrap(),
        ));
        let work_topic = config.work_topic().unwrap();
        publisher.subscribe(work_topic.clone(), queue.clone());

        let audit = Arc::new(TracingAuditSink::new());
        let dispatcher = Arc::new(BatchDispatcher::new(
            store.clone(),
            discovery.clone(),
            publisher.clone(),
            work_topic,
            config.dispatch_batch_size,
        ));
        let coordinator = ReplayCoordinator::new(
            store.clone(),
            discovery.clone(),
            dispatcher,
            audit.clone(),
            config.parallelism,
        );
        let worker = Arc::new(ReplayWorker::new(
            store.clone(),
            discovery.clone(),
            catalog.clone(),
            publisher.clone(),
            audit,
            config.change_topic().unwrap(),
            config.page_size,
            config.publish_batch_size,
        ));
        let consumer = QueueConsumer::new(
            queue.clone(),
            Arc::new(ReplayMessageHandler::new(worker.clone())),
            immediate_redelivery(3),
        )
        .with_backoff(no_backoff());

        Self {
            backend,
            store,
            catalog,
            discovery,
            publisher,
            queue,
            coordinator,
            worker,
            consumer,
            config,
        }
    }

    /// Poll until nothing is waiting or in flight
    pub async fn drain(&self) {
        for _ in 0..1000 {
            if self.queue.is_empty() {
                return;
            }
            self.consumer.poll_once().await.unwrap();
        }
        panic!("work queue did not drain");
    }

    pub fn work_topic(&self) -> replay_transport::TopicName {
        self.config.work_topic().unwrap()
    }

    pub fn change_topic(&self) -> replay_transport::TopicName {
        self.config.change_topic().unwrap()
    }
}

/// Consumer settings that make failed messages visible again at once
#[allow(dead_code)]
pub fn immediate_redelivery(max_delivery_count: u32) -> ConsumerConfig {
    ConsumerConfig {
        wait_time_secs: 0,
        visibility_timeout_secs: 0,
        max_delivery_count,
        ..ConsumerConfig::default()
    }
}

#[allow(dead_code)]
pub fn no_backoff() -> RedeliveryBackoff {
    RedeliveryBackoff::new(Duration::ZERO, Duration::ZERO, 1.0).without_jitter()
}

#[allow(dead_code)]
pub fn kind(name: &str) -> Kind {
    Kind::new(name).unwrap()
}

/// Catalog with `count` generated records for each named kind
#[allow(dead_code)]
pub fn catalog_with(kinds: &[(&str, usize)]) -> InMemoryRecordCatalog {
    kinds
        .iter()
        .fold(InMemoryRecordCatalog::new(), |catalog, (name, count)| {
            catalog.with_generated_records(&kind(name), *count)
        })
}

#[allow(dead_code)]
pub fn config(page_size: usize) -> ReplayConfig {
    ReplayConfig {
        page_size,
        ..ReplayConfig::default()
    }
}
