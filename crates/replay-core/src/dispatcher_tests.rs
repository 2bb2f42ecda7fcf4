//! Tests for batch dispatch.

use super::*;
use crate::adapters::{InMemoryProgressBackend, InMemoryRecordCatalog};
use crate::error::{ProgressStoreError, RecordSourceError};
use crate::progress::ProgressKey;
use crate::progress_store::{BatchGetOutput, ProgressBackend, StoreLimits};
use crate::records::RecordIdPage;
use async_trait::async_trait;
use replay_transport::{
    InMemoryPublisher, MessageId, ProviderType, TransportError, TransportLimits,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

// ============================================================================
// Test Doubles
// ============================================================================

/// Publisher that fails the listed call numbers (0-based)
struct FlakyPublisher {
    failing_calls: Vec<u32>,
    calls: AtomicU32,
    batches: Mutex<Vec<Vec<Option<Message>>>>,
}

impl FlakyPublisher {
    fn new(failing_calls: Vec<u32>) -> Self {
        Self {
            failing_calls,
            calls: AtomicU32::new(0),
            batches: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Publisher for FlakyPublisher {
    async fn publish(&self, _topic: &TopicName, _message: Message) -> Result<MessageId, TransportError> {
        Ok(MessageId::new())
    }

    async fn publish_batch(
        &self,
        _topic: &TopicName,
        messages: Vec<Option<Message>>,
    ) -> Result<Vec<MessageId>, TransportError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_calls.contains(&call) {
            return Err(TransportError::Unavailable {
                message: "broker unreachable".to_string(),
            });
        }
        let ids = messages.iter().flatten().map(|_| MessageId::new()).collect();
        self.batches.lock().unwrap().push(messages);
        Ok(ids)
    }

    fn limits(&self) -> TransportLimits {
        TransportLimits::IN_MEMORY
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}

/// Discovery whose count lookup always fails
struct UnavailableDiscovery;

#[async_trait]
impl RecordDiscovery for UnavailableDiscovery {
    async fn list_record_ids_for_kind(
        &self,
        _kind: &Kind,
        _page_size: usize,
        _cursor: Option<&str>,
        _headers: &RequestHeaders,
    ) -> Result<RecordIdPage, RecordSourceError> {
        Ok(RecordIdPage::default())
    }

    async fn count_active_records(
        &self,
        _kinds: &[Kind],
        _headers: &RequestHeaders,
    ) -> Result<HashMap<Kind, u64>, RecordSourceError> {
        Err(RecordSourceError::Unavailable {
            message: "search offline".to_string(),
        })
    }

    async fn count_all_active_records(
        &self,
        _headers: &RequestHeaders,
    ) -> Result<HashMap<Kind, u64>, RecordSourceError> {
        Ok(HashMap::new())
    }
}

/// Progress backend whose reads can be switched off while writes keep working
struct ReadFailingBackend {
    inner: InMemoryProgressBackend,
    reads_fail: AtomicBool,
}

impl ReadFailingBackend {
    fn new() -> Self {
        Self {
            inner: InMemoryProgressBackend::new(),
            reads_fail: AtomicBool::new(false),
        }
    }

    fn fail_reads(&self) {
        self.reads_fail.store(true, Ordering::SeqCst);
    }

    fn check_read(&self) -> Result<(), ProgressStoreError> {
        if self.reads_fail.load(Ordering::SeqCst) {
            return Err(ProgressStoreError::Unavailable {
                message: "read capacity exceeded".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ProgressBackend for ReadFailingBackend {
    async fn get_item(&self, key: &ProgressKey) -> Result<Option<ReplayProgress>, ProgressStoreError> {
        self.check_read()?;
        self.inner.get_item(key).await
    }

    async fn put_item(&self, progress: &ReplayProgress) -> Result<(), ProgressStoreError> {
        self.inner.put_item(progress).await
    }

    async fn batch_get_items(&self, keys: &[ProgressKey]) -> Result<BatchGetOutput, ProgressStoreError> {
        self.check_read()?;
        self.inner.batch_get_items(keys).await
    }

    async fn batch_put_items(
        &self,
        items: &[ReplayProgress],
    ) -> Result<Vec<ReplayProgress>, ProgressStoreError> {
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

fn kinds(count: usize) -> Vec<Kind> {
    (0..count)
        .map(|i| Kind::new(format!("kind-{:03}", i)).unwrap())
        .collect()
}

fn catalog_for(kinds: &[Kind], records_per_kind: usize) -> Arc<InMemoryRecordCatalog> {
    let mut catalog = InMemoryRecordCatalog::new();
    for kind in kinds {
        catalog = catalog.with_generated_records(kind, records_per_kind);
    }
    Arc::new(catalog)
}

fn topic() -> TopicName {
    TopicName::new("replay-work").unwrap()
}

fn replay_id() -> ReplayId {
    ReplayId::new("replay-1").unwrap()
}

// ============================================================================
// create_batches
// ============================================================================

#[test]
fn test_create_batches_preserves_order_and_sizes() {
    let items: Vec<u32> = (0..125).collect();

    let batches = create_batches(&items, 50);

    assert_eq!(batches.len(), 3);
    assert_eq!(batches[0].len(), 50);
    assert_eq!(batches[1].len(), 50);
    assert_eq!(batches[2].len(), 25);
    assert_eq!(batches.concat(), items);
}

#[test]
fn test_create_batches_edge_cases() {
    assert!(create_batches::<u32>(&[], 50).is_empty());
    assert_eq!(create_batches(&[1, 2, 3], 3), vec![vec![1, 2, 3]]);
    assert_eq!(create_batches(&[1, 2], 10), vec![vec![1, 2]]);
    assert_eq!(create_batches(&[1, 2], 0), vec![vec![1], vec![2]]);

    for n in 1..8 {
        let items: Vec<usize> = (0..20).collect();
        let batches = create_batches(&items, n);
        assert_eq!(batches.len(), items.len().div_ceil(n));
        assert!(batches[..batches.len() - 1].iter().all(|b| b.len() == n));
    }
}

// ============================================================================
// dispatch
// ============================================================================

#[tokio::test]
async fn test_dispatch_publishes_one_call_per_batch() {
    let all = kinds(7);
    let store = ProgressStore::new(Arc::new(InMemoryProgressBackend::new()));
    let publisher = Arc::new(InMemoryPublisher::new());
    let dispatcher = BatchDispatcher::new(store.clone(), catalog_for(&all, 2), publisher.clone(), topic(), 3);

    let summary = dispatcher
        .dispatch(&replay_id(), ReplayOperation::Replay, &all, &RequestHeaders::new())
        .await;

    assert!(summary.is_success());
    assert_eq!(summary.batches, 3);
    assert_eq!(summary.published_items, 7);
    assert_eq!(publisher.publish_call_count(&topic()), 3);

    let items: Vec<WorkItem> = publisher
        .published(&topic())
        .iter()
        .map(|m| m.json().unwrap())
        .collect();
    let dispatched: Vec<Kind> = items.iter().map(|i| i.kind.clone()).collect();
    assert_eq!(dispatched, all);
}

#[tokio::test]
async fn test_dispatch_creates_rows_with_live_counts() {
    let all = kinds(2);
    let store = ProgressStore::new(Arc::new(InMemoryProgressBackend::new()));
    let dispatcher = BatchDispatcher::new(
        store.clone(),
        catalog_for(&all, 4),
        Arc::new(InMemoryPublisher::new()),
        topic(),
        50,
    );

    dispatcher
        .dispatch(&replay_id(), ReplayOperation::Reindex, &all, &RequestHeaders::new())
        .await;

    let rows = store.list_by_replay_id(&replay_id()).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.state == ReplayState::Queued));
    assert!(rows.iter().all(|r| r.total_records == 4));
    assert!(rows.iter().all(|r| r.operation == ReplayOperation::Reindex));
}

#[tokio::test]
async fn test_item_correlation_ids_count_across_batches() {
    let all = kinds(3);
    let publisher = Arc::new(InMemoryPublisher::new());
    let dispatcher = BatchDispatcher::new(
        ProgressStore::new(Arc::new(InMemoryProgressBackend::new())),
        catalog_for(&all, 1),
        publisher.clone(),
        topic(),
        2,
    );
    let headers = RequestHeaders::new()
        .with("Correlation-Id", "abc")
        .with("data-partition-id", "opendes");

    dispatcher
        .dispatch(&replay_id(), ReplayOperation::Replay, &all, &headers)
        .await;

    let published = publisher.published(&topic());
    let ids: Vec<String> = published
        .iter()
        .map(|m| m.json::<WorkItem>().unwrap())
        .map(|item| item.headers.correlation_id().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["abc_kind_0_SEQ_0", "abc_kind_1_SEQ_0", "abc_kind_2_SEQ_0"]);
    assert_eq!(
        published[0].attributes.get("data-partition-id").map(String::as_str),
        Some("opendes")
    );
    assert_eq!(
        published[0].attributes.get("operation").map(String::as_str),
        Some("replay")
    );
}

#[tokio::test]
async fn test_failed_batch_does_not_stop_later_batches() {
    let all = kinds(5);
    let store = ProgressStore::new(Arc::new(InMemoryProgressBackend::new()));
    let publisher = Arc::new(FlakyPublisher::new(vec![0]));
    let dispatcher = BatchDispatcher::new(store.clone(), catalog_for(&all, 1), publisher.clone(), topic(), 2);

    let summary = dispatcher
        .dispatch(&replay_id(), ReplayOperation::Replay, &all, &RequestHeaders::new())
        .await;

    assert_eq!(summary.batches, 3);
    assert_eq!(summary.failed_batches, 1);
    assert_eq!(summary.published_items, 3);
    assert_eq!(summary.failed_kinds, all[..2].to_vec());
    assert_eq!(publisher.calls.load(Ordering::SeqCst), 3);

    let failed = store.get(&all[0], &replay_id()).await.unwrap().unwrap();
    assert_eq!(failed.state, ReplayState::Failed);
    let queued = store.get(&all[4], &replay_id()).await.unwrap().unwrap();
    assert_eq!(queued.state, ReplayState::Queued);
}

#[tokio::test]
async fn test_count_failure_marks_batch_failed_without_publishing() {
    let all = kinds(2);
    let store = ProgressStore::new(Arc::new(InMemoryProgressBackend::new()));
    let publisher = Arc::new(FlakyPublisher::new(vec![]));
    let dispatcher = BatchDispatcher::new(
        store.clone(),
        Arc::new(UnavailableDiscovery),
        publisher.clone(),
        topic(),
        50,
    );

    let summary = dispatcher
        .dispatch(&replay_id(), ReplayOperation::Replay, &all, &RequestHeaders::new())
        .await;

    assert_eq!(summary.failed_batches, 1);
    assert_eq!(publisher.calls.load(Ordering::SeqCst), 0);
    let rows = store.list_by_replay_id(&replay_id()).await.unwrap();
    assert!(rows.iter().all(|r| r.state == ReplayState::Failed));
}

#[tokio::test]
async fn test_update_record_counts_keeps_state_and_cursor() {
    let all = kinds(2);
    let store = ProgressStore::new(Arc::new(InMemoryProgressBackend::new()));
    let mut failed = ReplayProgress::queued(all[0].clone(), replay_id(), ReplayOperation::Replay, 1);
    failed.begin_processing();
    failed.checkpoint(3, Some("next".to_string()));
    failed.fail();
    let mut completed = ReplayProgress::queued(all[1].clone(), replay_id(), ReplayOperation::Replay, 2);
    completed.complete();
    store.batch_save(&[failed, completed.clone()]).await;
    let dispatcher = BatchDispatcher::new(
        store.clone(),
        catalog_for(&all, 10),
        Arc::new(InMemoryPublisher::new()),
        topic(),
        50,
    );

    let report = dispatcher
        .update_record_counts(&replay_id(), ReplayOperation::Replay, &all, &RequestHeaders::new())
        .await
        .unwrap();

    assert_eq!(report.saved, 1);
    let resumed = store.get(&all[0], &replay_id()).await.unwrap().unwrap();
    assert_eq!(resumed.state, ReplayState::Failed);
    assert_eq!(resumed.total_records, 10);
    assert_eq!(resumed.last_cursor.as_deref(), Some("next"));
    let untouched = store.get(&all[1], &replay_id()).await.unwrap().unwrap();
    assert_eq!(untouched, completed);
}

#[tokio::test]
async fn test_dispatch_of_no_kinds_publishes_nothing() {
    let publisher = Arc::new(InMemoryPublisher::new());
    let dispatcher = BatchDispatcher::new(
        ProgressStore::new(Arc::new(InMemoryProgressBackend::new())),
        Arc::new(InMemoryRecordCatalog::new()),
        publisher.clone(),
        topic(),
        50,
    );

    let summary = dispatcher
        .dispatch(&replay_id(), ReplayOperation::Replay, &[], &RequestHeaders::new())
        .await;

    assert_eq!(summary, DispatchSummary::default());
    assert_eq!(publisher.publish_call_count(&topic()), 0);
}

#[tokio::test]
async fn test_unreadable_rows_are_not_overwritten_by_count_update() {
    let all = kinds(2);
    let backend = Arc::new(ReadFailingBackend::new());
    let store = ProgressStore::new(backend.clone());
    let mut completed = ReplayProgress::queued(all[0].clone(), replay_id(), ReplayOperation::Replay, 10);
    completed.begin_processing();
    completed.checkpoint(10, None);
    completed.complete();
    store.save(&completed).await.unwrap();
    backend.fail_reads();
    let dispatcher = BatchDispatcher::new(
        store.clone(),
        catalog_for(&all, 3),
        Arc::new(InMemoryPublisher::new()),
        topic(),
        50,
    );

    let summary = dispatcher
        .dispatch(&replay_id(), ReplayOperation::Replay, &all, &RequestHeaders::new())
        .await;

    assert!(summary.is_success());
    let rows = backend.inner.query_by_replay_id(&replay_id()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].state, ReplayState::Completed);
    assert_eq!(rows[0].processed_records, 10);
    assert_eq!(rows[0], completed);
}

#[tokio::test]
async fn test_unreadable_rows_are_not_overwritten_when_batch_fails() {
    let all = kinds(2);
    let backend = Arc::new(ReadFailingBackend::new());
    let store = ProgressStore::new(backend.clone());
    let mut completed = ReplayProgress::queued(all[0].clone(), replay_id(), ReplayOperation::Replay, 10);
    completed.begin_processing();
    completed.checkpoint(10, None);
    completed.complete();
    let mut failed = ReplayProgress::queued(all[1].clone(), replay_id(), ReplayOperation::Replay, 10);
    failed.begin_processing();
    failed.checkpoint(4, Some("resume-here".to_string()));
    failed.fail();
    store.batch_save(&[completed.clone(), failed.clone()]).await;
    backend.fail_reads();
    let dispatcher = BatchDispatcher::new(
        store.clone(),
        catalog_for(&all, 10),
        Arc::new(FlakyPublisher::new(vec![0])),
        topic(),
        50,
    );

    let summary = dispatcher
        .dispatch(&replay_id(), ReplayOperation::Replay, &all, &RequestHeaders::new())
        .await;

    assert_eq!(summary.failed_batches, 1);
    let rows = backend.inner.query_by_replay_id(&replay_id()).await.unwrap();
    let by_kind: HashMap<Kind, ReplayProgress> = rows.into_iter().map(|r| (r.kind.clone(), r)).collect();
    assert_eq!(by_kind[&all[0]], completed);
    assert_eq!(by_kind[&all[1]], failed);
    assert_eq!(by_kind[&all[1]].last_cursor.as_deref(), Some("resume-here"));
}
