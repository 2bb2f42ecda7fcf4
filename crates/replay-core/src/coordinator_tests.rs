//! Tests for the replay coordinator.

use super::*;
use crate::adapters::{InMemoryProgressBackend, InMemoryRecordCatalog};
use crate::audit::TracingAuditSink;
use crate::error::{ProgressStoreError, RecordSourceError};
use crate::progress::{ProgressKey, ReplayState};
use crate::progress_store::{BatchGetOutput, ProgressBackend, StoreLimits};
use crate::records::RecordIdPage;
use crate::work_item::WorkItem;
use async_trait::async_trait;
use replay_transport::{InMemoryPublisher, TopicName};
use std::collections::HashMap;

/// Backend whose writes always fail
struct ReadOnlyBackend;

#[async_trait]
impl ProgressBackend for ReadOnlyBackend {
    async fn get_item(&self, _key: &ProgressKey) -> Result<Option<ReplayProgress>, ProgressStoreError> {
        Ok(None)
    }

    async fn put_item(&self, _progress: &ReplayProgress) -> Result<(), ProgressStoreError> {
        Err(ProgressStoreError::Unavailable {
            message: "read only".to_string(),
        })
    }

    async fn batch_get_items(&self, _keys: &[ProgressKey]) -> Result<BatchGetOutput, ProgressStoreError> {
        Ok(BatchGetOutput::default())
    }

    async fn batch_put_items(
        &self,
        items: &[ReplayProgress],
    ) -> Result<Vec<ReplayProgress>, ProgressStoreError> {
        Ok(items.to_vec())
    }

    async fn query_by_replay_id(
        &self,
        _replay_id: &ReplayId,
    ) -> Result<Vec<ReplayProgress>, ProgressStoreError> {
        Ok(Vec::new())
    }

    fn limits(&self) -> StoreLimits {
        StoreLimits::default()
    }
}

/// Discovery that cannot enumerate kinds
struct BrokenDiscovery;

#[async_trait]
impl RecordDiscovery for BrokenDiscovery {
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
        Ok(HashMap::new())
    }

    async fn count_all_active_records(
        &self,
        _headers: &RequestHeaders,
    ) -> Result<HashMap<Kind, u64>, RecordSourceError> {
        Err(RecordSourceError::Unavailable {
            message: "aggregation failed".to_string(),
        })
    }
}

fn kind(name: &str) -> Kind {
    Kind::new(name).unwrap()
}

fn topic() -> TopicName {
    TopicName::new("replay-work").unwrap()
}

struct Harness {
    coordinator: ReplayCoordinator,
    store: ProgressStore,
    publisher: Arc<InMemoryPublisher>,
}

fn harness_with(backend: Arc<dyn ProgressBackend>, discovery: Arc<dyn RecordDiscovery>) -> Harness {
    let store = ProgressStore::new(backend);
    let publisher = Arc::new(InMemoryPublisher::new());
    let dispatcher = Arc::new(BatchDispatcher::new(
        store.clone(),
        discovery.clone(),
        publisher.clone(),
        topic(),
        2,
    ));
    let coordinator = ReplayCoordinator::new(
        store.clone(),
        discovery,
        dispatcher,
        Arc::new(TracingAuditSink::new()),
        2,
    );
    Harness {
        coordinator,
        store,
        publisher,
    }
}

fn harness() -> Harness {
    let catalog = InMemoryRecordCatalog::new()
        .with_generated_records(&kind("well"), 3)
        .with_generated_records(&kind("wellbore"), 2)
        .with_generated_records(&kind("log"), 1);
    harness_with(Arc::new(InMemoryProgressBackend::new()), Arc::new(catalog))
}

#[tokio::test]
async fn test_submit_with_kinds_writes_queued_rows_before_returning() {
    let h = harness();
    let request = ReplayRequest::new("Replay")
        .with_replay_id("r-1")
        .with_kinds(["well", "wellbore", "well"]);

    let submission = h.coordinator.submit(request, &RequestHeaders::new()).await.unwrap();

    assert_eq!(submission.replay_id.as_str(), "r-1");
    let well = h.store.get(&kind("well"), &submission.replay_id).await.unwrap().unwrap();
    assert_eq!(well.total_records, 3);
    assert_eq!(well.processed_records, 0);

    let summary = submission.dispatch.await.unwrap();
    assert_eq!(summary.published_items, 2);
    assert_eq!(
        h.store
            .list_by_replay_id(&submission.replay_id)
            .await
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test]
async fn test_submit_generates_replay_id_when_blank() {
    let h = harness();
    let request = ReplayRequest::new("reindex")
        .with_replay_id("  ")
        .with_kinds(["log"]);

    let submission = h.coordinator.submit(request, &RequestHeaders::new()).await.unwrap();

    assert!(uuid::Uuid::parse_str(submission.replay_id.as_str()).is_ok());
    submission.dispatch.await.unwrap();
    let items: Vec<WorkItem> = h
        .publisher
        .published(&topic())
        .iter()
        .map(|m| m.json().unwrap())
        .collect();
    assert_eq!(items[0].operation, ReplayOperation::Reindex);
}

#[tokio::test]
async fn test_unknown_operation_is_rejected() {
    let h = harness();

    let err = h
        .coordinator
        .submit(ReplayRequest::new("purge"), &RequestHeaders::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ReplayError::InvalidOperation { .. }));
    assert!(err.is_client_error());
}

#[tokio::test]
async fn test_kinds_without_records_are_rejected_without_writes() {
    let h = harness();
    let request = ReplayRequest::new("replay")
        .with_replay_id("r-2")
        .with_kinds(["well", "unknown"]);

    let err = h.coordinator.submit(request, &RequestHeaders::new()).await.unwrap_err();

    match err {
        ReplayError::KindNotFound { kinds } => assert_eq!(kinds, vec!["unknown"]),
        other => panic!("unexpected error {:?}", other),
    }
    let rows = h
        .store
        .list_by_replay_id(&ReplayId::new("r-2").unwrap())
        .await
        .unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_failed_initial_write_is_surfaced() {
    let catalog = InMemoryRecordCatalog::new().with_generated_records(&kind("well"), 1);
    let h = harness_with(Arc::new(ReadOnlyBackend), Arc::new(catalog));

    let err = h
        .coordinator
        .submit(
            ReplayRequest::new("replay").with_kinds(["well"]),
            &RequestHeaders::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ReplayError::InitialProgressWriteFailed { .. }));
    assert_eq!(h.publisher.publish_call_count(&topic()), 0);

    let err = h
        .coordinator
        .submit(ReplayRequest::new("replay"), &RequestHeaders::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ReplayError::Storage(_)));
}

#[tokio::test]
async fn test_full_discovery_dispatches_every_kind_and_completes_system_row() {
    let h = harness();

    let submission = h
        .coordinator
        .submit(ReplayRequest::new("replay"), &RequestHeaders::new())
        .await
        .unwrap();
    let summary = submission.dispatch.await.unwrap();

    assert_eq!(summary.published_items, 3);
    assert_eq!(summary.batches, 2);
    let rows = h.store.list_by_replay_id(&submission.replay_id).await.unwrap();
    assert_eq!(rows.len(), 4);
    let system = rows.iter().find(|r| r.kind.is_system()).unwrap();
    assert_eq!(system.state, ReplayState::Completed);
    assert_eq!(system.total_records, 6);
}

#[tokio::test]
async fn test_discovery_failure_marks_system_row_failed() {
    let h = harness_with(
        Arc::new(InMemoryProgressBackend::new()),
        Arc::new(BrokenDiscovery),
    );

    let submission = h
        .coordinator
        .submit(ReplayRequest::new("replay"), &RequestHeaders::new())
        .await
        .unwrap();
    let summary = submission.dispatch.await.unwrap();

    assert_eq!(summary, DispatchSummary::default());
    let system = h
        .store
        .get(&Kind::system(), &submission.replay_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(system.state, ReplayState::Failed);
}

#[test]
fn test_request_deserializes_with_defaults() {
    let request: ReplayRequest = serde_json::from_str(r#"{"operation": "replay"}"#).unwrap();

    assert!(request.replay_id.is_none());
    assert!(request.kinds.is_empty());

    let request: ReplayRequest =
        serde_json::from_str(r#"{"replayId": "abc", "operation": "reindex", "kinds": ["a"]}"#)
            .unwrap();
    assert_eq!(request.replay_id.as_deref(), Some("abc"));
    assert_eq!(request.kinds, vec!["a"]);
}
