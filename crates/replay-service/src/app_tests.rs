//! Tests for service wiring.

use super::*;
use crate::config::StorageConfig;
use replay_core::{Kind, ReplayRequest, ReplayState, RequestHeaders};
use std::io::Write;
use tempfile::{NamedTempFile, TempDir};

fn catalog_file() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"[
            {{"id": "w1", "kind": "well", "version": 1}},
            {{"id": "w2", "kind": "well", "version": 2, "modifyUser": "bob"}},
            {{"id": "w3", "kind": "well", "version": 1}},
            {{"id": "b1", "kind": "wellbore", "version": 4}}
        ]"#
    )
    .unwrap();
    file
}

fn config(catalog: &NamedTempFile) -> ServiceConfig {
    let mut config = ServiceConfig {
        catalog_path: Some(catalog.path().to_path_buf()),
        ..Default::default()
    };
    config.replay.page_size = 2;
    config.consumer.wait_time_secs = 0;
    config
}

#[tokio::test]
async fn test_replay_runs_to_completion_in_process() {
    let catalog = catalog_file();
    let app = ReplayApp::build(&config(&catalog)).await.unwrap();

    let submission = app
        .coordinator()
        .submit(
            ReplayRequest::new("replay").with_kinds(["well", "wellbore"]),
            &RequestHeaders::new().with("data-partition-id", "opendes"),
        )
        .await
        .unwrap();
    let status = app.drive_to_completion(submission).await.unwrap();

    assert_eq!(status.overall_state, ReplayState::Completed);
    assert_eq!(status.total_records, 4);
    assert_eq!(status.processed_records, 4);
    assert!(status.per_kind_status.iter().all(|k| k.last_cursor.is_none()));

    let topic = replay_transport::TopicName::new("records-changed").unwrap();
    // well: 2 pages, wellbore: 1 page
    assert_eq!(app.publisher().publish_call_count(&topic), 3);
    assert!(app.publisher().published(&topic).is_empty());
}

#[tokio::test]
async fn test_full_discovery_replay_completes_every_kind() {
    let catalog = catalog_file();
    let app = ReplayApp::build(&config(&catalog)).await.unwrap();

    let submission = app
        .coordinator()
        .submit(ReplayRequest::new("reindex"), &RequestHeaders::new())
        .await
        .unwrap();
    let status = app.drive_to_completion(submission).await.unwrap();

    assert_eq!(status.overall_state, ReplayState::Completed);
    let kinds: Vec<&Kind> = status.per_kind_status.iter().map(|p| &p.kind).collect();
    assert_eq!(kinds.len(), 2);
    assert!(kinds.iter().all(|k| !k.is_system()));
}

#[tokio::test]
async fn test_filesystem_progress_survives_rebuild() {
    let catalog = catalog_file();
    let dir = TempDir::new().unwrap();
    let mut config = config(&catalog);
    config.storage = StorageConfig {
        backend: StorageBackend::Filesystem,
        path: Some(dir.path().to_path_buf()),
    };

    let app = ReplayApp::build(&config).await.unwrap();
    let submission = app
        .coordinator()
        .submit(
            ReplayRequest::new("replay").with_replay_id("persisted").with_kinds(["wellbore"]),
            &RequestHeaders::new(),
        )
        .await
        .unwrap();
    app.drive_to_completion(submission).await.unwrap();
    drop(app);

    let rebuilt = ReplayApp::build(&config).await.unwrap();
    let status = rebuilt
        .status()
        .get_status(&"persisted".parse().unwrap())
        .await
        .unwrap();
    assert_eq!(status.overall_state, ReplayState::Completed);
}

#[tokio::test]
async fn test_missing_catalog_file_is_an_io_error() {
    let config = ServiceConfig {
        catalog_path: Some("/nonexistent/catalog.json".into()),
        ..Default::default()
    };

    let err = ReplayApp::build(&config).await.err().unwrap();

    assert!(matches!(err, ServiceError::Io { .. }));
}
