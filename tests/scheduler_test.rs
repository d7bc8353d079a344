//! Single-run guard tests for the scheduler.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use treehole_mirror::api::RemoteClient;
use treehole_mirror::config::Config;
use treehole_mirror::db::Database;
use treehole_mirror::scheduler::Scheduler;
use treehole_mirror::sync::SyncEngine;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn setup_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.sqlite");
    let db = Database::new(&db_path)
        .await
        .expect("Failed to create database");
    (db, temp_dir)
}

/// Remote that answers the top-of-feed query slowly, with an empty feed.
async fn mock_slow_empty_feed(server: &MockServer) {
    let empty = json!({ "taskList": [], "commentList": [] });
    Mock::given(method("GET"))
        .and(path("/gettaskbyType"))
        .and(query_param("type", "0"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(empty.clone())
                .set_delay(Duration::from_millis(300)),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gettaskbyType"))
        .and(query_param("type", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(empty))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_overlapping_trigger_is_rejected_not_queued() {
    let (db, _temp_dir) = setup_db().await;
    let server = MockServer::start().await;
    mock_slow_empty_feed(&server).await;

    let config = Config {
        source_url: server.uri(),
        ..Config::for_testing()
    };
    let client = RemoteClient::new(&config).unwrap();
    let engine = Arc::new(SyncEngine::new(&config, client, db));
    let scheduler = Arc::new(Scheduler::new(engine, Duration::from_secs(3600)));

    let first = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.trigger().await })
    };

    // Let the first run reach the slow remote call.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(scheduler.is_running());

    let second = scheduler.trigger().await;
    assert!(second.is_err(), "overlapping trigger must be rejected");

    let first = first.await.unwrap().expect("first trigger failed");
    assert!(first.errors.is_empty());
    assert!(!scheduler.is_running());

    // Once the first run finished, a new trigger is accepted again.
    let third = scheduler.trigger().await;
    assert!(third.is_ok());
}
