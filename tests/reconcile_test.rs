//! Back-sync reconciliation tests against a mocked remote API.

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;
use treehole_mirror::api::RemoteClient;
use treehole_mirror::config::Config;
use treehole_mirror::db::{
    get_post, get_reply, insert_post, insert_reply, Database, NewPost, NewReply,
};
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

fn engine_for(server: &MockServer, db: Database) -> Arc<SyncEngine> {
    let config = Config {
        source_url: server.uri(),
        ..Config::for_testing()
    };
    let client = RemoteClient::new(&config).expect("Failed to build client");
    Arc::new(SyncEngine::new(&config, client, db))
}

fn local_post(external_id: &str, author_id: &str) -> NewPost {
    NewPost {
        external_id: external_id.to_string(),
        title: "local draft".to_string(),
        content: "written locally".to_string(),
        author: "local-user".to_string(),
        author_id: author_id.to_string(),
        ip: "127.0.0.1".to_string(),
        like_count: 0,
        view_count: 2,
        reply_count: 0,
        radio_group: "radio40".to_string(),
        campus_group: "2".to_string(),
        region: "0".to_string(),
        images: "[]".to_string(),
        cover: "[]".to_string(),
        state: "normal".to_string(),
        tag: String::new(),
        created_at: "2024-05-01T12:30:00+00:00".to_string(),
    }
}

fn local_reply(post_id: i64, external_id: &str, author_id: &str, parent_id: i64) -> NewReply {
    NewReply {
        post_id,
        external_id: external_id.to_string(),
        content: "local comment".to_string(),
        author: "local-user".to_string(),
        author_id: author_id.to_string(),
        reply_to: String::new(),
        level: if parent_id > 0 { 2 } else { 1 },
        parent_id,
        like_count: 0,
        images: "[]".to_string(),
        tag: String::new(),
        created_at: "2024-05-01T12:31:00+00:00".to_string(),
    }
}

async fn mock_submit_post(server: &MockServer, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path("/addtask"))
        .respond_with(ResponseTemplate::new(200))
        .expect(expected_calls)
        .mount(server)
        .await;
}

async fn mock_submit_comment(server: &MockServer, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path("/addcomment"))
        .respond_with(ResponseTemplate::new(200))
        .expect(expected_calls)
        .mount(server)
        .await;
}

async fn mock_latest_post_by_author(server: &MockServer, author_id: &str, remote_id: i64) {
    Mock::given(method("GET"))
        .and(path("/gettaskbyOpenId"))
        .and(query_param("openid", author_id))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "taskList": [{ "id": remote_id }],
            "commentList": []
        })))
        .mount(server)
        .await;
}

async fn mock_latest_comment_by_author(server: &MockServer, author_id: &str, remote_id: i64) {
    Mock::given(method("GET"))
        .and(path("/getCommentByOpenid"))
        .and(query_param("openid", author_id))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "taskList": [],
            "commentList": [{ "id": remote_id }]
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_post_reconciliation_adopts_remote_id() {
    let (db, _temp_dir) = setup_db().await;
    let server = MockServer::start().await;

    mock_submit_post(&server, 1).await;
    mock_latest_post_by_author(&server, "auth-1", 77).await;

    let post_id = insert_post(db.pool(), &local_post("0", "auth-1")).await.unwrap();

    let engine = engine_for(&server, db.clone());
    engine.reconcile_post(post_id).await.expect("reconcile failed");

    let post = get_post(db.pool(), post_id).await.unwrap().unwrap();
    assert_eq!(post.external_id, "77");
    assert!(post.deleted_at.is_none());
}

#[tokio::test]
async fn test_post_reconciliation_collapses_duplicate() {
    let (db, _temp_dir) = setup_db().await;
    let server = MockServer::start().await;

    mock_submit_post(&server, 1).await;
    mock_latest_post_by_author(&server, "auth-1", 77).await;

    // Ingestion already mirrored remote post 77 before reconciliation ran.
    let ingested_id = insert_post(db.pool(), &local_post("77", "auth-1")).await.unwrap();
    let draft_id = insert_post(db.pool(), &local_post("0", "auth-1")).await.unwrap();

    let engine = engine_for(&server, db.clone());
    engine.reconcile_post(draft_id).await.expect("reconcile failed");

    // The mirrored row survives, the local draft is soft-deleted.
    let ingested = get_post(db.pool(), ingested_id).await.unwrap().unwrap();
    assert!(ingested.deleted_at.is_none());

    let draft = get_post(db.pool(), draft_id).await.unwrap().unwrap();
    assert!(draft.deleted_at.is_some());
    assert_eq!(draft.external_id, "0");
}

#[tokio::test]
async fn test_already_synced_post_is_left_alone() {
    let (db, _temp_dir) = setup_db().await;
    let server = MockServer::start().await;

    // No submission may happen at all.
    mock_submit_post(&server, 0).await;

    let post_id = insert_post(db.pool(), &local_post("123", "auth-1")).await.unwrap();

    let engine = engine_for(&server, db.clone());
    engine.reconcile_post(post_id).await.expect("reconcile failed");

    let post = get_post(db.pool(), post_id).await.unwrap().unwrap();
    assert_eq!(post.external_id, "123");
}

#[tokio::test]
async fn test_reply_reconciliation_adopts_remote_id() {
    let (db, _temp_dir) = setup_db().await;
    let server = MockServer::start().await;

    mock_submit_comment(&server, 1).await;
    mock_latest_comment_by_author(&server, "auth-2", 501).await;

    let post_id = insert_post(db.pool(), &local_post("88", "auth-1")).await.unwrap();
    let reply_id = insert_reply(db.pool(), &local_reply(post_id, "0", "auth-2", 0))
        .await
        .unwrap();

    let engine = engine_for(&server, db.clone());
    engine.reconcile_reply(reply_id).await.expect("reconcile failed");

    let reply = get_reply(db.pool(), reply_id).await.unwrap().unwrap();
    assert_eq!(reply.external_id, "501");
}

#[tokio::test]
async fn test_reply_with_unreconciled_parent_is_skipped() {
    let (db, _temp_dir) = setup_db().await;
    let server = MockServer::start().await;

    // The child must not be submitted with a wrong/absent parent reference.
    mock_submit_comment(&server, 0).await;

    let post_id = insert_post(db.pool(), &local_post("88", "auth-1")).await.unwrap();
    let parent_id = insert_reply(db.pool(), &local_reply(post_id, "0", "auth-2", 0))
        .await
        .unwrap();
    let child_id = insert_reply(db.pool(), &local_reply(post_id, "0", "auth-3", parent_id))
        .await
        .unwrap();

    let engine = engine_for(&server, db.clone());
    engine.reconcile_reply(child_id).await.expect("skip should not error");

    let child = get_reply(db.pool(), child_id).await.unwrap().unwrap();
    assert_eq!(child.external_id, "0");
}

#[tokio::test]
async fn test_reply_on_unreconciled_post_is_skipped() {
    let (db, _temp_dir) = setup_db().await;
    let server = MockServer::start().await;

    mock_submit_comment(&server, 0).await;

    let post_id = insert_post(db.pool(), &local_post("0", "auth-1")).await.unwrap();
    let reply_id = insert_reply(db.pool(), &local_reply(post_id, "0", "auth-2", 0))
        .await
        .unwrap();

    let engine = engine_for(&server, db.clone());
    engine.reconcile_reply(reply_id).await.expect("skip should not error");

    let reply = get_reply(db.pool(), reply_id).await.unwrap().unwrap();
    assert_eq!(reply.external_id, "0");
}

#[tokio::test]
async fn test_reply_reconciliation_collapses_duplicate() {
    let (db, _temp_dir) = setup_db().await;
    let server = MockServer::start().await;

    mock_submit_comment(&server, 1).await;
    mock_latest_comment_by_author(&server, "auth-2", 501).await;

    let post_id = insert_post(db.pool(), &local_post("88", "auth-1")).await.unwrap();
    // Ingestion already pulled comment 501 from the remote feed.
    let ingested_id = insert_reply(db.pool(), &local_reply(post_id, "501", "auth-2", 0))
        .await
        .unwrap();
    let draft_id = insert_reply(db.pool(), &local_reply(post_id, "0", "auth-2", 0))
        .await
        .unwrap();

    let engine = engine_for(&server, db.clone());
    engine.reconcile_reply(draft_id).await.expect("reconcile failed");

    let ingested = get_reply(db.pool(), ingested_id).await.unwrap().unwrap();
    assert!(ingested.deleted_at.is_none());

    let draft = get_reply(db.pool(), draft_id).await.unwrap().unwrap();
    assert!(draft.deleted_at.is_some());
}

#[tokio::test]
async fn test_reconciliation_failure_does_not_touch_local_row() {
    let (db, _temp_dir) = setup_db().await;
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/addtask"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let post_id = insert_post(db.pool(), &local_post("0", "auth-1")).await.unwrap();

    let engine = engine_for(&server, db.clone());
    let result = engine.reconcile_post(post_id).await;
    assert!(result.is_err());

    // The local write stays the user-visible outcome.
    let post = get_post(db.pool(), post_id).await.unwrap().unwrap();
    assert_eq!(post.external_id, "0");
    assert!(post.deleted_at.is_none());
}
