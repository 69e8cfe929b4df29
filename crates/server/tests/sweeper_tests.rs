//! End-to-end tests for expiry sweeping through the HTTP surface.

mod common;

use axum::http::StatusCode;
use common::{FlakyDeletes, TOKEN_U1, TestServer, download, json_request, upload};
use satchel_core::ContentId;
use satchel_core::config::SweeperConfig;
use satchel_server::{ExpirySweeper, SweepStats};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use time::{Duration, OffsetDateTime};

fn sweeper_config() -> SweeperConfig {
    SweeperConfig {
        enabled: true,
        batch_size: 10,
        ..SweeperConfig::default()
    }
}

async fn upload_expired(server: &TestServer, name: &str) -> ContentId {
    let (status, body) = upload(&server.router, TOKEN_U1, name, b"expiring soon").await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let id = ContentId::parse(body["content_id"].as_str().unwrap()).unwrap();

    let past = OffsetDateTime::now_utc() - Duration::seconds(1);
    assert!(
        server
            .metadata()
            .set_content_expiry(*id.as_uuid(), Some(past))
            .await
            .unwrap()
    );
    id
}

async fn listed_names(server: &TestServer) -> Vec<String> {
    let (status, body) = json_request(&server.router, "GET", "/v1/files", Some(TOKEN_U1)).await;
    assert_eq!(status, StatusCode::OK);
    body.as_array()
        .unwrap()
        .iter()
        .map(|f| f["original_name"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_expired_content_disappears() {
    let server = TestServer::new().await;
    let expired = upload_expired(&server, "old.txt").await;
    upload(&server.router, TOKEN_U1, "keep.txt", b"still wanted").await;

    let sweeper = ExpirySweeper::new(server.storage(), server.metadata(), sweeper_config());
    let stats = sweeper.run_cycle(OffsetDateTime::now_utc()).await;

    assert_eq!(stats.deleted, 1);
    assert_eq!(stats.errors, 0);
    assert_eq!(listed_names(&server).await, vec!["keep.txt".to_string()]);
    let (status, _, _) = download(&server.router, TOKEN_U1, &expired.to_string()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(server.stored_object_count().await, 1);

    let again = sweeper.run_cycle(OffsetDateTime::now_utc()).await;
    assert_eq!(again, SweepStats::default());
}

#[tokio::test]
async fn test_failed_storage_delete_keeps_record() {
    let server = TestServer::new().await;
    upload_expired(&server, "stuck.txt").await;

    let flaky = Arc::new(FlakyDeletes::new(server.storage()));
    let sweeper = ExpirySweeper::new(flaky.clone(), server.metadata(), sweeper_config());

    let stats = sweeper.run_cycle(OffsetDateTime::now_utc()).await;
    assert_eq!(stats.deleted, 0);
    assert_eq!(stats.errors, 1);
    assert_eq!(server.metadata().count_content().await.unwrap(), 1);
    assert_eq!(server.stored_object_count().await, 1);

    // The next cycle retries once storage recovers.
    flaky.fail_deletes.store(false, Ordering::SeqCst);
    let stats = sweeper.run_cycle(OffsetDateTime::now_utc()).await;
    assert_eq!(stats.deleted, 1);
    assert_eq!(server.metadata().count_content().await.unwrap(), 0);
    assert_eq!(server.stored_object_count().await, 0);
}
