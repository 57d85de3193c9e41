//! End-to-end tests: requests submitted over HTTP run through the
//! dispatcher with mocked fetch, package and publish stages.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use cadenza_core::{NoticeKind, RequestStatus};
use cadenza_server::api::WsMessage;
use common::{fixtures, TestConfig, TestFixture};

#[tokio::test]
async fn test_full_request_completes_with_link() {
    let fixture = TestFixture::with_config(TestConfig::with_dispatcher()).await;
    let id = fixture.submit(1, &fixtures::album_url(1)).await;

    let done = fixture.wait_for_status(id, RequestStatus::Completed).await;
    assert_eq!(done.published_url.as_deref(), Some("https://gofile.io/d/mock-1"));
    assert!(!done.is_active);

    let response = fixture.get(&format!("/api/v1/requests/{}", id)).await;
    assert_eq!(response.body["status"], "completed");
    assert_eq!(response.body["published_url"], "https://gofile.io/d/mock-1");

    let kinds = fixture.notifier.kinds_for(id).await;
    assert_eq!(kinds.first(), Some(&NoticeKind::Started));
    assert_eq!(
        kinds.last(),
        Some(&NoticeKind::Completed {
            url: "https://gofile.io/d/mock-1".to_string()
        })
    );
}

#[tokio::test]
async fn test_fetch_failure_marks_request_failed() {
    let fixture = TestFixture::with_config(TestConfig::with_dispatcher()).await;
    let url = fixtures::album_url(2);
    fixture.fetcher.fail_url(&url, Some(1), "auth error").await;

    let id = fixture.submit(1, &url).await;
    let failed = fixture.wait_for_status(id, RequestStatus::Failed).await;

    let message = failed.error_message.unwrap();
    assert!(message.contains("auth error"), "{}", message);
    assert!(failed.published_url.is_none());
    assert!(fixture.publisher.recorded_publishes().await.is_empty());
}

#[tokio::test]
async fn test_partial_selection_reaches_fetcher() {
    let fixture = TestFixture::with_config(TestConfig::with_dispatcher()).await;
    fixture
        .fetcher
        .set_listing(Some(cadenza_core::testing::sample_listing(12)))
        .await;

    fixture
        .post(
            "/api/v1/selections",
            json!({ "user_id": 3, "chat_id": 30, "url": fixtures::album_url(3) }),
        )
        .await;
    let reply = fixture
        .post("/api/v1/selections/3/reply", json!({ "text": "3,5,11" }))
        .await;
    assert_status!(reply, StatusCode::CREATED);
    let id = reply.body["id"].as_i64().unwrap();

    fixture.wait_for_status(id, RequestStatus::Completed).await;

    let fetches = fixture.fetcher.recorded_fetches().await;
    assert_eq!(fetches.len(), 1);
    assert_eq!(fetches[0].descriptor.as_deref(), Some("3,5,11"));
}

#[tokio::test]
async fn test_cancel_while_processing() {
    let fixture = TestFixture::with_config(TestConfig::with_dispatcher()).await;
    fixture.fetcher.pause().await;

    let id = fixture.submit(1, &fixtures::album_url(4)).await;
    fixture.wait_for_status(id, RequestStatus::Processing).await;

    let response = fixture
        .delete(&format!("/api/v1/requests/{}?user_id=1", id))
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["status"], "cancelled");

    fixture.fetcher.resume();

    // The pipeline may run to the end but must not overwrite the cancel.
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    let record = fixture.request_store.get(id).unwrap().unwrap();
    assert_eq!(record.status, RequestStatus::Cancelled);
    assert!(record.published_url.is_none());
}

#[tokio::test]
async fn test_dispatcher_status_and_control() {
    let fixture = TestFixture::new().await;

    let status = fixture.get("/api/v1/dispatcher/status").await;
    assert_status!(status, StatusCode::OK);
    assert_eq!(status.body["running"], false);
    assert_eq!(status.body["max_concurrent"], 2);

    let id = fixture.submit(1, &fixtures::album_url(5)).await;
    let queued = fixture.get("/api/v1/dispatcher/status").await;
    assert_eq!(queued.body["queued"], 1);

    let mut updates = fixture.ws_broadcaster.subscribe();
    let started = fixture.post_empty("/api/v1/dispatcher/start").await;
    assert_status!(started, StatusCode::OK);
    // Pipeline notices may interleave with the status broadcast.
    loop {
        match updates.recv().await.unwrap() {
            WsMessage::DispatcherStatus { running } => {
                assert!(running);
                break;
            }
            WsMessage::RequestNotice(notice) => assert_eq!(notice.request_id, id),
            WsMessage::Heartbeat { .. } => {}
        }
    }

    fixture.wait_for_status(id, RequestStatus::Completed).await;

    let stopped = fixture.post_empty("/api/v1/dispatcher/stop").await;
    assert_status!(stopped, StatusCode::OK);
    let status = fixture.get("/api/v1/dispatcher/status").await;
    assert_eq!(status.body["running"], false);

    // Stopped dispatcher leaves new work queued
    let later = fixture.submit(1, &fixtures::album_url(6)).await;
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    let record = fixture.request_store.get(later).unwrap().unwrap();
    assert_eq!(record.status, RequestStatus::Queued);
}

#[tokio::test]
async fn test_backlog_respects_ceiling() {
    let fixture = TestFixture::with_config(TestConfig {
        start_dispatcher: true,
        max_concurrent: 1,
    })
    .await;
    fixture
        .fetcher
        .set_delay(std::time::Duration::from_millis(30))
        .await;

    let mut ids = Vec::new();
    for n in 0..4 {
        ids.push(fixture.submit(1, &fixtures::album_url(10 + n)).await);
    }
    for id in &ids {
        fixture.wait_for_status(*id, RequestStatus::Completed).await;
    }

    assert_eq!(fixture.fetcher.max_active(), 1);
    let fetched: Vec<String> = fixture
        .fetcher
        .recorded_fetches()
        .await
        .into_iter()
        .map(|f| f.url)
        .collect();
    let expected: Vec<String> = (0..4).map(|n| fixtures::album_url(10 + n)).collect();
    assert_eq!(fetched, expected);
}
