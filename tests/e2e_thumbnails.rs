//! E2E tests for the thumbnail cache and background population

mod common;

use common::{TestServer, media};
use scrapevault::data::{ThumbnailEntry, now_millis};
use serde_json::{Value, json};

/// Nothing listens on port 1, so fetches fail fast without leaving the host
const UNREACHABLE: &str = "http://127.0.0.1:1/thumb.jpg";

#[tokio::test]
async fn test_cached_blob_is_served_with_content_type() {
    let server = TestServer::new().await;
    let url = "https://cdn.example.com/a.jpg";
    server
        .state
        .db
        .put_thumbnail(&ThumbnailEntry::image(url, vec![1, 2, 3, 4], "image/jpeg", now_millis() + 60_000))
        .await
        .unwrap();

    let response = server
        .client
        .get(&server.url("/api/thumbnails"))
        .query(&[("url", url)])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "image/jpeg");
    assert_eq!(response.bytes().await.unwrap().as_ref(), &[1, 2, 3, 4]);
}

#[tokio::test]
async fn test_missing_thumbnail_is_not_found() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(&server.url("/api/thumbnails"))
        .query(&[("url", "https://cdn.example.com/none.jpg")])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_resolve_rejects_non_http_url() {
    let server = TestServer::new().await;

    let resolved: Value = server
        .client
        .post(&server.url("/api/thumbnails/resolve"))
        .json(&json!({"url": "data:image/png;base64,AAAA"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(resolved["outcome"], "invalid");
    assert!(resolved["entry"].is_null());
}

#[tokio::test]
async fn test_failed_fetch_is_negatively_cached() {
    let server = TestServer::new().await;

    let first: Value = server
        .client
        .post(&server.url("/api/thumbnails/resolve"))
        .json(&json!({"url": UNREACHABLE}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(first["outcome"], "fetch_failed");
    assert_eq!(first["entry"]["error"], true);

    let second: Value = server
        .client
        .post(&server.url("/api/thumbnails/resolve"))
        .json(&json!({"url": UNREACHABLE}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(second["outcome"], "negative_hit");

    // Failure entries are never served as images
    let response = server
        .client
        .get(&server.url("/api/thumbnails"))
        .query(&[("url", UNREACHABLE)])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    let response = server
        .client
        .delete(&server.url("/api/thumbnails"))
        .query(&[("url", UNREACHABLE)])
        .send()
        .await
        .unwrap();
    let deleted: Value = response.json().await.unwrap();
    assert_eq!(deleted["deleted"], 1);
}

#[tokio::test]
async fn test_population_runs_to_completion() {
    let server = TestServer::new().await;
    let mut record = media("v1", "alice", "TikTok", 1);
    record.thumbnail_url = Some(UNREACHABLE.to_string());
    server.seed_media(&[record]).await;

    let response = server
        .client
        .post(&server.url("/api/cache/populate"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);

    let mut status = Value::Null;
    for _ in 0..100 {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        status = server
            .client
            .get(&server.url("/api/cache/status"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if status["status"] == "completed" {
            break;
        }
    }

    assert_eq!(status["status"], "completed");
    assert_eq!(status["total"], 1);
    assert_eq!(status["progress"], 1);
    assert_eq!(status["failed"], 1);

    let stop = server
        .client
        .post(&server.url("/api/cache/stop"))
        .send()
        .await
        .unwrap();
    assert_eq!(stop.status(), 204);
}
