//! E2E tests for storage statistics

mod common;

use common::{TestServer, media};
use scrapevault::data::ThumbnailEntry;
use serde_json::Value;

async fn seed(server: &TestServer) {
    let mut shared = media("v3", "bob", "TikTok", 300);
    shared.thumbnail_url = Some("https://cdn.example.com/v1.jpg".to_string());
    let mut without = media("v4", "bob", "TikTok", 400);
    without.thumbnail_url = None;

    server
        .seed_media(&[
            media("v1", "alice", "TikTok", 100),
            media("v2", "alice", "TikTok", 200),
            shared,
            without,
        ])
        .await;

    let far_future = scrapevault::data::now_millis() + 3_600_000;
    server
        .state
        .db
        .put_thumbnail(&ThumbnailEntry::image(
            "https://cdn.example.com/v1.jpg",
            vec![7; 64],
            "image/jpeg",
            far_future,
        ))
        .await
        .unwrap();
    server
        .state
        .db
        .put_thumbnail(&ThumbnailEntry::failed("https://cdn.example.com/gone.jpg", far_future))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_fast_snapshot_classifies_thumbnails() {
    let server = TestServer::new().await;
    seed(&server).await;

    let response = server
        .client
        .get(&server.url("/api/stats?force=true"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let usage: Value = response.json().await.unwrap();
    assert_eq!(usage["totalVideos"], 4);
    assert_eq!(usage["totalUsers"], 2);
    assert_eq!(usage["totalThumbnails"], 2);
    assert_eq!(usage["cachedThumbnails"], 1);
    assert_eq!(usage["orphanedThumbnails"], 1);
    assert_eq!(usage["invalidThumbnails"], 1);
    // v2 is referenced but never cached
    assert_eq!(usage["missingThumbnails"], 1);
    assert_eq!(usage["duplicateThumbnails"], 1);
    assert_eq!(usage["lastScraped"], 400);
    // Tie at two records each goes to the first seen
    assert_eq!(usage["topUserByCount"]["userId"], "alice");
}

#[tokio::test]
async fn test_detailed_totals_are_merged() {
    let server = TestServer::new().await;
    seed(&server).await;

    let response = server
        .client
        .post(&server.url("/api/stats/detailed"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let detailed: Value = response.json().await.unwrap();
    let total = detailed["totalBytes"].as_u64().unwrap();
    assert_eq!(
        total,
        detailed["mediaBytes"].as_u64().unwrap() + detailed["thumbnailBytes"].as_u64().unwrap()
    );

    let usage: Value = server
        .client
        .get(&server.url("/api/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(usage["totalBytes"].as_u64(), Some(total));
    assert_eq!(usage["detailedPending"], false);

    let progress: Value = server
        .client
        .get(&server.url("/api/stats/progress"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(progress["state"], "complete");
}

#[tokio::test]
async fn test_first_snapshot_requests_detailed_in_background() {
    let server = TestServer::new().await;
    seed(&server).await;

    let usage: Value = server
        .client
        .get(&server.url("/api/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(usage["detailedPending"], true);
    assert!(usage["totalBytes"].is_null());

    let mut merged = false;
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let usage: Value = server
            .client
            .get(&server.url("/api/stats"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if usage["detailedPending"] == false {
            assert!(usage["totalBytes"].as_u64().unwrap() > 0);
            merged = true;
            break;
        }
    }
    assert!(merged, "background detailed statistics never landed");
}
