//! E2E tests for collection export, import and clearing

mod common;

use common::{TestServer, media};
use serde_json::{Value, json};

#[tokio::test]
async fn test_export_pages_cover_collection_once() {
    let server = TestServer::new().await;
    let records: Vec<_> = (0..7)
        .map(|i| media(&format!("v{}", i), "alice", "TikTok", i))
        .collect();
    server.seed_media(&records).await;

    let mut ids = Vec::new();
    let mut offset = 0;
    loop {
        let page: Value = server
            .client
            .get(&server.url(&format!("/api/export/media?offset={}&limit=3", offset)))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(page["store"], "media");
        for item in page["items"].as_array().unwrap() {
            ids.push(item["id"].as_str().unwrap().to_string());
        }
        offset = page["nextOffset"].as_u64().unwrap();
        if page["hasMore"] == false {
            break;
        }
    }

    let expected: Vec<String> = (0..7).map(|i| format!("v{}", i)).collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn test_full_dump_imports_into_fresh_server() {
    let source = TestServer::new().await;
    source
        .seed_media(&[
            media("v1", "alice", "TikTok", 1),
            media("v2", "bob", "TikTok", 2),
        ])
        .await;

    let dump: Value = source
        .client
        .get(&source.url("/api/export/media/all"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(dump["type"], "scrapevault-export");
    assert_eq!(dump["items"].as_array().unwrap().len(), 2);

    let target = TestServer::new().await;
    let response = target
        .client
        .post(&target.url("/api/import/media"))
        .json(&dump)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let report: Value = response.json().await.unwrap();
    assert_eq!(report["imported"], 2);

    assert_eq!(
        target.state.db.get_all_media().await.unwrap(),
        source.state.db.get_all_media().await.unwrap()
    );
}

#[tokio::test]
async fn test_import_skip_mode() {
    let server = TestServer::new().await;
    server.seed_media(&[media("v1", "alice", "TikTok", 1)]).await;

    let mut replacement = serde_json::to_value(media("v1", "mallory", "TikTok", 9)).unwrap();
    replacement["title"] = json!("changed");
    let fresh = serde_json::to_value(media("v2", "bob", "TikTok", 2)).unwrap();

    let report: Value = server
        .client
        .post(&server.url("/api/import/media?mode=skip"))
        .json(&json!([replacement, fresh]))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(report["imported"], 1);
    assert_eq!(report["skipped"], 1);
    let kept = server.state.db.get_media("v1").await.unwrap().unwrap();
    assert_eq!(kept.user_id, "alice");
}

#[tokio::test]
async fn test_import_into_wrong_store_is_rejected() {
    let server = TestServer::new().await;

    let response = server
        .client
        .post(&server.url("/api/import/media"))
        .json(&json!({"type": "scrapevault-export", "store": "thumbnails", "items": []}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["kind"], "validation");
}

#[tokio::test]
async fn test_unknown_collection_is_not_found() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(&server.url("/api/export/comments"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_clear_store() {
    let server = TestServer::new().await;
    server
        .seed_media(&[
            media("v1", "alice", "TikTok", 1),
            media("v2", "bob", "TikTok", 2),
        ])
        .await;

    let cleared: Value = server
        .client
        .delete(&server.url("/api/stores/media"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(cleared["deleted"], 2);
    assert_eq!(
        server
            .state
            .db
            .count(scrapevault::data::Collection::Media)
            .await
            .unwrap(),
        0
    );
}
