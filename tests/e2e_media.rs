//! E2E tests for media queries, deletion and the export ledger

mod common;

use common::{TestServer, media};
use serde_json::{Value, json};

async fn seed_alice_and_bob(server: &TestServer) {
    server
        .seed_media(&[
            media("v1", "alice", "TikTok", 100),
            media("v2", "alice", "TikTok", 200),
            media("v3", "bob", "TikTok", 300),
            media("v4", "carol", "Instagram", 400),
        ])
        .await;
}

#[tokio::test]
async fn test_save_then_query_by_user() {
    let server = TestServer::new().await;

    let records = json!([
        {"id": "v1", "userId": "alice", "platform": "TikTok", "originalUrl": "u1", "scrapedAt": 1, "title": "first"},
        {"id": "v2", "userId": "bob", "platform": "TikTok", "originalUrl": "u2", "scrapedAt": 2}
    ]);
    let response = server
        .client
        .post(&server.url("/api/media"))
        .json(&records)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let report: Value = response.json().await.unwrap();
    assert_eq!(report["written"], 2);

    let response = server
        .client
        .post(&server.url("/api/media/query"))
        .json(&json!({"criteria": {"userId": "alice"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let page: Value = response.json().await.unwrap();
    assert_eq!(page["hasMore"], false);
    let items = page["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], "v1");
    // Unknown scraper fields survive the round trip
    assert_eq!(items[0]["title"], "first");
}

#[tokio::test]
async fn test_query_pages_through_matches() {
    let server = TestServer::new().await;
    seed_alice_and_bob(&server).await;

    let mut seen = Vec::new();
    let mut offset = 0;
    loop {
        let page: Value = server
            .client
            .post(&server.url("/api/media/query"))
            .json(&json!({"criteria": {"platform": "TikTok"}, "offset": offset, "limit": 2}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        let items = page["items"].as_array().unwrap();
        offset += items.len();
        seen.extend(items.iter().map(|item| item["id"].as_str().unwrap().to_string()));
        if page["hasMore"] == false {
            break;
        }
    }

    assert_eq!(seen, vec!["v1", "v2", "v3"]);
}

#[tokio::test]
async fn test_count_and_users() {
    let server = TestServer::new().await;
    seed_alice_and_bob(&server).await;

    let count: Value = server
        .client
        .post(&server.url("/api/media/count"))
        .json(&json!({"platform": "TikTok", "startDate": 200}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(count["count"], 2);

    let users: Value = server
        .client
        .post(&server.url("/api/media/users"))
        .json(&json!({"platform": "TikTok", "userId": "bob"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(users["users"], json!(["alice", "bob"]));
}

#[tokio::test]
async fn test_mark_exported_hides_from_new_only() {
    let server = TestServer::new().await;
    seed_alice_and_bob(&server).await;

    // URLS = 2
    let response = server
        .client
        .post(&server.url("/api/media/mark_exported"))
        .json(&json!({"ids": ["v1", "v3", "missing"], "flags": 2}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let marked: Value = response.json().await.unwrap();
    assert_eq!(marked["updated"], 2);

    let page: Value = server
        .client
        .post(&server.url("/api/media/query"))
        .json(&json!({"criteria": {"platform": "ALL", "newOnly": true, "excludeMask": 2}}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let ids: Vec<&str> = page["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["v2", "v4"]);

    // Another channel still sees everything
    let count: Value = server
        .client
        .post(&server.url("/api/media/count"))
        .json(&json!({"newOnly": true, "excludeMask": 16}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(count["count"], 4);
}

#[tokio::test]
async fn test_delete_by_id_and_matching() {
    let server = TestServer::new().await;
    seed_alice_and_bob(&server).await;

    let response = server
        .client
        .delete(&server.url("/api/media/v4"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let response = server
        .client
        .delete(&server.url("/api/media/v4"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    let deleted: Value = server
        .client
        .post(&server.url("/api/media/delete_matching"))
        .json(&json!({"criteria": {"userId": "alice"}, "batchSize": 1}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(deleted["deleted"], 2);

    let deleted: Value = server
        .client
        .post(&server.url("/api/media/delete"))
        .json(&json!({"ids": ["v3", "nope"]}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(deleted["deleted"], 1);

    let count: Value = server
        .client
        .post(&server.url("/api/media/count"))
        .json(&json!({}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(count["count"], 0);
}

#[tokio::test]
async fn test_malformed_record_is_rejected() {
    let server = TestServer::new().await;

    let response = server
        .client
        .post(&server.url("/api/media"))
        .json(&json!([{"id": "v1"}]))
        .send()
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}
