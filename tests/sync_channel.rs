//! End-to-end tests for the sync channel: upgrade gating, the three
//! message types and cross-session notification fan-out.

use std::sync::Arc;
use std::time::Duration;

use axum_test::{TestServer, TestWebSocket};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::{json, Value};
use tempfile::TempDir;

use note_station::config::AppConfig;
use note_station::server::{build_state, create_app, create_app_from_state};

async fn test_server() -> (TestServer, TempDir) {
    let dir = TempDir::new().unwrap();
    let mut config = AppConfig::default();
    config.auth.jwt_secret = Some("integration-secret".into());
    config.storage.data_dir = dir.path().join("db").display().to_string();
    config.storage.uploads_dir = dir.path().join("uploads").display().to_string();

    let app = create_app(config).await.unwrap();
    let server = TestServer::builder()
        .http_transport()
        .build(app)
        .unwrap();
    (server, dir)
}

async fn signup(server: &TestServer, username: &str) -> String {
    let response = server
        .post("/api/auth/signup")
        .json(&json!({ "username": username, "password": "hunter2" }))
        .await;
    response.assert_status_ok();
    response.json::<Value>()["token"].as_str().unwrap().to_string()
}

async fn connect(server: &TestServer, token: &str) -> TestWebSocket {
    server
        .get_websocket(&format!("/ws?token={token}"))
        .await
        .into_websocket()
        .await
}

#[tokio::test]
async fn test_upgrade_requires_valid_token() {
    let (server, _dir) = test_server().await;

    let missing = server.get_websocket("/ws").await;
    missing.assert_status_unauthorized();

    let invalid = server.get_websocket("/ws?token=garbage").await;
    invalid.assert_status_unauthorized();
}

#[tokio::test]
async fn test_sync_applies_and_is_visible_over_rest() {
    let (server, _dir) = test_server().await;
    let token = signup(&server, "alice").await;
    let mut channel = connect(&server, &token).await;

    channel
        .send_json(&json!({
            "type": "sync",
            "changes": {
                "notes": [{ "id": 1, "title": "from device A", "updated_at": "2024-01-01T00:00:00.000Z" }]
            }
        }))
        .await;

    let reply: Value = channel.receive_json().await;
    assert_eq!(reply["type"], "sync_response");
    assert_eq!(reply["success"], true);
    // Acknowledged server time is a unix-milliseconds number.
    assert!(reply["timestamp"].as_i64().is_some_and(|t| t > 1_600_000_000_000));

    let list: Vec<Value> = server
        .get("/api/notes")
        .authorization_bearer(&token)
        .await
        .json();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["title"], "from device A");
}

#[tokio::test]
async fn test_failed_batch_rolls_back_but_keeps_prior_state() {
    let (server, _dir) = test_server().await;
    let token = signup(&server, "alice").await;
    let mut channel = connect(&server, &token).await;

    channel
        .send_json(&json!({
            "type": "sync",
            "changes": { "notes": [{ "id": 1, "title": "kept" }] }
        }))
        .await;
    let reply: Value = channel.receive_json().await;
    assert_eq!(reply["success"], true);

    channel
        .send_json(&json!({
            "type": "sync",
            "changes": {
                "notes": [{ "id": 2, "title": "lost" }],
                "not_a_table": [{ "id": 1 }]
            }
        }))
        .await;
    let reply: Value = channel.receive_json().await;
    assert_eq!(reply["type"], "sync_response");
    assert_eq!(reply["success"], false);
    assert!(reply["error"].as_str().unwrap().contains("not_a_table"));

    let list: Vec<Value> = server
        .get("/api/notes")
        .authorization_bearer(&token)
        .await
        .json();
    let ids: Vec<i64> = list.iter().map(|n| n["id"].as_i64().unwrap()).collect();
    assert_eq!(ids, vec![1]);
}

#[tokio::test]
async fn test_save_then_load_round_trip() {
    let (server, _dir) = test_server().await;
    let token = signup(&server, "alice").await;
    let mut channel = connect(&server, &token).await;

    let image = BASE64.encode(b"full-database-image");
    channel
        .send_json(&json!({ "type": "save", "data": image }))
        .await;
    let reply: Value = channel.receive_json().await;
    assert_eq!(reply["type"], "save_response");
    assert_eq!(reply["success"], true);

    channel.send_json(&json!({ "type": "load" })).await;
    let reply: Value = channel.receive_json().await;
    assert_eq!(reply["type"], "load_response");
    assert_eq!(reply["success"], true);
    assert_eq!(reply["data"], image);
}

#[tokio::test]
async fn test_load_before_any_save_reports_not_found() {
    let (server, _dir) = test_server().await;
    let token = signup(&server, "carol").await;
    let mut channel = connect(&server, &token).await;

    channel.send_json(&json!({ "type": "load" })).await;
    let reply: Value = channel.receive_json().await;
    assert_eq!(reply["type"], "load_response");
    assert_eq!(reply["success"], false);
    assert_eq!(reply["error"], "No database file found");
}

#[tokio::test]
async fn test_unrecognized_message_gets_error_reply() {
    let (server, _dir) = test_server().await;
    let token = signup(&server, "alice").await;
    let mut channel = connect(&server, &token).await;

    channel.send_json(&json!({ "type": "self_destruct" })).await;
    let reply: Value = channel.receive_json().await;
    assert_eq!(reply["type"], "error");
    assert!(reply["message"].as_str().unwrap().contains("self_destruct"));
}

#[tokio::test]
async fn test_silent_channel_is_closed_and_deregistered() {
    let dir = TempDir::new().unwrap();
    let mut config = AppConfig::default();
    config.auth.jwt_secret = Some("integration-secret".into());
    config.storage.data_dir = dir.path().join("db").display().to_string();
    config.storage.uploads_dir = dir.path().join("uploads").display().to_string();
    config.sync.heartbeat_secs = 1;

    let state = build_state(config).await.unwrap();
    let channels = Arc::clone(&state.channels);
    let server = TestServer::builder()
        .http_transport()
        .build(create_app_from_state(state))
        .unwrap();

    let token = signup(&server, "mallory").await;
    let _channel = connect(&server, &token).await;
    assert!(wait_until(|| channels.len() == 1).await);

    // The client never reads, so the liveness ping gets no pong; after one
    // missed interval the server closes the channel and deregisters it.
    assert!(wait_until(|| channels.is_empty()).await);
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}

#[tokio::test]
async fn test_share_notifies_target_users_live_channel() {
    let (server, _dir) = test_server().await;
    let alice = signup(&server, "alice").await;
    let bob = signup(&server, "bob").await;

    let mut bobs_channel = connect(&server, &bob).await;

    server
        .post("/api/notes")
        .authorization_bearer(&alice)
        .json(&json!({ "id": 3, "title": "Roadmap" }))
        .await
        .assert_status_ok();
    server
        .post("/api/notes/3/share")
        .authorization_bearer(&alice)
        .json(&json!({ "username": "bob" }))
        .await
        .assert_status_ok();

    let notification: Value = bobs_channel.receive_json().await;
    assert_eq!(notification["type"], "note_shared");
    assert_eq!(notification["from"], "alice");
    assert_eq!(notification["title"], "Roadmap");
}
