//! API integration tests
//!
//! These tests require the full stack (server + Neo4j) to be running with
//! password auth enabled. Run with: cargo test --test api_tests

use digest_chat::chat::types::{CreateSessionRequest, ServerFrame};
use digest_chat::client::{ApiClient, ChatSessionClient, ClientError, SessionUpdate};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

fn base_url() -> String {
    std::env::var("DIGEST_SERVER_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
}

/// Health body if the API is reachable
async fn health() -> Option<Value> {
    let resp = Client::new()
        .get(format!("{}/health", base_url()))
        .timeout(Duration::from_secs(2))
        .send()
        .await
        .ok()?;
    if !resp.status().is_success() {
        return None;
    }
    resp.json().await.ok()
}

/// True if the API is up with password auth, so accounts can be created
async fn password_auth_available() -> bool {
    match health().await {
        Some(body) => body["auth"] == "password",
        None => {
            eprintln!("Skipping test: API not available at {}", base_url());
            false
        }
    }
}

/// A fresh account, logged in
async fn signed_up_client() -> ApiClient {
    let api = ApiClient::new(&base_url()).unwrap();
    let email = format!("it-{}@example.com", &Uuid::new_v4().simple().to_string()[..12]);
    api.signup(&email, "integration-password", "Integration Test")
        .await
        .unwrap();
    api
}

#[tokio::test]
async fn test_health_endpoint() {
    let Some(body) = health().await else {
        eprintln!("Skipping test: API not available at {}", base_url());
        return;
    };
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
    assert_eq!(body["store"], "connected");
}

#[tokio::test]
async fn test_signup_me_and_duplicate() {
    if !password_auth_available().await {
        return;
    }

    let api = signed_up_client().await;
    let me = api.me().await.unwrap();
    assert_eq!(me.name, "Integration Test");

    let again = ApiClient::new(&base_url()).unwrap();
    let err = again
        .signup(&me.email, "integration-password", "Someone Else")
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Api { status: 409, .. }));

    let login = ApiClient::new(&base_url()).unwrap();
    let auth = login.login(&me.email, "integration-password").await.unwrap();
    assert_eq!(auth.user.id, me.id);
}

#[tokio::test]
async fn test_refresh_token_is_single_use() {
    if !password_auth_available().await {
        return;
    }

    let api = signed_up_client().await;
    let original = api.credentials().await.unwrap();

    let client = Client::new();
    let resp = client
        .post(format!("{}/auth/refresh", base_url()))
        .json(&serde_json::json!({"refresh_token": original.refresh_token}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let rotated: Value = resp.json().await.unwrap();
    assert_ne!(rotated["refresh_token"], original.refresh_token.as_str());

    let replay = client
        .post(format!("{}/auth/refresh", base_url()))
        .json(&serde_json::json!({"refresh_token": original.refresh_token}))
        .send()
        .await
        .unwrap();
    assert_eq!(replay.status(), 401);
}

#[tokio::test]
async fn test_logout_revokes_refresh_token() {
    if !password_auth_available().await {
        return;
    }

    let api = signed_up_client().await;
    let refresh_token = api.credentials().await.unwrap().refresh_token;
    api.logout(false).await.unwrap();
    assert!(api.credentials().await.is_none());

    let resp = Client::new()
        .post(format!("{}/auth/refresh", base_url()))
        .json(&serde_json::json!({"refresh_token": refresh_token}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    if !password_auth_available().await {
        return;
    }

    for path in ["/digests", "/articles", "/chat/sessions", "/feeds", "/auth/me"] {
        let resp = Client::new()
            .get(format!("{}{}", base_url(), path))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 401, "{} should require a token", path);
    }
}

#[tokio::test]
async fn test_new_account_has_no_digests() {
    if !password_auth_available().await {
        return;
    }

    let api = signed_up_client().await;
    let page = api.list_digests(10, 0).await.unwrap();
    assert_eq!(page.total, 0);
    assert!(!page.has_more);
}

#[tokio::test]
async fn test_chat_session_stream() {
    if !password_auth_available().await {
        return;
    }

    let api = signed_up_client().await;
    let created = api
        .create_session(&CreateSessionRequest::default())
        .await
        .unwrap();
    assert_eq!(created.stream_url, format!("/chat/ws/{}", created.session_id));

    let client = ChatSessionClient::connect(&api, created.session_id)
        .await
        .unwrap();
    let mut updates = client.subscribe();
    client.send_message("What is in the news today?").await.unwrap();

    // Without an upstream API key the server answers with an error frame
    let outcome = tokio::time::timeout(Duration::from_secs(90), async {
        loop {
            match updates.recv().await {
                Ok(SessionUpdate::Frame(frame @ ServerFrame::MessageComplete { .. }))
                | Ok(SessionUpdate::Frame(frame @ ServerFrame::Error { .. })) => return frame,
                Ok(_) => continue,
                Err(e) => panic!("update channel closed: {e}"),
            }
        }
    })
    .await
    .expect("reply within timeout");

    let transcript = api.load_transcript(created.session_id).await.unwrap();
    match outcome {
        ServerFrame::MessageComplete { .. } => assert_eq!(transcript.len(), 2),
        _ => assert_eq!(transcript.len(), 1),
    }
    client.disconnect().await;
    api.delete_session(created.session_id).await.unwrap();
}
