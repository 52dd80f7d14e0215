//! HTTP surface tests: a real listener, a scripted chat model, and
//! reqwest as the client: auth flows, chat + SSE streaming, artifact
//! reads, and error statuses.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::{Value, json};

use artifactflow_agent::{MockChatModel, MockReply, SharedChatModel};
use artifactflow_server::{ServerConfig, SharedState, auth, build_state, router};
use artifactflow_store::{Database, UserRole};

fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        database_url: ":memory:".into(),
        jwt_secret: "test-secret".into(),
        jwt_expiry_days: 1,
        max_concurrent_tasks: 4,
        stream_timeout: Duration::from_secs(30),
        stream_ttl: Duration::from_secs(30),
        sse_ping_interval: Duration::from_secs(10),
        cors_origins: vec!["*".into()],
        debug: true,
        model: "mock-model".into(),
        anthropic_api_key: String::new(),
    }
}

async fn spawn_server(replies: Vec<MockReply>) -> (String, SharedState) {
    let db = Database::open_in_memory().unwrap();
    db.run_migrations().await.unwrap();

    let model: SharedChatModel = Arc::new(MockChatModel::new(replies));
    let state = build_state(test_config(), db, model);
    let app = router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), state)
}

/// Seed a user directly through the store and return a login token.
async fn seed_and_login(
    base: &str,
    state: &SharedState,
    username: &str,
    password: &str,
    role: UserRole,
) -> String {
    let hash = auth::hash_password(password).unwrap();
    state.users.create(username, &hash, role).await.unwrap();

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{base}/api/v1/auth/login"))
        .json(&json!({"username": username, "password": password}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    body["access_token"].as_str().unwrap().to_string()
}

/// Read a full SSE stream into `(event_name, payload)` frames.
async fn read_sse(base: &str, token: &str, stream_url: &str) -> Vec<(String, Value)> {
    let client = reqwest::Client::new();
    let response = client
        .get(format!("{base}{stream_url}"))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(
        response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    let mut raw = String::new();
    let mut byte_stream = response.bytes_stream();
    while let Some(chunk) = byte_stream.next().await {
        raw.push_str(std::str::from_utf8(&chunk.unwrap()).unwrap());
    }

    let mut frames = Vec::new();
    for block in raw.split("\n\n") {
        let mut event_name = None;
        let mut data = None;
        for line in block.lines() {
            if let Some(name) = line.strip_prefix("event: ") {
                event_name = Some(name.to_string());
            } else if let Some(payload) = line.strip_prefix("data: ") {
                data = serde_json::from_str(payload).ok();
            }
        }
        if let (Some(name), Some(payload)) = (event_name, data) {
            frames.push((name, payload));
        }
    }
    frames
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_needs_no_auth() {
    let (base, _state) = spawn_server(vec![]).await;
    let response = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn login_rejects_bad_credentials() {
    let (base, state) = spawn_server(vec![]).await;
    let hash = auth::hash_password("correct-password").unwrap();
    state
        .users
        .create("alice", &hash, UserRole::User)
        .await
        .unwrap();

    let client = reqwest::Client::new();
    for (username, password) in [("alice", "wrong"), ("nobody", "whatever")] {
        let response = client
            .post(format!("{base}/api/v1/auth/login"))
            .json(&json!({"username": username, "password": password}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 401);
    }
}

#[tokio::test]
async fn deactivated_user_cannot_login() {
    let (base, state) = spawn_server(vec![]).await;
    let hash = auth::hash_password("password123").unwrap();
    let user = state
        .users
        .create("gone", &hash, UserRole::User)
        .await
        .unwrap();
    state.users.deactivate(&user.id).await.unwrap();

    let response = reqwest::Client::new()
        .post(format!("{base}/api/v1/auth/login"))
        .json(&json!({"username": "gone", "password": "password123"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn me_requires_valid_token() {
    let (base, state) = spawn_server(vec![]).await;
    let token = seed_and_login(&base, &state, "alice", "password123", UserRole::User).await;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("{base}/api/v1/auth/me"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["username"], "alice");
    assert_eq!(body["role"], "user");

    let response = client
        .get(format!("{base}/api/v1/auth/me"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let response = client
        .get(format!("{base}/api/v1/auth/me"))
        .bearer_auth("garbage-token")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn user_management_is_admin_only() {
    let (base, state) = spawn_server(vec![]).await;
    let admin = seed_and_login(&base, &state, "root", "password123", UserRole::Admin).await;
    let plain = seed_and_login(&base, &state, "pleb", "password123", UserRole::User).await;

    let client = reqwest::Client::new();

    // Non-admin denied.
    let response = client
        .post(format!("{base}/api/v1/auth/users"))
        .bearer_auth(&plain)
        .json(&json!({"username": "new", "password": "password123"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);

    // Admin creates a user.
    let response = client
        .post(format!("{base}/api/v1/auth/users"))
        .bearer_auth(&admin)
        .json(&json!({"username": "new", "password": "password123", "role": "user"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let created: Value = response.json().await.unwrap();
    let new_id = created["id"].as_str().unwrap().to_string();

    // Duplicate username is a 409.
    let response = client
        .post(format!("{base}/api/v1/auth/users"))
        .bearer_auth(&admin)
        .json(&json!({"username": "new", "password": "password123"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);

    // Short password is a 400.
    let response = client
        .post(format!("{base}/api/v1/auth/users"))
        .bearer_auth(&admin)
        .json(&json!({"username": "other", "password": "short"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // List shows all three accounts.
    let response = client
        .get(format!("{base}/api/v1/auth/users"))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    let users: Value = response.json().await.unwrap();
    assert_eq!(users.as_array().unwrap().len(), 3);

    // Deactivate the new user.
    let response = client
        .put(format!("{base}/api/v1/auth/users/{new_id}"))
        .bearer_auth(&admin)
        .json(&json!({"active": false}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let updated: Value = response.json().await.unwrap();
    assert_eq!(updated["active"], false);
}

// ---------------------------------------------------------------------------
// Chat + SSE
// ---------------------------------------------------------------------------

#[tokio::test]
async fn chat_roundtrip_over_sse() {
    let (base, state) = spawn_server(vec![MockReply::text("Hi from the lead.")]).await;
    let token = seed_and_login(&base, &state, "alice", "password123", UserRole::User).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{base}/api/v1/chat"))
        .bearer_auth(&token)
        .json(&json!({"content": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    let conversation_id = body["conversation_id"].as_str().unwrap().to_string();
    let stream_url = body["stream_url"].as_str().unwrap().to_string();
    assert!(stream_url.contains(body["run_id"].as_str().unwrap()));

    let frames = read_sse(&base, &token, &stream_url).await;
    let names: Vec<&str> = frames.iter().map(|(n, _)| n.as_str()).collect();

    assert_eq!(names.first().copied(), Some("metadata"));
    assert!(names.contains(&"agent_start"));
    assert!(names.contains(&"llm_chunk"));
    assert!(names.contains(&"agent_complete"));
    assert_eq!(names.last().copied(), Some("complete"));

    let (_, complete) = frames.last().unwrap();
    assert_eq!(complete["interrupted"], false);
    assert_eq!(complete["response"], "Hi from the lead.");

    // The conversation now shows the persisted response.
    let response = client
        .get(format!("{base}/api/v1/chat/{conversation_id}"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let detail: Value = response.json().await.unwrap();
    let messages = detail["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["response"], "Hi from the lead.");
    assert_eq!(detail["session_id"], conversation_id.as_str());

    // The listing includes it.
    let response = client
        .get(format!("{base}/api/v1/chat"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let listing: Value = response.json().await.unwrap();
    assert_eq!(listing["conversations"].as_array().unwrap().len(), 1);
    assert_eq!(listing["has_more"], false);
}

#[tokio::test]
async fn chat_requires_auth_and_content() {
    let (base, state) = spawn_server(vec![]).await;
    let token = seed_and_login(&base, &state, "alice", "password123", UserRole::User).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{base}/api/v1/chat"))
        .json(&json!({"content": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let response = client
        .post(format!("{base}/api/v1/chat"))
        .bearer_auth(&token)
        .json(&json!({"content": "   "}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn resume_validates_ownership() {
    let (base, state) = spawn_server(vec![MockReply::text("done")]).await;
    let token = seed_and_login(&base, &state, "alice", "password123", UserRole::User).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{base}/api/v1/chat"))
        .bearer_auth(&token)
        .json(&json!({"content": "hi"}))
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    let conversation_id = body["conversation_id"].as_str().unwrap();
    let message_id = body["message_id"].as_str().unwrap();
    let stream_url = body["stream_url"].as_str().unwrap();

    // Let the run finish.
    read_sse(&base, &token, stream_url).await;

    // The completed run has nothing to resume; ownership fails closed.
    let response = client
        .post(format!("{base}/api/v1/chat/{conversation_id}/resume"))
        .bearer_auth(&token)
        .json(&json!({
            "run_id": "run-bogus",
            "message_id": message_id,
            "approved": true,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);

    // Unknown message is a 404.
    let response = client
        .post(format!("{base}/api/v1/chat/{conversation_id}/resume"))
        .bearer_auth(&token)
        .json(&json!({
            "run_id": "run-bogus",
            "message_id": "msg-ghost",
            "approved": true,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn delete_conversation_cascades() {
    let (base, state) = spawn_server(vec![MockReply::text("bye")]).await;
    let token = seed_and_login(&base, &state, "alice", "password123", UserRole::User).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{base}/api/v1/chat"))
        .bearer_auth(&token)
        .json(&json!({"content": "hi"}))
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    let conversation_id = body["conversation_id"].as_str().unwrap();
    read_sse(&base, &token, body["stream_url"].as_str().unwrap()).await;

    let response = client
        .delete(format!("{base}/api/v1/chat/{conversation_id}"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let response = client
        .get(format!("{base}/api/v1/chat/{conversation_id}"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn artifact_endpoints_expose_versions() {
    let (base, state) = spawn_server(vec![
        MockReply::text(
            "<tool_call><name>create_artifact</name><params>\
             <id>report</id><content_type>markdown</content_type>\
             <title><![CDATA[Report]]></title>\
             <content><![CDATA[draft one]]></content>\
             </params></tool_call>",
        ),
        MockReply::text(
            "<tool_call><name>rewrite_artifact</name><params>\
             <id>report</id>\
             <content><![CDATA[draft two]]></content>\
             <lock_version>1</lock_version>\
             </params></tool_call>",
        ),
        MockReply::text("Report written."),
    ])
    .await;
    let token = seed_and_login(&base, &state, "alice", "password123", UserRole::User).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{base}/api/v1/chat"))
        .bearer_auth(&token)
        .json(&json!({"content": "write a report"}))
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    let session_id = body["conversation_id"].as_str().unwrap().to_string();
    read_sse(&base, &token, body["stream_url"].as_str().unwrap()).await;

    // Listing.
    let response = client
        .get(format!("{base}/api/v1/artifacts/{session_id}"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let listing: Value = response.json().await.unwrap();
    assert_eq!(listing.as_array().unwrap().len(), 1);
    assert_eq!(listing[0]["id"], "report");

    // Current content.
    let response = client
        .get(format!("{base}/api/v1/artifacts/{session_id}/report"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let artifact: Value = response.json().await.unwrap();
    assert_eq!(artifact["content"], "draft two");
    assert_eq!(artifact["version"], 2);

    // History.
    let response = client
        .get(format!(
            "{base}/api/v1/artifacts/{session_id}/report/versions"
        ))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let versions: Value = response.json().await.unwrap();
    assert_eq!(versions.as_array().unwrap().len(), 2);
    assert_eq!(versions[0]["update_type"], "create");
    assert_eq!(versions[1]["update_type"], "rewrite");

    // A specific version.
    let response = client
        .get(format!(
            "{base}/api/v1/artifacts/{session_id}/report/versions/1"
        ))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let v1: Value = response.json().await.unwrap();
    assert_eq!(v1["content"], "draft one");

    // Missing artifact is a 404.
    let response = client
        .get(format!("{base}/api/v1/artifacts/{session_id}/ghost"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn unknown_stream_is_404() {
    let (base, state) = spawn_server(vec![]).await;
    let token = seed_and_login(&base, &state, "alice", "password123", UserRole::User).await;

    let response = reqwest::Client::new()
        .get(format!("{base}/api/v1/stream/run-ghost"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}
