//! Streamable HTTP transport over real TCP

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use serde_json::{json, Value};

use td_mcp_transport::{
    HttpConfig, HttpTransport, OriginRule, ProtocolEngine, ServerState, SessionContext,
};

const ALLOWED: &str = "https://app.test";
const SESSION: &str = "mcp-session-id";

struct TestEngine;

#[async_trait]
impl ProtocolEngine for TestEngine {
    async fn handle(&self, ctx: SessionContext, message: Value) -> Result<Option<Value>> {
        let Some(id) = message.get("id") else {
            return Ok(None);
        };
        if message["method"] == "notify" {
            ctx.outbound.push(json!({
                "jsonrpc": "2.0",
                "method": "notifications/message",
                "params": message["params"],
            }))?;
        }
        Ok(Some(json!({ "jsonrpc": "2.0", "id": id, "result": {} })))
    }
}

async fn start() -> (HttpTransport, String) {
    let mut config = HttpConfig::new(0);
    config.security.allowed_origins = [OriginRule::parse(ALLOWED).unwrap()].into();
    let transport = HttpTransport::start(config, Arc::new(TestEngine)).await.unwrap();
    let url = format!("http://{}/mcp", transport.local_addr());
    (transport, url)
}

fn initialize() -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": { "clientInfo": { "name": "e2e", "version": "0.0.1" } }
    })
}

async fn handshake(client: &reqwest::Client, url: &str) -> String {
    let response = client
        .post(url)
        .header("origin", ALLOWED)
        .json(&initialize())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    response.headers()[SESSION].to_str().unwrap().to_string()
}

#[tokio::test]
async fn origin_policy_is_enforced_per_exchange() {
    let (transport, url) = start().await;
    let client = reqwest::Client::new();

    let rejected = client
        .post(&url)
        .header("origin", "https://evil.test")
        .json(&initialize())
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::FORBIDDEN);
    assert!(rejected.headers().get(SESSION).is_none());
    assert!(transport.sessions().is_empty());

    let session_id = handshake(&client, &url).await;
    assert_eq!(transport.sessions().len(), 1);

    let without_origin = client
        .post(&url)
        .header(SESSION, &session_id)
        .json(&json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" }))
        .send()
        .await
        .unwrap();
    assert_eq!(without_origin.status(), StatusCode::FORBIDDEN);

    transport.close(Duration::ZERO).await.ok();
}

#[tokio::test]
async fn pushes_arrive_on_the_event_stream() {
    let (transport, url) = start().await;
    let client = reqwest::Client::new();
    let session_id = handshake(&client, &url).await;

    let stream = client
        .get(&url)
        .header("origin", ALLOWED)
        .header(SESSION, &session_id)
        .send()
        .await
        .unwrap();
    assert_eq!(stream.status(), StatusCode::OK);
    let mut body = stream.bytes_stream();

    let response = client
        .post(&url)
        .header("origin", ALLOWED)
        .header(SESSION, &session_id)
        .json(&json!({ "jsonrpc": "2.0", "id": 2, "method": "notify", "params": { "n": 1 } }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let received = tokio::time::timeout(Duration::from_secs(5), async {
        let mut text = String::new();
        while let Some(chunk) = body.next().await {
            text.push_str(&String::from_utf8_lossy(&chunk.unwrap()));
            if text.contains("notifications/message") {
                break;
            }
        }
        text
    })
    .await
    .unwrap();
    assert!(received.contains("event: message"), "{received}");
    assert!(received.contains("id: 1"), "{received}");

    transport.close(Duration::from_secs(1)).await.ok();
}

#[tokio::test]
async fn deleted_session_is_gone() {
    let (transport, url) = start().await;
    let client = reqwest::Client::new();
    let session_id = handshake(&client, &url).await;

    let deleted = client
        .delete(&url)
        .header("origin", ALLOWED)
        .header(SESSION, &session_id)
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::OK);

    let after = client
        .post(&url)
        .header("origin", ALLOWED)
        .header(SESSION, &session_id)
        .json(&json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" }))
        .send()
        .await
        .unwrap();
    assert_eq!(after.status(), StatusCode::NOT_FOUND);
    let body: Value = after.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32001);

    transport.close(Duration::ZERO).await.unwrap();
}

#[tokio::test]
async fn health_check_is_served_alongside_the_endpoint() {
    let (transport, _) = start().await;
    let health: Value = reqwest::get(format!("http://{}/health", transport.local_addr()))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["port"], transport.local_addr().port());

    transport.close(Duration::ZERO).await.unwrap();
}

#[tokio::test]
async fn close_reports_forced_sessions() {
    let (transport, url) = start().await;
    let client = reqwest::Client::new();
    handshake(&client, &url).await;

    let err = transport.close(Duration::ZERO).await.unwrap_err();
    assert_eq!(err.forced, 1);
    assert_eq!(transport.status().state, ServerState::Stopped);
    assert!(transport.sessions().is_empty());
}
