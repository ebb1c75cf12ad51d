// Shared helpers for integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use http_body_util::BodyExt;
use serde_json::Value;
use tokio::sync::Mutex;

use mcp_chat_backend::bridge::BridgeSettings;
use mcp_chat_backend::mcp::client::ClientOptions;
use mcp_chat_backend::mcp::pool::ConnectionPool;
use mcp_chat_backend::mcp::types::{ServerDescriptor, TransportKind};
use mcp_chat_backend::model::{ModelChunk, ModelError, ModelProvider, ModelRequest, ModelStream};
use mcp_chat_backend::state::AppState;
use mcp_chat_backend::store::MemoryTurnStore;

pub const MOCK_SERVER: &str = env!("CARGO_BIN_EXE_mock_mcp_server");

/// Descriptor that launches the crate's mock stdio server.
pub fn mock_descriptor(id: &str, args: &[&str]) -> ServerDescriptor {
    ServerDescriptor {
        id: id.to_string(),
        name: id.to_string(),
        description: None,
        transport: TransportKind::Stdio,
        command: Some(MOCK_SERVER.to_string()),
        args: args.iter().map(|s| s.to_string()).collect(),
        env: HashMap::new(),
        url: None,
        headers: HashMap::new(),
        enabled: true,
    }
}

pub fn fast_options() -> ClientOptions {
    ClientOptions {
        connect_timeout: Duration::from_secs(5),
        request_timeout: Duration::from_secs(5),
    }
}

pub fn test_pool(options: ClientOptions) -> Arc<ConnectionPool> {
    Arc::new(ConnectionPool::new(reqwest::Client::new(), options))
}

// ── Scripted model provider ─────────────────────────────────────────────────

/// Plays back one scripted stream per `stream()` call and records requests.
/// Once the script runs out, further streams are empty.
#[derive(Default)]
pub struct ScriptedProvider {
    rounds: Mutex<VecDeque<Vec<Result<ModelChunk, ModelError>>>>,
    requests: Mutex<Vec<ModelRequest>>,
    fail_open: bool,
}

impl ScriptedProvider {
    pub fn new(rounds: Vec<Vec<Result<ModelChunk, ModelError>>>) -> Self {
        Self {
            rounds: Mutex::new(rounds.into()),
            requests: Mutex::new(Vec::new()),
            fail_open: false,
        }
    }

    pub fn failing_on_open() -> Self {
        Self {
            fail_open: true,
            ..Self::default()
        }
    }

    pub async fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn stream(&self, request: ModelRequest) -> Result<ModelStream, ModelError> {
        self.requests.lock().await.push(request);
        if self.fail_open {
            return Err(ModelError::Api {
                status: 500,
                body: "scripted failure".into(),
            });
        }
        let round = self.rounds.lock().await.pop_front().unwrap_or_default();
        Ok(Box::pin(futures_util::stream::iter(round)))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

pub fn call(name: &str, args: Value) -> ModelChunk {
    let args = args.as_object().cloned().unwrap_or_default();
    ModelChunk {
        text: None,
        function_calls: vec![mcp_chat_backend::model::FunctionCall {
            name: name.to_string(),
            raw_part: serde_json::json!({ "functionCall": { "name": name, "args": args.clone() } }),
            args,
        }],
    }
}

// ── App wiring ──────────────────────────────────────────────────────────────

pub struct TestApp {
    pub state: AppState,
    pub provider: Arc<ScriptedProvider>,
    pub store: Arc<MemoryTurnStore>,
}

pub fn test_app(provider: ScriptedProvider) -> TestApp {
    test_app_with_pool(provider, test_pool(fast_options()))
}

pub fn test_app_with_pool(provider: ScriptedProvider, pool: Arc<ConnectionPool>) -> TestApp {
    let provider = Arc::new(provider);
    let store = Arc::new(MemoryTurnStore::new());
    let state = AppState::from_parts(pool, provider.clone(), store.clone(), BridgeSettings::default());
    TestApp { state, provider, store }
}

// ── HTTP helpers ────────────────────────────────────────────────────────────

pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// Collect a response body into a `serde_json::Value`.
pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_string(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8_lossy(&bytes).to_string()
}

/// Split an SSE body into its `data:` payloads.
pub fn sse_payloads(body: &str) -> Vec<String> {
    body.split("\n\n")
        .filter_map(|block| {
            let data: Vec<&str> = block
                .lines()
                .filter_map(|l| l.strip_prefix("data:"))
                .map(|d| d.strip_prefix(' ').unwrap_or(d))
                .collect();
            (!data.is_empty()).then(|| data.join("\n"))
        })
        .collect()
}

/// Event types in order, with `[DONE]` kept as-is.
pub fn event_types(payloads: &[String]) -> Vec<String> {
    payloads
        .iter()
        .map(|p| {
            if p == "[DONE]" {
                return p.clone();
            }
            let v: Value = serde_json::from_str(p).unwrap();
            v["type"].as_str().unwrap().to_string()
        })
        .collect()
}

/// Wait up to `limit` for `check` to hold.
pub async fn eventually<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check().await
}
