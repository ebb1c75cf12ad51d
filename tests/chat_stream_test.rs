// Chat streaming: scripted model, real mock MCP servers, SSE over the router.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use serde_json::{Value, json};
use tower::ServiceExt;

use common::{
    ScriptedProvider, body_json, body_string, call, event_types, fast_options, json_request, mock_descriptor,
    sse_payloads, test_app, test_app_with_pool, test_pool,
};
use mcp_chat_backend::bridge::{DEFAULT_FALLBACK_MESSAGE, EventSink, PriorTurn, StreamEvent, TurnInput, TurnStatus};
use mcp_chat_backend::create_router;
use mcp_chat_backend::model::gemini::build_function_declarations;
use mcp_chat_backend::model::{ModelChunk, ModelError};

async fn stream_chat(app: axum::Router, body: Value) -> Vec<String> {
    let resp = app.oneshot(json_request("POST", "/api/chat/stream", body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let content_type = resp.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/event-stream"), "{content_type}");
    sse_payloads(&body_string(resp).await)
}

fn parse(payload: &str) -> Value {
    serde_json::from_str(payload).unwrap()
}

#[tokio::test]
async fn plain_answer_without_tools() {
    let provider = ScriptedProvider::new(vec![vec![Ok(ModelChunk::text("2+2 ")), Ok(ModelChunk::text("is 4"))]]);
    let t = test_app(provider);
    t.state.pool.connect(mock_descriptor("fs1", &[])).await.unwrap();
    let app = create_router(t.state.clone());

    let payloads = stream_chat(app, json!({ "message": "2+2?", "history": [], "enableMCP": false })).await;
    assert_eq!(event_types(&payloads), vec!["text", "text", "[DONE]"]);
    assert_eq!(parse(&payloads[0]), json!({ "type": "text", "text": "2+2 " }));

    // Tools stay hidden from the model when disabled.
    let requests = t.provider.requests().await;
    assert_eq!(requests.len(), 1);
    assert!(requests[0].tools.is_empty());

    let turns = t.store.turns().await;
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].status, TurnStatus::Completed);
    assert_eq!(turns[0].accumulated_text, "2+2 is 4");
    assert_eq!(turns[0].user_text, "2+2?");
    t.state.pool.shutdown().await;
}

#[tokio::test]
async fn tool_call_routes_to_the_advertising_server() {
    let pool = test_pool(fast_options());
    pool.connect(mock_descriptor("A", &["--label", "A", "--tools", "alpha"])).await.unwrap();
    pool.connect(mock_descriptor("B", &["--label", "B", "--tools", "beta"])).await.unwrap();

    let provider = ScriptedProvider::new(vec![
        vec![Ok(ModelChunk::text("Checking. ")), Ok(call("beta", json!({ "q": "x" })))],
        vec![Ok(ModelChunk::text("All done."))],
    ]);
    let t = test_app_with_pool(provider, pool.clone());
    let app = create_router(t.state.clone());

    let payloads = stream_chat(app, json!({ "message": "use beta", "history": [] })).await;
    assert_eq!(
        event_types(&payloads),
        vec!["text", "function_call", "function_response", "text", "[DONE]"]
    );

    let call_event = parse(&payloads[1]);
    assert_eq!(call_event["function"]["name"], "beta");
    assert_eq!(call_event["function"]["arguments"], json!({ "q": "x" }));

    let response_event = parse(&payloads[2]);
    assert_eq!(response_event["function"]["name"], "beta");
    let text = response_event["function"]["response"]["content"][0]["text"].as_str().unwrap();
    assert!(text.starts_with("B/beta:"), "dispatched to the wrong server: {text}");

    let requests = t.provider.requests().await;
    assert_eq!(requests.len(), 2);
    let mut offered: Vec<&str> = requests[0].tools.iter().map(|d| d.name.as_str()).collect();
    offered.sort();
    assert_eq!(offered, vec!["alpha", "beta"]);
    // Schemas reach the model without JSON-Schema meta keys.
    let encoded = build_function_declarations(&requests[0].tools);
    assert!(encoded[0]["parameters"].get("$schema").is_none());
    assert!(encoded[0]["parameters"].get("additionalProperties").is_none());
    assert_eq!(encoded[0]["parameters"]["properties"]["path"]["type"], "string");

    // The follow-up request carries the call and its response.
    let follow_up = &requests[1].contents;
    let last = follow_up.last().unwrap();
    assert_eq!(last.role, "user");
    assert_eq!(last.parts[0]["functionResponse"]["name"], "beta");
    let model_turn = &follow_up[follow_up.len() - 2];
    assert_eq!(model_turn.role, "model");
    assert!(model_turn.parts.iter().any(|p| p.get("functionCall").is_some()));

    let turns = t.store.turns().await;
    assert_eq!(turns[0].status, TurnStatus::Completed);
    assert_eq!(turns[0].function_calls.len(), 1);
    assert_eq!(turns[0].function_responses.len(), 1);
    assert_eq!(turns[0].accumulated_text, "Checking. All done.");
    pool.shutdown().await;
}

#[tokio::test]
async fn failing_tool_reports_error_and_turn_continues() {
    let pool = test_pool(fast_options());
    pool.connect(mock_descriptor("f", &["--tools", "fail"])).await.unwrap();

    let provider = ScriptedProvider::new(vec![
        vec![Ok(call("fail", json!({})))],
        vec![Ok(ModelChunk::text("That tool broke."))],
    ]);
    let t = test_app_with_pool(provider, pool.clone());
    let payloads = stream_chat(create_router(t.state.clone()), json!({ "message": "try it" })).await;

    assert_eq!(event_types(&payloads), vec!["function_call", "function_response", "text", "[DONE]"]);
    let response = parse(&payloads[1]);
    assert!(response["function"]["response"]["error"].as_str().unwrap().contains("tool exploded"));
    assert_eq!(t.store.turns().await[0].status, TurnStatus::Completed);
    pool.shutdown().await;
}

#[tokio::test]
async fn unknown_tool_gets_an_error_response() {
    let provider = ScriptedProvider::new(vec![vec![Ok(call("nobody_has_this", json!({})))], vec![]]);
    let t = test_app(provider);
    let payloads = stream_chat(create_router(t.state.clone()), json!({ "message": "hm" })).await;

    assert_eq!(event_types(&payloads), vec!["function_call", "function_response", "[DONE]"]);
    assert_eq!(
        parse(&payloads[1])["function"]["response"],
        json!({ "error": "Unknown tool: nobody_has_this" })
    );
}

#[tokio::test]
async fn stream_failure_sends_fallback_then_done() {
    let provider = ScriptedProvider::new(vec![vec![
        Ok(ModelChunk::text("partial")),
        Err(ModelError::Stream("connection reset".into())),
    ]]);
    let t = test_app(provider);
    let payloads = stream_chat(create_router(t.state.clone()), json!({ "message": "hello" })).await;

    assert_eq!(event_types(&payloads), vec!["text", "text", "[DONE]"]);
    let fallback = parse(&payloads[1]);
    assert_eq!(fallback["text"], DEFAULT_FALLBACK_MESSAGE);
    assert_eq!(fallback["isStreaming"], false);

    let turns = t.store.turns().await;
    assert_eq!(turns[0].status, TurnStatus::Failed);
    assert!(turns[0].error.as_deref().unwrap().contains("connection reset"));
    assert_eq!(turns[0].accumulated_text, "partial");
}

#[tokio::test]
async fn provider_open_failure_sends_fallback() {
    let t = test_app(ScriptedProvider::failing_on_open());
    let payloads = stream_chat(create_router(t.state.clone()), json!({ "message": "hello" })).await;

    assert_eq!(payloads.len(), 2);
    assert_eq!(parse(&payloads[0])["isStreaming"], false);
    assert_eq!(payloads[1], "[DONE]");
    assert_eq!(t.store.turns().await[0].status, TurnStatus::Failed);
}

#[tokio::test]
async fn empty_message_is_rejected() {
    let t = test_app(ScriptedProvider::default());
    let resp = create_router(t.state.clone())
        .oneshot(json_request("POST", "/api/chat/stream", json!({ "message": "   " })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert_eq!(body["success"], false);
    assert!(t.store.turns().await.is_empty());
}

#[tokio::test]
async fn history_is_forwarded_and_capped() {
    let provider = ScriptedProvider::new(vec![vec![Ok(ModelChunk::text("ok"))]]);
    let t = test_app(provider);
    let history: Vec<Value> = (0..14)
        .map(|i| {
            json!({
                "role": if i % 2 == 0 { "user" } else { "model" },
                "parts": [{ "text": format!("msg {}", i) }]
            })
        })
        .collect();
    stream_chat(create_router(t.state.clone()), json!({ "message": "next", "history": history })).await;

    let contents = &t.provider.requests().await[0].contents;
    // Ten prior turns plus the new message.
    assert_eq!(contents.len(), 11);
    assert_eq!(contents[0].parts[0]["text"], "msg 4");
    assert_eq!(contents.last().unwrap().parts[0]["text"], "next");
}

#[tokio::test]
async fn client_disconnect_cancels_turn() {
    let provider = ScriptedProvider::new(vec![vec![Ok(ModelChunk::text("nobody listens"))]]);
    let t = test_app(provider);

    let (sink, rx) = EventSink::channel(4);
    drop(rx);
    let input = TurnInput {
        user_text: "hi".into(),
        prior_turns: vec![PriorTurn {
            role: "user".into(),
            text: "earlier".into(),
        }],
        tools_enabled: false,
    };
    let turn = t.state.bridge.run(input, sink).await;

    assert_eq!(turn.status, TurnStatus::Cancelled);
    let stored = t.store.turns().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, TurnStatus::Cancelled);
}

#[tokio::test]
async fn disconnect_during_tool_call_ends_turn_without_waiting() {
    let pool = test_pool(fast_options());
    pool.connect(mock_descriptor("slow", &["--tools", "sleep"])).await.unwrap();

    let provider = ScriptedProvider::new(vec![
        vec![Ok(call("sleep", json!({})))],
        vec![Ok(ModelChunk::text("never streamed"))],
    ]);
    let t = test_app_with_pool(provider, pool.clone());

    let (sink, mut rx) = EventSink::channel(8);
    let state = t.state.clone();
    let run = tokio::spawn(async move {
        let input = TurnInput {
            user_text: "nap".into(),
            prior_turns: Vec::new(),
            tools_enabled: true,
        };
        state.bridge.run(input, sink).await
    });

    let first = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
    assert!(matches!(first, Some(StreamEvent::FunctionCall { .. })), "got {first:?}");
    drop(rx);

    // The tool never answers and the request timeout is 5s: finishing well
    // before that means the turn did not wait for the call.
    let started = std::time::Instant::now();
    let turn = tokio::time::timeout(Duration::from_secs(3), run).await.unwrap().unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));

    assert_eq!(turn.status, TurnStatus::Cancelled);
    assert_eq!(turn.function_calls.len(), 1);
    assert!(turn.function_responses.is_empty());
    assert_eq!(t.provider.requests().await.len(), 1);

    let stored = t.store.turns().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, TurnStatus::Cancelled);
    pool.shutdown().await;
}
