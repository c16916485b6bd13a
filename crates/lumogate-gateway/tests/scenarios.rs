//! End-to-end coverage of the literal request/response scenarios the
//! gateway's HTTP surface is specified against: a `wiremock` server stands
//! in for the upstream encrypted chat backend, and the full Axum router is
//! driven directly via `tower::ServiceExt::oneshot` (no real TCP port).

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use lumogate_core::config::GatewayConfig;
use lumogate_gateway::app::{build_router, AppState};

const API_KEY: &str = "test-api-key";

async fn state_against(mock: &MockServer) -> Arc<AppState> {
    let mut config = GatewayConfig::default();
    config.upstream.base_url = mock.uri();
    config.auth.api_key = API_KEY.to_string();
    Arc::new(AppState::new(config))
}

fn post(path: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {API_KEY}"))
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

/// One SSE `data:` frame, as the upstream wire format renders it.
fn sse_frame(frame: Value) -> String {
    format!("data: {}\n\n", frame)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Scenario 1: non-streaming chat completions against a mock upstream that
/// emits one `message` token then `done`.
#[tokio::test]
async fn non_streaming_chat_completions_returns_the_collected_message() {
    let mock = MockServer::start().await;
    let upstream_body = format!(
        "{}{}",
        sse_frame(json!({"type": "token_data", "target": "message", "content": "Hi"})),
        sse_frame(json!({"type": "done"})),
    );
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(upstream_body).insert_header("content-type", "text/event-stream"))
        .mount(&mock)
        .await;

    let state = state_against(&mock).await;
    let router = build_router(state);

    let req = post(
        "/v1/chat/completions",
        json!({
            "model": "lumo",
            "stream": false,
            "messages": [{"role": "user", "content": "Hello"}],
        }),
    );
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_json(resp).await;
    assert_eq!(body["choices"][0]["message"]["content"], "Hi");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
}

/// Scenario 2: the same request with `stream:true` — SSE body carries a
/// content delta chunk, a `finish_reason: "stop"` chunk, and terminates
/// with the literal `data: [DONE]`.
#[tokio::test]
async fn streaming_chat_completions_emits_deltas_then_done() {
    let mock = MockServer::start().await;
    let upstream_body = format!(
        "{}{}",
        sse_frame(json!({"type": "token_data", "target": "message", "content": "Hi"})),
        sse_frame(json!({"type": "done"})),
    );
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(upstream_body).insert_header("content-type", "text/event-stream"))
        .mount(&mock)
        .await;

    let state = state_against(&mock).await;
    let router = build_router(state);

    let req = post(
        "/v1/chat/completions",
        json!({
            "model": "lumo",
            "stream": true,
            "messages": [{"role": "user", "content": "Hello"}],
        }),
    );
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let text = body_text(resp).await;
    let has_content_delta = text.lines().any(|line| {
        line.strip_prefix("data: ")
            .and_then(|data| serde_json::from_str::<Value>(data).ok())
            .map(|v| v["choices"][0]["delta"]["content"] == "Hi")
            .unwrap_or(false)
    });
    assert!(has_content_delta, "expected an SSE chunk with delta.content == \"Hi\", got: {text}");

    let has_finish_reason = text.lines().any(|line| {
        line.strip_prefix("data: ")
            .and_then(|data| serde_json::from_str::<Value>(data).ok())
            .map(|v| v["choices"][0]["finish_reason"] == "stop")
            .unwrap_or(false)
    });
    assert!(has_finish_reason, "expected an SSE chunk with finish_reason == \"stop\", got: {text}");

    assert!(text.trim_end().ends_with("data: [DONE]"), "expected the stream to terminate with data: [DONE], got: {text}");
}

/// Scenario 3: a custom-tools request whose upstream message carries a
/// fenced tool call; the detector must recover it and the wrapping
/// ` ```json ` fence must not leak into `message.content`.
#[tokio::test]
async fn custom_tools_request_recovers_a_fenced_tool_call() {
    let mock = MockServer::start().await;
    let fenced = "```json\n{\"name\":\"search\",\"arguments\":{\"q\":\"x\"}}\n```\n";
    let upstream_body = format!(
        "{}{}",
        sse_frame(json!({"type": "token_data", "target": "message", "content": fenced})),
        sse_frame(json!({"type": "done"})),
    );
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(upstream_body).insert_header("content-type", "text/event-stream"))
        .mount(&mock)
        .await;

    let state = state_against(&mock).await;
    let router = build_router(state);

    let req = post(
        "/v1/chat/completions",
        json!({
            "model": "lumo",
            "stream": false,
            "messages": [{"role": "user", "content": "search for x"}],
            "tools": [{"type": "function", "function": {"name": "search", "parameters": {}}}],
        }),
    );
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_json(resp).await;
    assert_eq!(body["choices"][0]["finish_reason"], "tool_calls");
    assert_eq!(body["choices"][0]["message"]["tool_calls"][0]["function"]["name"], "search");
    let content = body["choices"][0]["message"]["content"].as_str().unwrap_or("");
    assert!(!content.contains("```json"), "message.content leaked the fence marker: {content:?}");
}

/// Scenario 5: the upstream rejects the request outright. Non-streaming
/// callers get a 502 with the literal OpenAI error envelope shape.
#[tokio::test]
async fn rejected_upstream_maps_to_a_502_error_envelope() {
    let mock = MockServer::start().await;
    let upstream_body = sse_frame(json!({"type": "rejected"}));
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(upstream_body).insert_header("content-type", "text/event-stream"))
        .mount(&mock)
        .await;

    let state = state_against(&mock).await;
    let router = build_router(state);

    let req = post(
        "/v1/chat/completions",
        json!({
            "model": "lumo",
            "stream": false,
            "messages": [{"role": "user", "content": "Hello"}],
        }),
    );
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

    let body = body_json(resp).await;
    assert_eq!(body["error"]["type"], "server_error");
    assert_eq!(body["error"]["code"], Value::Null);
    assert_eq!(body["error"]["param"], Value::Null);
}

/// Streaming variant of scenario 5: a single error SSE frame, then the
/// stream closes without a `[DONE]` terminator.
#[tokio::test]
async fn rejected_upstream_emits_one_error_frame_when_streaming() {
    let mock = MockServer::start().await;
    let upstream_body = sse_frame(json!({"type": "rejected"}));
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(upstream_body).insert_header("content-type", "text/event-stream"))
        .mount(&mock)
        .await;

    let state = state_against(&mock).await;
    let router = build_router(state);

    let req = post(
        "/v1/chat/completions",
        json!({
            "model": "lumo",
            "stream": true,
            "messages": [{"role": "user", "content": "Hello"}],
        }),
    );
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let text = body_text(resp).await;
    assert!(!text.contains("data: [DONE]"));
    let frames: Vec<&str> = text.lines().filter(|l| l.starts_with("data: ")).collect();
    assert_eq!(frames.len(), 1, "expected exactly one SSE frame, got: {text}");
    let frame: Value = serde_json::from_str(frames[0].strip_prefix("data: ").unwrap()).unwrap();
    assert_eq!(frame["error"]["type"], "server_error");
}

/// Empty `messages` is rejected locally with a 400 `invalid_request_error`
/// before any upstream call is attempted.
#[tokio::test]
async fn empty_messages_is_rejected_with_400() {
    let mock = MockServer::start().await;
    let state = state_against(&mock).await;
    let router = build_router(state);

    let req = post("/v1/chat/completions", json!({ "model": "lumo", "stream": false, "messages": [] }));
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body = body_json(resp).await;
    assert_eq!(body["error"]["type"], "invalid_request_error");
}

/// A `messages` array with only a system message and no user message is
/// also rejected with a 400, per spec.md §4.3 step 1.
#[tokio::test]
async fn messages_with_no_user_role_is_rejected_with_400() {
    let mock = MockServer::start().await;
    let state = state_against(&mock).await;
    let router = build_router(state);

    let req = post(
        "/v1/chat/completions",
        json!({
            "model": "lumo",
            "stream": false,
            "messages": [{"role": "system", "content": "be terse"}],
        }),
    );
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body = body_json(resp).await;
    assert_eq!(body["error"]["type"], "invalid_request_error");
}

/// Requests without the configured bearer token are rejected before ever
/// reaching the upstream mock.
#[tokio::test]
async fn missing_bearer_token_is_rejected_with_401() {
    let mock = MockServer::start().await;
    let state = state_against(&mock).await;
    let router = build_router(state);

    let req = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::to_vec(&json!({
                "model": "lumo",
                "stream": false,
                "messages": [{"role": "user", "content": "Hello"}],
            }))
            .unwrap(),
        ))
        .unwrap();

    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}
