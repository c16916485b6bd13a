//! OpenAI-compatible `/v1/chat/completions` endpoint: the Chat Completions
//! half of the gateway's external surface.

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use lumogate_core::error::GatewayError;
use lumogate_core::types::{Conversation, Message};
use lumogate_toolparse::{ToolCallDetector, ToolDetectorEvent};
use lumogate_upstream::{ChatOptions, UpstreamEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::commands;
use crate::convert;

#[derive(Debug, Deserialize, Clone)]
pub struct OpenAiChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<Value>,
    #[serde(default)]
    pub tool_calls: Option<Vec<Value>>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OpenAiChatRequest {
    pub model: String,
    pub messages: Vec<OpenAiChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub tools: Option<Vec<Value>>,
}

#[derive(Serialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: &'static str,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

#[derive(Serialize)]
pub struct ChunkChoice {
    pub index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<DeltaMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<DeltaMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<&'static str>,
}

#[derive(Serialize, Default)]
pub struct DeltaMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<Value>>,
}

pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OpenAiChatRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    state.metrics.requests_total.inc();

    if req.messages.is_empty() {
        return Err(error_response(&GatewayError::BadRequest("messages must be non-empty".into())));
    }
    if !req.messages.iter().any(|m| m.role == "user") {
        return Err(error_response(&GatewayError::BadRequest("messages must include a user message".into())));
    }

    let conversation_id = if state.config.store.deterministic_conversations {
        req.user.clone().unwrap_or_else(Conversation::generated_id)
    } else {
        Conversation::generated_id()
    };
    state.store.get_or_create(&conversation_id);

    let (messages, mut ctx) = convert::to_internal_messages(&req.messages);
    ctx.has_custom_tools = req.tools.is_some();

    if let Some(command) = ctx.command_context.clone() {
        if let Some(reply) = commands::dispatch(&command, &state, &conversation_id).await {
            return Ok(direct_reply_response(&req.model, req.stream, reply).into_response());
        }
    }

    let turn_index = state.store.get(&conversation_id).map(|c| c.turns.len()).unwrap_or(0);
    let _ = state.store.append_messages(&conversation_id, turn_index, messages);

    let conversation = state
        .store
        .get(&conversation_id)
        .ok_or_else(|| error_response(&GatewayError::Internal("conversation vanished after creation".into())))?;
    let history: Vec<Message> = conversation.all_messages().cloned().collect();
    let turns = convert::to_upstream_turns(&history);
    let instructions = convert::build_instructions(
        &state.config.server.default_instructions,
        &state.config.server.tool_bounce_prologue,
        ctx.has_custom_tools,
        &history,
    );
    ctx.request_title = conversation.wants_title();

    let ticket = state.queue.acquire().await.map_err(|_| error_response(&GatewayError::QueueFull))?;

    let opts = ChatOptions {
        instructions: Some(instructions),
        request_title: ctx.request_title,
        enable_external_tools: state.config.upstream.enable_external_tools,
        ..Default::default()
    };

    let (request_id, rx) = state
        .upstream
        .chat_with_history(&turns, &opts)
        .await
        .map_err(|e| {
            state.metrics.upstream_errors_total.inc();
            error_response(&GatewayError::Upstream(e.to_string()))
        })?;

    info!(conversation_id, request_id, stream = req.stream, "dispatched chat completions turn");

    if req.stream {
        state.metrics.streaming_requests_total.inc();
        Ok(stream_response(state, conversation_id, req.model, rx, ticket).into_response())
    } else {
        Ok(collect_response(state, conversation_id, req.model, rx, ticket).await.into_response())
    }
}

fn error_response(err: &GatewayError) -> (StatusCode, Json<Value>) {
    let status = StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(err.to_openai_body()))
}

fn direct_reply_response(model: &str, stream: bool, reply: String) -> axum::response::Response {
    if stream {
        let id = format!("chatcmpl-{}", Uuid::new_v4());
        let chunk = ChatCompletionChunk {
            id: id.clone(),
            object: "chat.completion.chunk",
            model: model.to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: Some(DeltaMessage { role: Some("assistant"), content: Some(reply), tool_calls: None }),
                message: None,
                finish_reason: Some("stop"),
            }],
        };
        let body = format!(
            "data: {}\n\ndata: [DONE]\n\n",
            serde_json::to_string(&chunk).unwrap_or_default()
        );
        (
            StatusCode::OK,
            [("content-type", "text/event-stream")],
            body,
        )
            .into_response()
    } else {
        Json(serde_json::json!({
            "id": format!("chatcmpl-{}", Uuid::new_v4()),
            "object": "chat.completion",
            "model": model,
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": reply },
                "finish_reason": "stop",
            }],
        }))
        .into_response()
    }
}

fn stream_response(
    state: Arc<AppState>,
    conversation_id: String,
    model: String,
    mut rx: tokio::sync::mpsc::Receiver<UpstreamEvent>,
    ticket: lumogate_queue::QueueTicket,
) -> Sse<impl futures_util::Stream<Item = Result<Event, std::convert::Infallible>>> {
    let id = format!("chatcmpl-{}", Uuid::new_v4());

    let stream = async_stream::stream! {
        let _ticket = ticket;
        let mut detector = ToolCallDetector::new();
        let mut title = String::new();
        let mut tool_calls_emitted = false;

        while let Some(event) = rx.recv().await {
            match event {
                UpstreamEvent::MessageDelta { text } => {
                    for tool_event in detector.push_chunk(&text) {
                        if matches!(tool_event, ToolDetectorEvent::ToolCall(_)) {
                            tool_calls_emitted = true;
                        }
                        if let Some(ev) = emit_tool_event(&id, &model, tool_event, &state) {
                            yield Ok(ev);
                        }
                    }
                }
                UpstreamEvent::TitleDelta { text } => {
                    title.push_str(&text);
                }
                UpstreamEvent::ToolCall { id: call_id, name, arguments } => {
                    let chunk = tool_call_chunk(&id, &model, &call_id, &name, &arguments);
                    yield Ok(Event::default().data(serde_json::to_string(&chunk).unwrap_or_default()));
                    state.metrics.tool_calls_detected_total.inc();
                    tool_calls_emitted = true;
                }
                UpstreamEvent::ToolResult { .. } => {}
                UpstreamEvent::Done => {
                    for tool_event in detector_finalize(&mut detector) {
                        if matches!(tool_event, ToolDetectorEvent::ToolCall(_)) {
                            tool_calls_emitted = true;
                        }
                        if let Some(ev) = emit_tool_event(&id, &model, tool_event, &state) {
                            yield Ok(ev);
                        }
                    }
                    if !title.is_empty() {
                        let _ = state.store.set_title(&conversation_id, convert::postprocess_title(&title));
                    }
                    let chunk = ChatCompletionChunk {
                        id: id.clone(),
                        object: "chat.completion.chunk",
                        model: model.clone(),
                        choices: vec![ChunkChoice {
                            index: 0,
                            delta: Some(DeltaMessage::default()),
                            message: None,
                            finish_reason: Some(if tool_calls_emitted { "tool_calls" } else { "stop" }),
                        }],
                    };
                    yield Ok(Event::default().data(serde_json::to_string(&chunk).unwrap_or_default()));
                    yield Ok(Event::default().data("[DONE]"));
                    break;
                }
                UpstreamEvent::Rejected { kind } => {
                    state.metrics.upstream_errors_total.inc();
                    warn!(kind = %kind, "upstream rejected the request mid-stream");
                    let body = GatewayError::UpstreamRejected { kind }.to_openai_body();
                    yield Ok(Event::default().data(serde_json::to_string(&body).unwrap_or_default()));
                    break;
                }
                UpstreamEvent::Error { message } => {
                    state.metrics.upstream_errors_total.inc();
                    warn!(error = %message, "upstream error mid-stream");
                    let body = GatewayError::Upstream(message).to_openai_body();
                    yield Ok(Event::default().data(serde_json::to_string(&body).unwrap_or_default()));
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// `ToolCallDetector::finalize` consumes `self`; give the stream a fresh
/// detector afterward so a well-behaved `Done` doesn't need the old one.
fn detector_finalize(detector: &mut ToolCallDetector) -> Vec<ToolDetectorEvent> {
    let taken = std::mem::replace(detector, ToolCallDetector::new());
    taken.finalize()
}

fn emit_tool_event(id: &str, model: &str, event: ToolDetectorEvent, _state: &AppState) -> Option<Event> {
    match event {
        ToolDetectorEvent::TextDelta(text) => {
            if text.is_empty() {
                return None;
            }
            let chunk = ChatCompletionChunk {
                id: id.to_string(),
                object: "chat.completion.chunk",
                model: model.to_string(),
                choices: vec![ChunkChoice {
                    index: 0,
                    delta: Some(DeltaMessage { role: Some("assistant"), content: Some(text), tool_calls: None }),
                    message: None,
                    finish_reason: None,
                }],
            };
            Some(Event::default().data(serde_json::to_string(&chunk).unwrap_or_default()))
        }
        ToolDetectorEvent::ToolCall(call) => {
            let chunk = tool_call_chunk(id, model, call.id.as_deref().unwrap_or_default(), &call.name, &call.arguments);
            Some(Event::default().data(serde_json::to_string(&chunk).unwrap_or_default()))
        }
    }
}

fn tool_call_chunk(id: &str, model: &str, call_id: &str, name: &str, arguments: &Value) -> ChatCompletionChunk {
    let tool_call = serde_json::json!({
        "index": 0,
        "id": call_id,
        "type": "function",
        "function": { "name": name, "arguments": arguments.to_string() },
    });
    ChatCompletionChunk {
        id: id.to_string(),
        object: "chat.completion.chunk",
        model: model.to_string(),
        choices: vec![ChunkChoice {
            index: 0,
            delta: Some(DeltaMessage { role: Some("assistant"), content: None, tool_calls: Some(vec![tool_call]) }),
            message: None,
            finish_reason: None,
        }],
    }
}

async fn collect_response(
    state: Arc<AppState>,
    conversation_id: String,
    model: String,
    mut rx: tokio::sync::mpsc::Receiver<UpstreamEvent>,
    ticket: lumogate_queue::QueueTicket,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let _ticket = ticket;
    let mut detector = ToolCallDetector::new();
    let mut text = String::new();
    let mut tool_calls: Vec<Value> = Vec::new();
    let mut title = String::new();

    while let Some(event) = rx.recv().await {
        match event {
            UpstreamEvent::MessageDelta { text: delta } => {
                for tool_event in detector.push_chunk(&delta) {
                    collect_tool_event(tool_event, &mut text, &mut tool_calls, &state);
                }
            }
            UpstreamEvent::TitleDelta { text: delta } => title.push_str(&delta),
            UpstreamEvent::ToolCall { id, name, arguments } => {
                tool_calls.push(serde_json::json!({
                    "id": id,
                    "type": "function",
                    "function": { "name": name, "arguments": arguments.to_string() },
                }));
                state.metrics.tool_calls_detected_total.inc();
            }
            UpstreamEvent::ToolResult { .. } => {}
            UpstreamEvent::Done => break,
            UpstreamEvent::Rejected { kind } => {
                state.metrics.upstream_errors_total.inc();
                return Err(error_response(&GatewayError::UpstreamRejected { kind }));
            }
            UpstreamEvent::Error { message } => {
                state.metrics.upstream_errors_total.inc();
                return Err(error_response(&GatewayError::Upstream(message)));
            }
        }
    }

    for tool_event in detector.finalize() {
        collect_tool_event(tool_event, &mut text, &mut tool_calls, &state);
    }

    if !title.is_empty() {
        let _ = state.store.set_title(&conversation_id, convert::postprocess_title(&title));
    }

    let message = if tool_calls.is_empty() {
        serde_json::json!({ "role": "assistant", "content": text })
    } else {
        serde_json::json!({ "role": "assistant", "content": if text.is_empty() { Value::Null } else { Value::String(text) }, "tool_calls": tool_calls })
    };

    let finish_reason = if tool_calls.is_empty() { "stop" } else { "tool_calls" };

    Ok(Json(serde_json::json!({
        "id": format!("chatcmpl-{}", Uuid::new_v4()),
        "object": "chat.completion",
        "model": model,
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": finish_reason,
        }],
    })))
}

fn collect_tool_event(event: ToolDetectorEvent, text: &mut String, tool_calls: &mut Vec<Value>, state: &AppState) {
    match event {
        ToolDetectorEvent::TextDelta(delta) => text.push_str(&delta),
        ToolDetectorEvent::ToolCall(call) => {
            tool_calls.push(serde_json::json!({
                "id": call.id.unwrap_or_default(),
                "type": "function",
                "function": { "name": call.name, "arguments": call.arguments.to_string() },
            }));
            state.metrics.tool_calls_detected_total.inc();
        }
    }
}
