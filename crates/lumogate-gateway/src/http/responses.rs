//! OpenAI-compatible `/v1/responses` endpoint: the richer event-taxonomy
//! sibling of `chat_completions`, sharing the same request context,
//! upstream dispatch, and tool-call detector.

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
use crate::http::chat_completions::OpenAiChatMessage;

#[derive(Debug, Deserialize)]
pub struct OpenAiResponsesRequest {
    pub model: String,
    pub input: Value,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub tools: Option<Vec<Value>>,
}

/// `input` is either a plain string (one user message) or an array of
/// message-shaped objects (`{role, content}`). Both forms flatten to the
/// same `OpenAiChatMessage` list `chat_completions`'s conversion pipeline
/// already knows how to handle.
fn input_to_chat_messages(input: &Value) -> Vec<OpenAiChatMessage> {
    match input {
        Value::String(text) => vec![OpenAiChatMessage {
            role: "user".to_string(),
            content: Some(Value::String(text.clone())),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }],
        Value::Array(items) => items
            .iter()
            .map(|item| OpenAiChatMessage {
                role: item.get("role").and_then(Value::as_str).unwrap_or("user").to_string(),
                content: item.get("content").cloned(),
                tool_calls: None,
                tool_call_id: item.get("call_id").and_then(Value::as_str).map(str::to_string),
                name: item.get("name").and_then(Value::as_str).map(str::to_string),
            })
            .collect(),
        _ => Vec::new(),
    }
}

pub async fn responses(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OpenAiResponsesRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    state.metrics.requests_total.inc();

    let chat_messages = input_to_chat_messages(&req.input);
    if chat_messages.is_empty() {
        return Err(error_response(&GatewayError::BadRequest("input must be non-empty".into())));
    }
    if !chat_messages.iter().any(|m| m.role == "user") {
        return Err(error_response(&GatewayError::BadRequest("input must include a user message".into())));
    }

    let conversation_id = if state.config.store.deterministic_conversations {
        req.user.clone().unwrap_or_else(Conversation::generated_id)
    } else {
        Conversation::generated_id()
    };
    state.store.get_or_create(&conversation_id);

    let (messages, mut ctx) = convert::to_internal_messages(&chat_messages);
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
    let instructions = req.instructions.clone().unwrap_or_else(|| {
        convert::build_instructions(
            &state.config.server.default_instructions,
            &state.config.server.tool_bounce_prologue,
            ctx.has_custom_tools,
            &history,
        )
    });
    ctx.request_title = conversation.wants_title();

    let ticket = state.queue.acquire().await.map_err(|_| error_response(&GatewayError::QueueFull))?;

    let opts = ChatOptions {
        instructions: Some(instructions),
        request_title: ctx.request_title,
        enable_external_tools: state.config.upstream.enable_external_tools,
        ..Default::default()
    };

    let (request_id, rx) = state.upstream.chat_with_history(&turns, &opts).await.map_err(|e| {
        state.metrics.upstream_errors_total.inc();
        error_response(&GatewayError::Upstream(e.to_string()))
    })?;

    info!(conversation_id, request_id, stream = req.stream, "dispatched responses turn");

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
    let response_id = format!("resp_{}", Uuid::new_v4());
    let envelope = completed_envelope(&response_id, model, &reply, &[]);
    if stream {
        let body = format!(
            "data: {}\n\n",
            serde_json::to_string(&serde_json::json!({ "type": "response.completed", "response": envelope }))
                .unwrap_or_default()
        );
        (StatusCode::OK, [("content-type", "text/event-stream")], body).into_response()
    } else {
        Json(envelope).into_response()
    }
}

#[derive(Serialize)]
struct FunctionCallItem {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    call_id: String,
    name: String,
    arguments: String,
}

fn completed_envelope(response_id: &str, model: &str, text: &str, tool_calls: &[(String, String, Value)]) -> Value {
    let mut output = vec![serde_json::json!({
        "id": format!("msg_{}", Uuid::new_v4()),
        "type": "message",
        "role": "assistant",
        "content": [{ "type": "output_text", "text": text }],
    })];
    for (call_id, name, arguments) in tool_calls {
        let item = FunctionCallItem {
            id: format!("fc-{}", Uuid::new_v4()),
            kind: "function_call",
            call_id: call_id.clone(),
            name: name.clone(),
            arguments: arguments.to_string(),
        };
        output.push(serde_json::to_value(item).unwrap_or(Value::Null));
    }
    serde_json::json!({
        "id": response_id,
        "object": "response",
        "model": model,
        "status": "completed",
        "output": output,
    })
}

fn sse_event(event_type: &str, payload: Value) -> Event {
    let mut body = payload;
    if let Value::Object(map) = &mut body {
        map.insert("type".to_string(), Value::String(event_type.to_string()));
    }
    Event::default().data(serde_json::to_string(&body).unwrap_or_default())
}

fn stream_response(
    state: Arc<AppState>,
    conversation_id: String,
    model: String,
    mut rx: tokio::sync::mpsc::Receiver<UpstreamEvent>,
    ticket: lumogate_queue::QueueTicket,
) -> Sse<impl futures_util::Stream<Item = Result<Event, std::convert::Infallible>>> {
    let response_id = format!("resp_{}", Uuid::new_v4());
    let message_item_id = format!("msg_{}", Uuid::new_v4());

    let stream = async_stream::stream! {
        let _ticket = ticket;
        let mut detector = ToolCallDetector::new();
        let mut text = String::new();
        let mut tool_calls: Vec<(String, String, Value)> = Vec::new();
        let mut title = String::new();

        yield Ok(sse_event("response.created", serde_json::json!({ "response": { "id": response_id } })));
        yield Ok(sse_event("response.in_progress", serde_json::json!({ "response": { "id": response_id } })));
        yield Ok(sse_event("response.output_item.added", serde_json::json!({ "item": { "id": message_item_id, "type": "message", "role": "assistant" } })));
        yield Ok(sse_event("response.content_part.added", serde_json::json!({ "item_id": message_item_id, "part": { "type": "output_text" } })));

        while let Some(event) = rx.recv().await {
            match event {
                UpstreamEvent::MessageDelta { text: delta } => {
                    for tool_event in detector.push_chunk(&delta) {
                        match tool_event {
                            ToolDetectorEvent::TextDelta(piece) => {
                                if piece.is_empty() { continue; }
                                text.push_str(&piece);
                                yield Ok(sse_event("response.output_text.delta", serde_json::json!({ "item_id": message_item_id, "delta": piece })));
                            }
                            ToolDetectorEvent::ToolCall(call) => {
                                emit_function_call(call, &mut tool_calls, &state);
                            }
                        }
                    }
                }
                UpstreamEvent::TitleDelta { text: delta } => title.push_str(&delta),
                UpstreamEvent::ToolCall { id, name, arguments } => {
                    tool_calls.push((id, name, arguments));
                    state.metrics.tool_calls_detected_total.inc();
                }
                UpstreamEvent::ToolResult { .. } => {}
                UpstreamEvent::Done => break,
                UpstreamEvent::Rejected { kind } => {
                    state.metrics.upstream_errors_total.inc();
                    warn!(kind = %kind, "upstream rejected the responses request mid-stream");
                    let body = GatewayError::UpstreamRejected { kind }.to_openai_body();
                    yield Ok(Event::default().data(serde_json::to_string(&body).unwrap_or_default()));
                    return;
                }
                UpstreamEvent::Error { message } => {
                    state.metrics.upstream_errors_total.inc();
                    warn!(error = %message, "upstream error mid-stream");
                    let body = GatewayError::Upstream(message).to_openai_body();
                    yield Ok(Event::default().data(serde_json::to_string(&body).unwrap_or_default()));
                    return;
                }
            }
        }

        let taken = std::mem::replace(&mut detector, ToolCallDetector::new());
        for tool_event in taken.finalize() {
            match tool_event {
                ToolDetectorEvent::TextDelta(piece) => {
                    if piece.is_empty() { continue; }
                    text.push_str(&piece);
                    yield Ok(sse_event("response.output_text.delta", serde_json::json!({ "item_id": message_item_id, "delta": piece })));
                }
                ToolDetectorEvent::ToolCall(call) => emit_function_call(call, &mut tool_calls, &state),
            }
        }

        if !title.is_empty() {
            let _ = state.store.set_title(&conversation_id, convert::postprocess_title(&title));
        }

        yield Ok(sse_event("response.output_text.done", serde_json::json!({ "item_id": message_item_id, "text": text })));
        yield Ok(sse_event("response.content_part.done", serde_json::json!({ "item_id": message_item_id })));
        yield Ok(sse_event("response.output_item.done", serde_json::json!({ "item": { "id": message_item_id, "type": "message" } })));

        for (call_id, name, arguments) in &tool_calls {
            let fc_id = format!("fc-{}", Uuid::new_v4());
            yield Ok(sse_event("response.output_item.added", serde_json::json!({ "item": { "id": fc_id, "type": "function_call", "call_id": call_id } })));
            yield Ok(sse_event("response.function_call_arguments.delta", serde_json::json!({ "item_id": fc_id, "delta": arguments.to_string() })));
            yield Ok(sse_event("response.function_call_arguments.done", serde_json::json!({ "item_id": fc_id, "arguments": arguments.to_string() })));
            yield Ok(sse_event("response.output_item.done", serde_json::json!({ "item": { "id": fc_id, "type": "function_call", "call_id": call_id, "name": name } })));
        }

        let envelope = completed_envelope(&response_id, &model, &text, &tool_calls);
        yield Ok(sse_event("response.completed", serde_json::json!({ "response": envelope })));
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn emit_function_call(call: lumogate_toolparse::NormalizedToolCall, tool_calls: &mut Vec<(String, String, Value)>, state: &AppState) {
    tool_calls.push((call.id.unwrap_or_default(), call.name, call.arguments));
    state.metrics.tool_calls_detected_total.inc();
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
    let mut tool_calls: Vec<(String, String, Value)> = Vec::new();
    let mut title = String::new();

    while let Some(event) = rx.recv().await {
        match event {
            UpstreamEvent::MessageDelta { text: delta } => {
                for tool_event in detector.push_chunk(&delta) {
                    match tool_event {
                        ToolDetectorEvent::TextDelta(piece) => text.push_str(&piece),
                        ToolDetectorEvent::ToolCall(call) => emit_function_call(call, &mut tool_calls, &state),
                    }
                }
            }
            UpstreamEvent::TitleDelta { text: delta } => title.push_str(&delta),
            UpstreamEvent::ToolCall { id, name, arguments } => {
                tool_calls.push((id, name, arguments));
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

    let taken = std::mem::replace(&mut detector, ToolCallDetector::new());
    for tool_event in taken.finalize() {
        match tool_event {
            ToolDetectorEvent::TextDelta(piece) => text.push_str(&piece),
            ToolDetectorEvent::ToolCall(call) => emit_function_call(call, &mut tool_calls, &state),
        }
    }

    if !title.is_empty() {
        let _ = state.store.set_title(&conversation_id, convert::postprocess_title(&title));
    }

    let response_id = format!("resp_{}", Uuid::new_v4());
    Ok(Json(completed_envelope(&response_id, &model, &text, &tool_calls)))
}
