use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use futures_util::StreamExt;
use lumogate_crypto::envelope::{response_chunk_ad, U2lEnvelope};
use lumogate_toolparse::BraceDepthTracker;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// One line of a raw SSE stream, before the backend-specific payload
/// inside `data:` is interpreted.
#[derive(Debug)]
pub enum SseParsed {
    Event(String),
    Data(String),
}

pub fn parse_sse_line(line: &str) -> Option<SseParsed> {
    if let Some(event_type) = line.strip_prefix("event: ") {
        Some(SseParsed::Event(event_type.to_string()))
    } else {
        line.strip_prefix("data: ").map(|data| SseParsed::Data(data.to_string()))
    }
}

/// Decoded shape of one `data: <json>` frame, before per-target dispatch.
/// Mirrors the upstream wire format exactly: a control frame
/// (`queued`/`ingesting`), a content frame (`token_data`), or a terminal
/// frame (`done`/`timeout`/`error`/`rejected`/`harmful`).
#[derive(Debug, Deserialize)]
struct UpstreamFrame {
    #[serde(rename = "type")]
    frame_type: String,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    count: Option<u64>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encrypted: Option<bool>,
}

/// Events the demultiplexer hands back to the handler layer, one per
/// logical channel the upstream SSE stream can carry.
#[derive(Debug, Clone)]
pub enum UpstreamEvent {
    MessageDelta { text: String },
    TitleDelta { text: String },
    /// A completed native tool invocation recovered from the `tool_call`
    /// target's brace-depth-tracked content.
    ToolCall { id: String, name: String, arguments: Value },
    /// A completed native tool result recovered from the `tool_result`
    /// target.
    ToolResult { content: Value },
    Done,
    /// `timeout` | `error` | `rejected` | `harmful` — see spec.md §4.1.2's
    /// terminal event table. `kind` carries the literal event name.
    Rejected { kind: String },
    /// Transport- or decode-level failure (not an upstream protocol
    /// terminal event).
    Error { message: String },
}

/// Per-target running state the demultiplexer keeps across chunks: plain
/// text accumulators for `message`/`title`, and brace-depth trackers for
/// `tool_call`/`tool_result` since those targets carry JSON that can span
/// arbitrarily many chunks.
#[derive(Default)]
struct Accumulators {
    tool_call_tracker: BraceDepthTracker,
    tool_result_tracker: BraceDepthTracker,
}

/// Demultiplex one upstream SSE response into [`UpstreamEvent`]s.
///
/// Each `data:` payload is `{type, target?, count?, content, encrypted?}`.
/// `encrypted == true` means `content` is base64 AES-GCM ciphertext under
/// `request_key` with AD `lumo.response.<request_id>.chunk` — the coarse,
/// not-per-target, scheme spec.md §9 resolves as canonical. Frames that
/// arrive unencrypted (the field absent or `false`) are used as-is.
pub async fn process_stream(
    resp: reqwest::Response,
    request_key: &[u8],
    request_id: &str,
    tx: mpsc::Sender<UpstreamEvent>,
) {
    let ad = response_chunk_ad(request_id);
    let mut current_event = String::new();
    let mut line_buf = String::new();
    let mut byte_stream = resp.bytes_stream();
    let mut acc = Accumulators::default();

    while let Some(chunk) = byte_stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                let _ = tx.send(UpstreamEvent::Error { message: e.to_string() }).await;
                return;
            }
        };

        let text = match std::str::from_utf8(&chunk) {
            Ok(t) => t,
            Err(_) => continue,
        };

        line_buf.push_str(text);
        let lines: Vec<&str> = line_buf.split('\n').collect();
        let (complete, remainder) = lines.split_at(lines.len() - 1);
        let remainder = remainder.first().unwrap_or(&"").to_string();

        for line in complete {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(parsed) = parse_sse_line(line) {
                match parsed {
                    SseParsed::Event(ev) => current_event = ev,
                    SseParsed::Data(data) => {
                        if data == "[DONE]" {
                            let _ = tx.send(UpstreamEvent::Done).await;
                            return;
                        }
                        match dispatch_frame(&data, request_key, &ad, &mut acc) {
                            FrameOutcome::Events(events) => {
                                for event in events {
                                    if tx.send(event).await.is_err() {
                                        return;
                                    }
                                }
                            }
                            FrameOutcome::Terminal(event) => {
                                let _ = tx.send(event).await;
                                return;
                            }
                            FrameOutcome::Ignore => {}
                        }
                    }
                }
            }
        }

        line_buf = remainder;
        let _ = &current_event;
    }

    let _ = tx.send(UpstreamEvent::Done).await;
}

enum FrameOutcome {
    Events(Vec<UpstreamEvent>),
    Terminal(UpstreamEvent),
    Ignore,
}

fn dispatch_frame(data: &str, request_key: &[u8], ad: &[u8], acc: &mut Accumulators) -> FrameOutcome {
    let frame: UpstreamFrame = match serde_json::from_str(data) {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, "upstream SSE frame was not valid JSON");
            return FrameOutcome::Terminal(UpstreamEvent::Error { message: "malformed upstream frame".into() });
        }
    };

    match frame.frame_type.as_str() {
        "queued" | "ingesting" => {
            debug!(frame_type = %frame.frame_type, target = ?frame.target, "upstream control frame");
            FrameOutcome::Ignore
        }
        "done" => FrameOutcome::Terminal(UpstreamEvent::Done),
        "timeout" | "error" | "rejected" | "harmful" => {
            FrameOutcome::Terminal(UpstreamEvent::Rejected { kind: frame.frame_type })
        }
        "token_data" => match decode_token_data(frame, request_key, ad, acc) {
            Some(event) => FrameOutcome::Events(vec![event]),
            None => FrameOutcome::Ignore,
        },
        other => {
            debug!(frame_type = other, "ignoring unrecognized upstream frame type");
            FrameOutcome::Ignore
        }
    }
}

fn decode_token_data(frame: UpstreamFrame, request_key: &[u8], ad: &[u8], acc: &mut Accumulators) -> Option<UpstreamEvent> {
    let raw_content = frame.content.unwrap_or_default();
    let content = if frame.encrypted.unwrap_or(false) {
        match decrypt_chunk(&raw_content, request_key, ad) {
            Some(plain) => plain,
            None => return Some(UpstreamEvent::Error { message: "decryption failure".into() }),
        }
    } else {
        raw_content
    };

    match frame.target.as_deref() {
        Some("message") => Some(UpstreamEvent::MessageDelta { text: content }),
        Some("title") => Some(UpstreamEvent::TitleDelta { text: content }),
        Some("tool_call") => complete_tool_call(&mut acc.tool_call_tracker, &content),
        Some("tool_result") => complete_tool_result(&mut acc.tool_result_tracker, &content),
        Some(other) => {
            debug!(target = other, "ignoring token_data for unrecognized target");
            None
        }
        None => None,
    }
}

fn decrypt_chunk(b64: &str, request_key: &[u8], ad: &[u8]) -> Option<String> {
    let sealed = match BASE64.decode(b64.as_bytes()) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "upstream token_data content was not valid base64");
            return None;
        }
    };
    let plaintext = match U2lEnvelope::decrypt(request_key, ad, &sealed) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "failed to decrypt upstream response chunk");
            return None;
        }
    };
    String::from_utf8(plaintext).ok()
}

/// Feed `content` into the `tool_call` target's brace-depth tracker and,
/// if a complete JSON object closed, emit it as the most recent
/// `ToolCall` (replacing whatever partial accumulation came before —
/// there is only ever one "current" native tool call per spec.md §4.1.2).
fn complete_tool_call(tracker: &mut BraceDepthTracker, content: &str) -> Option<UpstreamEvent> {
    let completed = tracker.push_str(content);
    let last = completed.into_iter().last()?;
    match serde_json::from_str::<Value>(&last) {
        Ok(value) => Some(UpstreamEvent::ToolCall {
            id: value.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
            name: value.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
            arguments: value.get("arguments").cloned().unwrap_or(Value::Null),
        }),
        Err(e) => {
            warn!(error = %e, "tool_call target content was not valid JSON after reassembly");
            None
        }
    }
}

fn complete_tool_result(tracker: &mut BraceDepthTracker, content: &str) -> Option<UpstreamEvent> {
    let completed = tracker.push_str(content);
    let last = completed.into_iter().last()?;
    match serde_json::from_str::<Value>(&last) {
        Ok(value) => Some(UpstreamEvent::ToolResult { content: value }),
        Err(e) => {
            warn!(error = %e, "tool_result target content was not valid JSON after reassembly");
            None
        }
    }
}
