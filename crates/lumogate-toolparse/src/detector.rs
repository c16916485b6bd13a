use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::brace::BraceDepthTracker;
use crate::normalize::{normalize_tool_call, NormalizedToolCall};

fn fence_open_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^```(json|tool_call)\s*$").unwrap())
}

fn fence_close_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^```\s*$").unwrap())
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolDetectorEvent {
    /// Plain model text the caller should forward to the client verbatim.
    TextDelta(String),
    /// A fully recovered, shape-normalized tool call.
    ToolCall(NormalizedToolCall),
}

#[derive(Debug)]
enum State {
    Normal,
    InCodeFence { body: String },
    InRawJson,
}

/// Streaming tool-call detector. Consumes model output chunk by chunk and
/// classifies it into plain text vs. tool-call JSON, whether the JSON
/// arrives fenced (` ```json ... ``` `) or bare in the text stream.
///
/// Unlike a one-shot JSON parser, this must cope with chunk boundaries
/// landing anywhere — mid-fence-marker, mid-brace, mid-escape — so state
/// lives across `push_chunk` calls and `finalize` is required to flush
/// whatever remains buffered when the stream ends.
pub struct ToolCallDetector {
    state: State,
    line_buf: String,
    braces: BraceDepthTracker,
}

impl Default for ToolCallDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolCallDetector {
    pub fn new() -> Self {
        Self { state: State::Normal, line_buf: String::new(), braces: BraceDepthTracker::new() }
    }

    pub fn push_chunk(&mut self, chunk: &str) -> Vec<ToolDetectorEvent> {
        let mut events = Vec::new();
        self.line_buf.push_str(chunk);

        loop {
            let Some(newline_pos) = self.line_buf.find('\n') else { break };
            let line: String = self.line_buf.drain(..=newline_pos).collect();
            self.consume_line(&line, &mut events);
        }

        events
    }

    fn consume_line(&mut self, line: &str, events: &mut Vec<ToolDetectorEvent>) {
        match &mut self.state {
            State::Normal => {
                let trimmed = line.trim_end_matches('\n').trim_end_matches('\r');
                if fence_open_re().is_match(trimmed.trim()) {
                    self.state = State::InCodeFence { body: String::new() };
                    return;
                }
                self.scan_for_raw_json(line, events);
            }
            State::InCodeFence { body } => {
                let trimmed = line.trim_end_matches('\n').trim_end_matches('\r');
                if fence_close_re().is_match(trimmed.trim()) {
                    let body = std::mem::take(body);
                    self.state = State::Normal;
                    self.finish_candidate(body.trim().to_string(), events);
                } else {
                    body.push_str(line);
                }
            }
            State::InRawJson => {
                self.scan_for_raw_json(line, events);
            }
        }
    }

    /// Outside a fence, tool JSON can still appear bare in the text stream.
    /// Feed the line through the brace tracker; completed objects are
    /// tried as tool calls, everything else is plain text.
    fn scan_for_raw_json(&mut self, line: &str, events: &mut Vec<ToolDetectorEvent>) {
        let completed = self.braces.push_str(line);
        self.state = if self.braces.in_object() { State::InRawJson } else { State::Normal };

        let skipped = self.braces.take_skipped();
        if !skipped.is_empty() {
            events.push(ToolDetectorEvent::TextDelta(skipped));
        }
        for candidate in completed {
            self.finish_candidate(candidate, events);
        }
    }

    fn finish_candidate(&mut self, candidate: String, events: &mut Vec<ToolDetectorEvent>) {
        match serde_json::from_str::<Value>(&candidate) {
            Ok(value) => match normalize_tool_call(&value) {
                Some(call) => {
                    debug!(name = %call.name, "recovered tool call");
                    events.push(ToolDetectorEvent::ToolCall(call));
                }
                None => {
                    warn!("candidate JSON did not match a tool-call shape, treating as text");
                    events.push(ToolDetectorEvent::TextDelta(candidate));
                }
            },
            Err(_) => {
                warn!("candidate block was not valid JSON, treating as text");
                events.push(ToolDetectorEvent::TextDelta(candidate));
            }
        }
    }

    /// Flush everything still buffered (a partial line, an unterminated
    /// fence, an unclosed raw-JSON span) as plain text. The stream is over
    /// regardless of whether a tool call looked like it was forming — no
    /// residual bytes are ever silently dropped.
    pub fn finalize(mut self) -> Vec<ToolDetectorEvent> {
        let mut events = Vec::new();

        if !self.line_buf.is_empty() {
            let remainder = std::mem::take(&mut self.line_buf);
            self.consume_line(&remainder, &mut events);
        }

        match self.state {
            State::Normal => {
                let skipped = self.braces.take_skipped();
                if !skipped.is_empty() {
                    events.push(ToolDetectorEvent::TextDelta(skipped));
                }
            }
            State::InCodeFence { body } => {
                if !body.is_empty() {
                    events.push(ToolDetectorEvent::TextDelta(body));
                }
            }
            State::InRawJson => {
                let skipped = self.braces.take_skipped();
                if !skipped.is_empty() {
                    events.push(ToolDetectorEvent::TextDelta(skipped));
                }
            }
        }

        events
    }
}
