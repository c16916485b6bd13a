use lumogate_core::types::{Message, MessageBody, Role};
use lumogate_upstream::PlainTurn;
use serde_json::Value;

use crate::http::chat_completions::OpenAiChatMessage;

/// Context gathered from one incoming request that the handler threads
/// through conversion, upstream dispatch, and the final response — the
/// `hasCustomTools` / `commandContext` / `requestTitle` triple (spec.md
/// §4.3's request context).
#[derive(Debug, Default, Clone)]
pub struct RequestContext {
    pub has_custom_tools: bool,
    pub command_context: Option<String>,
    /// `conversationId != null ∧ stored.title == "New Conversation"` —
    /// set by the caller once it has looked up the conversation, since
    /// this module only sees the incoming message array.
    pub request_title: bool,
}

/// Convert an OpenAI chat message array into the internal tagged-union
/// representation, extracting a `RequestContext` along the way (a leading
/// `/command` in the final user message becomes `command_context`, per
/// `commands.rs`'s slash-command interception).
pub fn to_internal_messages(messages: &[OpenAiChatMessage]) -> (Vec<Message>, RequestContext) {
    let mut internal = Vec::with_capacity(messages.len());
    let mut ctx = RequestContext::default();

    for (i, msg) in messages.iter().enumerate() {
        let is_last_user = i == messages.len() - 1 && msg.role == "user";

        if let Some(tool_calls) = &msg.tool_calls {
            for call in tool_calls {
                if let Some(function) = call.get("function") {
                    let id = call.get("id").and_then(Value::as_str).unwrap_or_default();
                    let name = function.get("name").and_then(Value::as_str).unwrap_or_default();
                    let arguments = function
                        .get("arguments")
                        .and_then(Value::as_str)
                        .and_then(|s| serde_json::from_str(s).ok())
                        .unwrap_or(Value::Null);
                    internal.push(Message::tool_call(id, name, arguments));
                }
            }
            continue;
        }

        if msg.role == "tool" {
            let tool_call_id = msg.tool_call_id.clone().unwrap_or_default();
            internal.push(Message::tool_result(tool_call_id, flatten_content(&msg.content)));
            continue;
        }

        let role = match msg.role.as_str() {
            "system" => Role::System,
            "assistant" => Role::Assistant,
            _ => Role::User,
        };
        let text = flatten_content(&msg.content);

        if is_last_user {
            if let Some((command, rest)) = crate::commands::split_leading_command(&text) {
                ctx.command_context = Some(command.to_string());
                internal.push(Message::text(role, rest));
                continue;
            }
        }

        internal.push(Message::text(role, text));
    }

    (internal, ctx)
}

fn flatten_content(content: &Option<Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

/// Build the instructions string per spec.md §4.3.3: configured default,
/// then the tool-bounce prologue (only when custom tools are present),
/// then every extracted system-role message's text in order — each
/// section separated by a blank line.
pub fn build_instructions(
    default_instructions: &str,
    tool_bounce_prologue: &str,
    has_custom_tools: bool,
    messages: &[Message],
) -> String {
    let mut sections = vec![default_instructions.to_string()];
    if has_custom_tools {
        sections.push(tool_bounce_prologue.to_string());
    }
    for message in messages {
        if message.role != Role::System {
            continue;
        }
        if let MessageBody::Text { content } = &message.body {
            if !content.trim().is_empty() {
                sections.push(content.clone());
            }
        }
    }
    sections.join("\n\n")
}

/// Convert stored internal messages into the upstream prompt-format
/// `turns` array, per spec.md §4.3.3's role table. System-role messages
/// are consumed into the instructions string (`build_instructions`) and
/// never emitted as a turn.
pub fn to_upstream_turns(messages: &[Message]) -> Vec<PlainTurn> {
    messages
        .iter()
        .filter_map(|m| match (&m.role, &m.body) {
            (Role::System, _) => None,
            (_, MessageBody::Text { content }) => {
                let role = if m.role == Role::Assistant { "assistant" } else { "user" };
                Some(PlainTurn::new(role, content.clone()))
            }
            (_, MessageBody::ToolCall { id, name, arguments }) => {
                let payload = serde_json::json!({
                    "type": "function_call",
                    "call_id": id,
                    "name": name,
                    "arguments": arguments,
                });
                Some(PlainTurn::new("user", payload.to_string()))
            }
            (_, MessageBody::ToolResult { tool_call_id, content }) => {
                let payload = serde_json::json!({
                    "type": "function_call_output",
                    "call_id": tool_call_id,
                    "output": content,
                });
                Some(PlainTurn::new("user", payload.to_string()))
            }
        })
        .collect()
}

/// Post-process a server-generated title per spec.md §4.3 step 9: keep
/// only the first line, strip surrounding quotes/punctuation, and cap at
/// 100 characters.
pub fn postprocess_title(raw: &str) -> String {
    let first_line = raw.lines().next().unwrap_or("").trim();
    let stripped = first_line.trim_matches(|c: char| c == '"' || c == '\'' || c.is_ascii_punctuation() && c != '-');
    let capped: String = stripped.chars().take(100).collect();
    capped.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(content: &str) -> OpenAiChatMessage {
        OpenAiChatMessage {
            role: "user".to_string(),
            content: Some(Value::String(content.to_string())),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    #[test]
    fn converts_plain_user_message() {
        let (internal, ctx) = to_internal_messages(&[user("hello")]);
        assert_eq!(internal.len(), 1);
        assert!(!ctx.has_custom_tools);
        assert!(ctx.command_context.is_none());
    }

    #[test]
    fn extracts_leading_slash_command_from_last_user_message() {
        let (internal, ctx) = to_internal_messages(&[user("/save please keep this")]);
        assert_eq!(ctx.command_context, Some("save".to_string()));
        assert_eq!(internal.len(), 1);
    }

    #[test]
    fn flattens_multipart_content() {
        let msg = OpenAiChatMessage {
            role: "user".to_string(),
            content: Some(serde_json::json!([{"type": "text", "text": "part one"}, {"type": "text", "text": " part two"}])),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        };
        let (internal, _) = to_internal_messages(&[msg]);
        match &internal[0].body {
            lumogate_core::types::MessageBody::Text { content } => assert_eq!(content, "part one part two"),
            _ => panic!("expected text body"),
        }
    }

    #[test]
    fn system_messages_are_excluded_from_upstream_turns() {
        let messages = vec![Message::text(Role::System, "be terse"), Message::text(Role::User, "hi")];
        let turns = to_upstream_turns(&messages);
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, "user");
    }

    #[test]
    fn tool_call_becomes_a_user_turn_with_function_call_payload() {
        let messages = vec![Message::tool_call("call_1", "search", serde_json::json!({"q": "rust"}))];
        let turns = to_upstream_turns(&messages);
        assert_eq!(turns[0].role, "user");
        let payload: Value = serde_json::from_str(&turns[0].content).unwrap();
        assert_eq!(payload["type"], "function_call");
        assert_eq!(payload["call_id"], "call_1");
    }

    #[test]
    fn tool_result_becomes_a_user_turn_with_function_call_output_payload() {
        let messages = vec![Message::tool_result("call_1", "42")];
        let turns = to_upstream_turns(&messages);
        let payload: Value = serde_json::from_str(&turns[0].content).unwrap();
        assert_eq!(payload["type"], "function_call_output");
        assert_eq!(payload["output"], "42");
    }

    #[test]
    fn build_instructions_joins_sections_with_blank_lines() {
        let messages = vec![Message::text(Role::System, "be terse")];
        let instructions = build_instructions("Be helpful.", "Bounce tools.", false, &messages);
        assert_eq!(instructions, "Be helpful.\n\nbe terse");
    }

    #[test]
    fn build_instructions_includes_tool_bounce_prologue_only_with_custom_tools() {
        let without = build_instructions("Be helpful.", "Bounce tools.", false, &[]);
        assert_eq!(without, "Be helpful.");
        let with = build_instructions("Be helpful.", "Bounce tools.", true, &[]);
        assert_eq!(with, "Be helpful.\n\nBounce tools.");
    }

    #[test]
    fn postprocess_title_trims_quotes_and_whitespace() {
        assert_eq!(postprocess_title("\"Weekend Trip Planning\"\nextra line"), "Weekend Trip Planning");
    }

    #[test]
    fn postprocess_title_caps_at_100_chars() {
        let long = "x".repeat(150);
        assert_eq!(postprocess_title(&long).len(), 100);
    }
}
