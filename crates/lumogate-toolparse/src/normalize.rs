use serde_json::Value;

/// A tool call once its shape has been normalized, regardless of which
/// synonym the model emitted it in.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedToolCall {
    pub id: Option<String>,
    pub name: String,
    pub arguments: Value,
}

/// Models emit tool calls in a handful of near-equivalent shapes:
///
/// - `{"name": "...", "arguments": {...}}`
/// - `{"name": "...", "parameters": {...}}` (older convention)
/// - `{"name": "...", "arguments": "{...}"}` (arguments double-encoded as a string)
/// - `{"function_call": {"name": "...", "arguments": "..."}}` (legacy OpenAI)
/// - `{"function": {"name": "...", "arguments": {...}}}` (OpenAI tool_calls entry)
///
/// This collapses all of them into one shape so downstream code never
/// branches on which synonym arrived.
pub fn normalize_tool_call(raw: &Value) -> Option<NormalizedToolCall> {
    let raw = unwrap_envelope(raw);

    let id = raw.get("id").and_then(Value::as_str).map(String::from);
    let name = raw.get("name").and_then(Value::as_str)?.to_string();

    // No `arguments`/`parameters` key at all (just `{ name }`) is still a
    // valid call with an empty argument object, not a parse failure.
    let arguments = match raw.get("arguments").or_else(|| raw.get("parameters")) {
        Some(Value::String(s)) => serde_json::from_str(s).unwrap_or_else(|_| Value::Object(Default::default())),
        Some(other) => other.clone(),
        None => Value::Object(Default::default()),
    };

    Some(NormalizedToolCall { id, name, arguments })
}

/// Peel off a `function_call`/`function` wrapper if present, returning the
/// inner object that actually carries `name`/`arguments`.
fn unwrap_envelope(raw: &Value) -> &Value {
    for key in ["function_call", "function"] {
        if let Some(inner) = raw.get(key) {
            return inner;
        }
    }
    raw
}
