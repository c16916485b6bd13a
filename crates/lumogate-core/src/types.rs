use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Speaker role of a `Message`, OpenAI-compatible naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// Replaces the duck-typed "message that might have a `content` string, or
/// `tool_calls`, or a `tool_call_id`" shape with an explicit tagged union —
/// callers match on a closed set of variants instead of probing optional
/// fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageBody {
    Text { content: String },
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    ToolResult { tool_call_id: String, content: String },
}

impl MessageBody {
    /// Flattened text used for semantic-id hashing and upstream-prompt
    /// rendering. Tool payloads are serialized so two structurally
    /// identical calls hash identically regardless of key order noise
    /// upstream.
    pub fn as_hashable_str(&self) -> String {
        match self {
            MessageBody::Text { content } => content.clone(),
            MessageBody::ToolCall { name, arguments, .. } => {
                format!("{name}:{arguments}")
            }
            MessageBody::ToolResult { content, .. } => content.clone(),
        }
    }
}

/// Lifecycle state of a stored `Message`, per spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Succeeded,
    Failed,
    Generating,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Stable identity of this message, independent of `semantic_id()`.
    /// Chains the conversation history: every message but the first has
    /// `parent_id == Some(predecessor.id)`.
    pub id: String,
    pub parent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: MessageStatus,
    pub role: Role,
    pub body: MessageBody,
    /// Caller-supplied identity (e.g. a `tool_call_id`), when one exists.
    /// `semantic_id()` prefers this over the content hash.
    pub explicit_id: Option<String>,
}

impl Message {
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_id: None,
            created_at: Utc::now(),
            status: MessageStatus::Succeeded,
            role,
            body: MessageBody::Text { content: content.into() },
            explicit_id: None,
        }
    }

    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        let id = id.into();
        Self {
            id: Uuid::new_v4().to_string(),
            parent_id: None,
            created_at: Utc::now(),
            status: MessageStatus::Succeeded,
            role: Role::Assistant,
            body: MessageBody::ToolCall { id: id.clone(), name: name.into(), arguments },
            explicit_id: Some(id),
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let tool_call_id = tool_call_id.into();
        Self {
            id: Uuid::new_v4().to_string(),
            parent_id: None,
            created_at: Utc::now(),
            status: MessageStatus::Succeeded,
            role: Role::Tool,
            body: MessageBody::ToolResult { tool_call_id: tool_call_id.clone(), content: content.into() },
            explicit_id: Some(tool_call_id),
        }
    }

    /// Link this message into the history chain: `parent_id` becomes the
    /// predecessor's `id`. Called by the store as it appends messages in
    /// order, so the §8 invariant (`m.parentId == predecessor.id`) holds
    /// for every stored message.
    pub fn set_parent(&mut self, parent_id: Option<String>) {
        self.parent_id = parent_id;
    }

    /// Content-addressed identity for dedup: the caller-supplied id when
    /// present, otherwise the first 16 hex chars of
    /// `SHA256(role || "\0" || content)`.
    pub fn semantic_id(&self) -> String {
        if let Some(id) = &self.explicit_id {
            return id.clone();
        }
        let mut hasher = Sha256::new();
        hasher.update(self.role.to_string().as_bytes());
        hasher.update(b"\0");
        hasher.update(self.body.as_hashable_str().as_bytes());
        let digest = hasher.finalize();
        hex::encode(&digest[..8])
    }
}

/// One request/response round: the user-facing turn index plus every
/// message (user input, any tool calls/results, the final assistant reply)
/// produced while answering it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub index: usize,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn new(index: usize) -> Self {
        Self { index, messages: Vec::new(), created_at: Utc::now() }
    }
}

/// Encryption-key boundary: every conversation belongs to exactly one
/// space, and a space's DEK (see `lumogate_crypto::keys`) is what the sync
/// engine wraps/unwraps under the master key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpaceId(pub String);

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Space {
    pub id: SpaceId,
    pub name: Option<String>,
}

/// The sentinel initial title every conversation is created with. The
/// pipeline requests a server-generated title exactly once per
/// conversation: when the current title still equals this literal.
pub const NEW_CONVERSATION_TITLE: &str = "New Conversation";

/// In-memory record of one multi-turn conversation.
///
/// `dirty` is set on every mutation and cleared once the sync engine has
/// pushed the conversation upstream; the LRU evictor in `lumogate-store`
/// refuses to evict a dirty entry unless every entry is dirty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub space_id: Option<SpaceId>,
    pub title: Option<String>,
    pub turns: Vec<Turn>,
    pub dirty: bool,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

impl Conversation {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            space_id: None,
            title: Some(NEW_CONVERSATION_TITLE.to_string()),
            turns: Vec::new(),
            dirty: false,
            created_at: now,
            last_accessed: now,
        }
    }

    pub fn generated_id() -> String {
        Uuid::new_v4().to_string()
    }

    pub fn touch(&mut self) {
        self.last_accessed = Utc::now();
    }

    /// True exactly when a server-generated title hasn't been requested
    /// yet for this conversation — the current title is still the
    /// creation-time sentinel.
    pub fn wants_title(&self) -> bool {
        self.title.as_deref() == Some(NEW_CONVERSATION_TITLE)
    }

    pub fn all_messages(&self) -> impl Iterator<Item = &Message> {
        self.turns.iter().flat_map(|t| t.messages.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semantic_id_prefers_explicit_id() {
        let msg = Message::tool_result("call_123", "42");
        assert_eq!(msg.semantic_id(), "call_123");
    }

    #[test]
    fn semantic_id_is_stable_for_identical_text_content() {
        let a = Message::text(Role::User, "hello world");
        let b = Message::text(Role::User, "hello world");
        assert_eq!(a.semantic_id(), b.semantic_id());
    }

    #[test]
    fn semantic_id_differs_for_different_content() {
        let a = Message::text(Role::User, "hello world");
        let b = Message::text(Role::User, "goodbye world");
        assert_ne!(a.semantic_id(), b.semantic_id());
    }

    #[test]
    fn new_conversation_wants_a_title() {
        let convo = Conversation::new("c1");
        assert!(convo.wants_title());
    }

    #[test]
    fn conversation_with_a_real_title_does_not_want_one() {
        let mut convo = Conversation::new("c1");
        convo.title = Some("Weekend trip planning".to_string());
        assert!(!convo.wants_title());
    }

    #[test]
    fn conversation_touch_updates_last_accessed() {
        let mut convo = Conversation::new("c1");
        let before = convo.last_accessed;
        std::thread::sleep(std::time::Duration::from_millis(5));
        convo.touch();
        assert!(convo.last_accessed >= before);
    }
}
