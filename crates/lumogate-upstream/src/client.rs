use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use lumogate_crypto::envelope::{random_key, U2lEnvelope};
use lumogate_crypto::PgpEncryptor;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::error::UpstreamError;
use crate::sse::{process_stream, UpstreamEvent};

/// Out-of-scope collaborator: acquiring, refreshing, and storing the
/// bearer token and device identity upstream expects. Only the narrow
/// interface the client calls is specified here.
#[async_trait]
pub trait AuthTokenSource: Send + Sync {
    async fn bearer_token(&self) -> Result<String, UpstreamError>;
    fn device_uid(&self) -> String;
    fn app_version(&self) -> String;
}

/// Out-of-scope collaborator: the actual HTTP/SSE transport to upstream.
/// `ReqwestTransport` is the production implementation; tests substitute a
/// fake that returns a canned `reqwest::Response`-shaped stream.
#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    async fn send_request(&self, body: &[u8]) -> Result<reqwest::Response, UpstreamError>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
    auth: Arc<dyn AuthTokenSource>,
}

impl ReqwestTransport {
    pub fn new(base_url: impl Into<String>, auth: Arc<dyn AuthTokenSource>) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into(), auth }
    }
}

#[async_trait]
impl UpstreamTransport for ReqwestTransport {
    async fn send_request(&self, body: &[u8]) -> Result<reqwest::Response, UpstreamError> {
        let token = self.auth.bearer_token().await?;
        let resp = self
            .client
            .post(&self.base_url)
            .header("Accept", "text/event-stream")
            .header("Authorization", format!("Bearer {token}"))
            .header("x-pm-uid", self.auth.device_uid())
            .header("x-pm-appversion", self.auth.app_version())
            .header("Content-Type", "application/json")
            .body(body.to_vec())
            .send()
            .await?;
        Ok(resp)
    }
}

/// A single upstream-prompt-format message before encryption, one entry
/// of the `turns` array §4.1.1 describes.
#[derive(Debug, Clone)]
pub struct PlainTurn {
    /// `assistant` | `user` | `system` | `tool_call` | `tool_result`.
    pub role: &'static str,
    pub content: String,
}

impl PlainTurn {
    pub fn new(role: &'static str, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }
}

/// Where the composed instructions string gets folded into the turn
/// array, per `opts.injectInstructionsInto`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InjectInstructionsInto {
    #[default]
    First,
    Last,
}

/// Per-call options to `chatWithHistory`, exactly spec.md §4.1's `opts`.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub instructions: Option<String>,
    pub inject_instructions_into: InjectInstructionsInto,
    pub request_title: bool,
    pub enable_external_tools: bool,
}

const BASE_TOOLS: &[&str] = &["proton_info"];
const EXTERNAL_TOOLS: &[&str] = &["web_search", "weather", "stock", "cryptocurrency"];

/// Drives one U2L-encrypted upstream turn: generates the per-request AES
/// key, PGP-wraps it, AES-GCM-encrypts every turn under it, posts the
/// envelope, and demultiplexes the streamed response into
/// [`UpstreamEvent`]s on an mpsc channel.
pub struct UpstreamClient {
    transport: Arc<dyn UpstreamTransport>,
    pgp: Arc<dyn PgpEncryptor>,
}

impl UpstreamClient {
    pub fn new(transport: Arc<dyn UpstreamTransport>, pgp: Arc<dyn PgpEncryptor>) -> Self {
        Self { transport, pgp }
    }

    /// `turns` is the full prompt-format history for this request, already
    /// converted from OpenAI shapes by `lumogate-gateway::convert`.
    pub async fn chat_with_history(
        &self,
        turns: &[PlainTurn],
        opts: &ChatOptions,
    ) -> Result<(String, mpsc::Receiver<UpstreamEvent>), UpstreamError> {
        let request_key = random_key();
        let request_id = Uuid::new_v4().to_string();

        let mut turns = turns.to_vec();
        if let Some(instructions) = &opts.instructions {
            inject_instructions(&mut turns, instructions, opts.inject_instructions_into);
        }

        let turn_ad = format!("lumo.request.{request_id}.turn").into_bytes();
        let mut encrypted_turns = Vec::with_capacity(turns.len());
        for turn in &turns {
            let sealed = U2lEnvelope::encrypt(&request_key, &turn_ad, turn.content.as_bytes())?;
            encrypted_turns.push(json!({
                "role": turn.role,
                "content": BASE64.encode(sealed),
                "encrypted": true,
            }));
        }

        let wrapped_key = self.pgp.encrypt_for_recipient(&request_key)?;

        let mut tools: Vec<&str> = BASE_TOOLS.to_vec();
        if opts.enable_external_tools {
            tools.extend_from_slice(EXTERNAL_TOOLS);
        }

        let mut targets = vec!["message"];
        if opts.request_title {
            targets.push("title");
        }

        let body = json!({
            "Prompt": {
                "type": "generation_request",
                "turns": encrypted_turns,
                "options": { "tools": tools },
                "targets": targets,
                "request_key": BASE64.encode(wrapped_key),
                "request_id": request_id,
            }
        });
        let body_bytes = serde_json::to_vec(&body)?;

        info!(request_id = %request_id, turns = turns.len(), request_title = opts.request_title, "dispatching U2L-encrypted upstream turn");
        let resp = self.transport.send_request(&body_bytes).await?;

        let (tx, rx) = mpsc::channel(64);
        let request_id_for_task = request_id.clone();
        tokio::spawn(async move {
            process_stream(resp, &request_key, &request_id_for_task, tx).await;
        });

        Ok((request_id, rx))
    }
}

/// Splice `instructions` into the first or last turn's content as its own
/// leading/trailing paragraph, rather than appending a separate turn —
/// the upstream prompt format has no dedicated "system" turn kind for a
/// `generation_request`.
fn inject_instructions(turns: &mut [PlainTurn], instructions: &str, where_: InjectInstructionsInto) {
    let Some(target) = (match where_ {
        InjectInstructionsInto::First => turns.first_mut(),
        InjectInstructionsInto::Last => turns.last_mut(),
    }) else {
        return;
    };
    target.content = match where_ {
        InjectInstructionsInto::First => format!("{instructions}\n\n{}", target.content),
        InjectInstructionsInto::Last => format!("{}\n\n{instructions}", target.content),
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumogate_crypto::pgp::StaticPublicKeyEncryptor;

    struct NoopTransport;

    #[async_trait]
    impl UpstreamTransport for NoopTransport {
        async fn send_request(&self, _body: &[u8]) -> Result<reqwest::Response, UpstreamError> {
            // Never exercised directly; these tests only check envelope
            // construction logic that runs before the POST.
            unreachable!("test does not drive the transport")
        }
    }

    #[test]
    fn base_tools_exclude_external_set_by_default() {
        let opts = ChatOptions::default();
        let mut tools: Vec<&str> = BASE_TOOLS.to_vec();
        if opts.enable_external_tools {
            tools.extend_from_slice(EXTERNAL_TOOLS);
        }
        assert_eq!(tools, vec!["proton_info"]);
    }

    #[test]
    fn external_tools_extend_the_base_set() {
        let opts = ChatOptions { enable_external_tools: true, ..Default::default() };
        let mut tools: Vec<&str> = BASE_TOOLS.to_vec();
        if opts.enable_external_tools {
            tools.extend_from_slice(EXTERNAL_TOOLS);
        }
        assert_eq!(tools, vec!["proton_info", "web_search", "weather", "stock", "cryptocurrency"]);
    }

    #[test]
    fn injects_instructions_into_first_turn_by_default() {
        let mut turns = vec![PlainTurn::new("user", "hello"), PlainTurn::new("assistant", "hi")];
        inject_instructions(&mut turns, "be nice", InjectInstructionsInto::First);
        assert!(turns[0].content.starts_with("be nice\n\n"));
        assert_eq!(turns[1].content, "hi");
    }

    #[test]
    fn injects_instructions_into_last_turn_when_requested() {
        let mut turns = vec![PlainTurn::new("user", "hello"), PlainTurn::new("user", "again")];
        inject_instructions(&mut turns, "be nice", InjectInstructionsInto::Last);
        assert!(turns[1].content.ends_with("\n\nbe nice"));
        assert_eq!(turns[0].content, "hello");
    }

    #[test]
    fn injection_on_empty_turns_is_a_noop() {
        let mut turns: Vec<PlainTurn> = Vec::new();
        inject_instructions(&mut turns, "be nice", InjectInstructionsInto::First);
        assert!(turns.is_empty());
    }

    #[tokio::test]
    async fn pgp_encryptor_is_invoked_to_wrap_the_request_key() {
        // Exercises the envelope-construction half of `chat_with_history`
        // up to (but not including) the actual POST, by using a transport
        // whose `send_request` panics if reached would indicate the
        // client tried to call through — instead we verify indirectly
        // via the static encryptor's tag-prefix contract.
        let pgp = Arc::new(StaticPublicKeyEncryptor { tag: "PGPTEST:" });
        let wrapped = pgp.encrypt_for_recipient(&random_key()).unwrap();
        assert!(wrapped.starts_with(b"PGPTEST:"));
        let _transport: Arc<dyn UpstreamTransport> = Arc::new(NoopTransport);
    }
}
