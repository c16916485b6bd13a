use serde_json::{json, Value};
use thiserror::Error;

/// Gateway-wide error taxonomy. Every fallible operation in every
/// `lumogate-*` crate ultimately folds into one of these variants by the
/// time it reaches an HTTP handler, so the OpenAI-shaped error body is
/// assembled in exactly one place.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Upstream transport error: {0}")]
    Upstream(String),

    #[error("Upstream returned malformed SSE: {0}")]
    UpstreamProtocol(String),

    /// A terminal `timeout` | `error` | `rejected` | `harmful` SSE event,
    /// carried verbatim as `kind`. Distinguished from `Upstream` (a
    /// transport-level failure) per spec.md §7's taxonomy.
    #[error("Upstream rejected the request ({kind})")]
    UpstreamRejected { kind: String },

    #[error("Encryption error: {0}")]
    Crypto(String),

    #[error("Tool-call parsing error: {0}")]
    ToolParse(String),

    #[error("Conversation store error: {0}")]
    Store(String),

    #[error("Sync engine error: {0}")]
    Sync(String),

    #[error("Request queue is full")]
    QueueFull,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Request timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Short machine-readable code, reused both as the OpenAI error body's
    /// `code` field and in log/metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Config(_) => "config_error",
            GatewayError::AuthFailed(_) => "invalid_api_key",
            GatewayError::BadRequest(_) => "invalid_request_error",
            GatewayError::Upstream(_) => "upstream_error",
            GatewayError::UpstreamProtocol(_) => "upstream_protocol_error",
            GatewayError::UpstreamRejected { .. } => "upstream_rejected",
            GatewayError::Crypto(_) => "encryption_error",
            GatewayError::ToolParse(_) => "tool_parse_error",
            GatewayError::Store(_) => "store_error",
            GatewayError::Sync(_) => "sync_error",
            GatewayError::QueueFull => "queue_full",
            GatewayError::Serialization(_) => "serialization_error",
            GatewayError::Io(_) => "io_error",
            GatewayError::PayloadTooLarge { .. } => "payload_too_large",
            GatewayError::Timeout { .. } => "timeout",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    /// HTTP status this error maps to. Callers in `lumogate-gateway` use
    /// this rather than re-deriving it from the variant themselves.
    pub fn status(&self) -> u16 {
        match self {
            GatewayError::Config(_) | GatewayError::Internal(_) => 500,
            GatewayError::AuthFailed(_) => 401,
            GatewayError::BadRequest(_) => 400,
            GatewayError::Upstream(_) | GatewayError::UpstreamProtocol(_) | GatewayError::UpstreamRejected { .. } => 502,
            GatewayError::Crypto(_) => 500,
            GatewayError::ToolParse(_) => 500,
            GatewayError::Store(_) => 500,
            GatewayError::Sync(_) => 502,
            GatewayError::QueueFull => 429,
            GatewayError::Serialization(_) => 400,
            GatewayError::Io(_) => 500,
            GatewayError::PayloadTooLarge { .. } => 413,
            GatewayError::Timeout { .. } => 504,
            GatewayError::Internal(_) => 500,
        }
    }

    /// OpenAI's coarse error category (`invalid_request_error` |
    /// `authentication_error` | `rate_limit_error` | `server_error`), used
    /// for the wire body's `type` field rather than the finer-grained
    /// `code()`.
    fn openai_type(&self) -> &'static str {
        match self {
            GatewayError::AuthFailed(_) => "authentication_error",
            GatewayError::BadRequest(_) | GatewayError::PayloadTooLarge { .. } | GatewayError::Serialization(_) => {
                "invalid_request_error"
            }
            GatewayError::QueueFull => "rate_limit_error",
            _ => "server_error",
        }
    }

    /// Body shape OpenAI clients expect: `{"error": {message, type, param, code}}`.
    ///
    /// `code` is only populated for client-actionable errors; server-side
    /// faults (config, crypto, upstream, …) report `code: null` per
    /// spec.md §8 scenario 5's literal rejected-request body.
    pub fn to_openai_body(&self) -> Value {
        let code = match self {
            GatewayError::AuthFailed(_)
            | GatewayError::BadRequest(_)
            | GatewayError::PayloadTooLarge { .. }
            | GatewayError::QueueFull => Value::String(self.code().to_string()),
            _ => Value::Null,
        };
        json!({
            "error": {
                "message": self.to_string(),
                "type": self.openai_type(),
                "param": Value::Null,
                "code": code,
            }
        })
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
