use figment::{
    providers::{Env, Format, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

// Protocol / sizing constants.
pub const DEFAULT_PORT: u16 = 18787;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_MODEL: &str = "lumo";
pub const MAX_CHAT_BODY_BYTES: usize = 2 * 1024 * 1024; // 2 MB request body cap
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_STORE_MAX_CONVERSATIONS: usize = 512;
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Top-level config (lumogate.yaml + LUMOGATE_* env overrides).
///
/// Loaded once at startup via `load` into a single frozen struct — no
/// per-call option dictionaries anywhere downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            upstream: UpstreamConfig::default(),
            store: StoreConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Leading paragraph of every request's composed instructions string,
    /// ahead of the tool-bounce prologue (if custom tools are present)
    /// and the extracted system text, per spec.md §4.3.3.
    #[serde(default = "default_instructions")]
    pub default_instructions: String,
    /// Appended to `default_instructions` only when the request declared
    /// custom tools, instructing the model to bounce native tool targets
    /// instead of emitting them as `message` text.
    #[serde(default = "default_tool_bounce_prologue")]
    pub tool_bounce_prologue: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            model: DEFAULT_MODEL.to_string(),
            default_instructions: default_instructions(),
            tool_bounce_prologue: default_tool_bounce_prologue(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Bearer token clients must present as their OpenAI `apiKey`.
    #[serde(default = "default_api_key")]
    pub api_key: String,
    /// Path to the AES-256-GCM-encrypted auth-token vault blob
    /// (`[12-byte nonce][ciphertext][16-byte tag]`). Out-of-scope collaborator —
    /// only the path lives in config; acquisition/refresh happen elsewhere.
    pub vault_path: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_key: default_api_key(),
            vault_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub enable_external_tools: bool,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_upstream_url(),
            timeout_secs: default_timeout_secs(),
            enable_external_tools: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_max")]
    pub max_conversations: usize,
    /// When true, a deterministic conversation id is derived from a stable
    /// request field (the OpenAI `user` field) and multi-turn state is
    /// tracked. When false, every request is stateless.
    #[serde(default = "bool_true")]
    pub deterministic_conversations: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_conversations: default_store_max(),
            deterministic_conversations: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_sync_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            debounce_ms: default_sync_debounce_ms(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}
fn default_instructions() -> String {
    "You are a helpful assistant.".to_string()
}
fn default_tool_bounce_prologue() -> String {
    "When a declared tool is the right next step, respond with a single JSON object \
     describing the call instead of calling it yourself."
        .to_string()
}
fn default_api_key() -> String {
    "change-me".to_string()
}
fn default_upstream_url() -> String {
    "https://upstream.invalid/ai/v1/chat".to_string()
}
fn default_timeout_secs() -> u64 {
    DEFAULT_UPSTREAM_TIMEOUT_SECS
}
fn default_store_max() -> usize {
    DEFAULT_STORE_MAX_CONVERSATIONS
}
fn default_sync_debounce_ms() -> u64 {
    2_000
}

impl GatewayConfig {
    /// Load config: compiled-in defaults ← YAML file ← LUMOGATE_* env vars.
    ///
    /// Checks the file path in order:
    ///   1. Explicit `config_path` argument
    ///   2. `~/.lumogate/lumogate.yaml`
    ///
    /// A TOML file at the same path with a `.toml` extension is merged
    /// first if present, so operators who prefer TOML are not locked out.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);
        let toml_path = path.trim_end_matches(".yaml").to_string() + ".toml";

        let config: GatewayConfig = Figment::from(Serialized::defaults(GatewayConfig::default()))
            .merge(Toml::file(&toml_path))
            .merge(Yaml::file(&path))
            .merge(Env::prefixed("LUMOGATE_").split("_"))
            .extract()
            .map_err(|e| crate::error::GatewayError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.lumogate/lumogate.yaml", home)
}
