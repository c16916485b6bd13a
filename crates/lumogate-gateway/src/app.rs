use std::sync::Arc;

use lumogate_core::config::GatewayConfig;
use lumogate_crypto::pgp::StaticPublicKeyEncryptor;
use lumogate_crypto::{MasterKey, PgpEncryptor};
use lumogate_queue::SingleFlightQueue;
use lumogate_store::ConversationStore;
use lumogate_sync::{ReqwestSyncBackend, SyncBackend, SyncEngine, SyncKeyManager};
use lumogate_upstream::{ReqwestTransport, UpstreamClient};
use prometheus::Registry;

use crate::auth::StaticAuthTokenSource;
use crate::metrics::GatewayMetrics;

/// Central shared state, handed to every Axum handler as `State<Arc<AppState>>`.
pub struct AppState {
    pub config: GatewayConfig,
    pub store: Arc<ConversationStore>,
    pub queue: Arc<SingleFlightQueue>,
    pub upstream: Arc<UpstreamClient>,
    pub sync: Option<Arc<SyncEngine>>,
    pub sync_keys: Arc<SyncKeyManager>,
    pub metrics: GatewayMetrics,
    pub registry: Registry,
}

impl AppState {
    pub fn new(config: GatewayConfig) -> Self {
        let store = Arc::new(ConversationStore::new(config.store.max_conversations));
        let queue = Arc::new(SingleFlightQueue::new(lumogate_core::config::DEFAULT_QUEUE_CAPACITY));

        let auth_source = Arc::new(StaticAuthTokenSource::new(config.auth.api_key.clone()));
        let transport = Arc::new(ReqwestTransport::new(config.upstream.base_url.clone(), auth_source));

        // Out-of-scope collaborator: the real recipient PGP public key is
        // provisioned at deploy time. This tag-prefix stub keeps the U2L
        // envelope's wrap/unwrap shape exercised end-to-end until then.
        let pgp: Arc<dyn PgpEncryptor> = Arc::new(StaticPublicKeyEncryptor { tag: "LUMOGATE_PGP:" });
        let upstream = Arc::new(UpstreamClient::new(transport, pgp));

        // A deterministic placeholder master key until a real vault-backed
        // one is wired in at deploy time (see `lumogate_crypto::keys`).
        let master = MasterKey::from_bytes([0u8; 32]);
        let sync_keys = Arc::new(SyncKeyManager::new(master));

        let sync = if config.sync.enabled {
            let backend: Arc<dyn SyncBackend> =
                Arc::new(ReqwestSyncBackend::new(config.upstream.base_url.clone(), config.auth.api_key.clone()));
            Some(Arc::new(SyncEngine::new(store.clone(), sync_keys.clone(), backend)))
        } else {
            None
        };

        let registry = Registry::new();
        let metrics = GatewayMetrics::new(&registry);

        Self { config, store, queue, upstream, sync, sync_keys, metrics, registry }
    }
}

/// Assemble the full Axum router. `/health` and `/metrics` are
/// unauthenticated (scrapers and liveness probes don't carry the gateway's
/// API key); every `/v1/*` route requires it.
pub fn build_router(state: Arc<AppState>) -> axum::Router {
    use axum::routing::{get, post};

    let v1 = axum::Router::new()
        .route("/v1/models", get(crate::http::models::list_models))
        .route("/v1/chat/completions", post(crate::http::chat_completions::chat_completions))
        .route("/v1/responses", post(crate::http::responses::responses))
        .layer(axum::middleware::from_fn_with_state(state.clone(), crate::auth::require_api_key));

    axum::Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/metrics", get(crate::http::metrics::metrics_handler))
        .merge(v1)
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
