use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health — liveness probe, returns server metadata and in-memory
/// store size. Unauthenticated, matching the probe conventions of this
/// corpus's gateway.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "git_sha": env!("LUMOGATE_GIT_SHA"),
        "conversations_held": state.store.len(),
        "queue_depth": state.queue.depth().await,
        "sync_enabled": state.sync.is_some(),
    }))
}
