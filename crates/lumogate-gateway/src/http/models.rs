use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /v1/models — lists the single model id this gateway exposes, in
/// the OpenAI `list` envelope clients expect.
pub async fn list_models(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "object": "list",
        "data": [{
            "id": state.config.server.model,
            "object": "model",
            "created": 0,
            "owned_by": "lumogate",
        }],
    }))
}
