use axum::extract::State;
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;

use crate::app::AppState;

/// GET /metrics — Prometheus text exposition format.
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> String {
    state.metrics.queue_depth.set(state.queue.depth().await as i64);

    let encoder = TextEncoder::new();
    let metric_families = state.registry.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
    String::from_utf8(buffer).unwrap_or_default()
}
