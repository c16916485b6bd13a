use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use lumogate_upstream::{AuthTokenSource, UpstreamError};

use crate::app::AppState;

/// Stands in for the out-of-scope auth-token vault: hands back the single
/// configured bearer token rather than acquiring/refreshing one from a
/// real identity provider.
pub struct StaticAuthTokenSource {
    token: String,
}

impl StaticAuthTokenSource {
    pub fn new(token: String) -> Self {
        Self { token }
    }
}

#[async_trait]
impl AuthTokenSource for StaticAuthTokenSource {
    async fn bearer_token(&self) -> Result<String, UpstreamError> {
        Ok(self.token.clone())
    }

    fn device_uid(&self) -> String {
        "lumogate-local".to_string()
    }

    fn app_version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }
}

/// Requires `Authorization: Bearer <api_key>` on every request, matching
/// the gateway's own configured key — not the upstream token, which never
/// reaches a client.
pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let presented = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(token) if token == state.config.auth.api_key => Ok(next.run(req).await),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}
