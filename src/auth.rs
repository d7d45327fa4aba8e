use crate::config::ApiConfig;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::warn;

#[derive(Clone)]
pub struct AuthState {
    pub config: ApiConfig,
}

/// Shared-secret auth: `x-api-key` or `Authorization: Bearer <token>`,
/// constant-time compared against `config.api_key`. OPTIONS requests bypass
/// auth so CORS preflight succeeds.
pub async fn auth_middleware(
    State(auth_state): State<Arc<AuthState>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, Response> {
    if request.method() == Method::OPTIONS {
        return Ok(next.run(request).await);
    }

    let path = request.uri().path().to_string();
    let unauthorized = || {
        (StatusCode::UNAUTHORIZED, Json(json!({"error": "Unauthorized"}))).into_response()
    };

    let provided_key = if let Some(header_value) = headers.get("x-api-key") {
        header_value.to_str().map_err(|_| unauthorized())?
    } else if let Some(header_value) = headers.get("authorization") {
        let auth_str = header_value.to_str().map_err(|_| unauthorized())?;
        auth_str.strip_prefix("Bearer ").ok_or_else(unauthorized)?
    } else {
        return Err(unauthorized());
    };

    match &auth_state.config.api_key {
        Some(expected_key) => {
            if provided_key.as_bytes().ct_eq(expected_key.as_bytes()).into() {
                Ok(next.run(request).await)
            } else {
                warn!(path, "authentication failed: invalid key");
                Err(unauthorized())
            }
        }
        None => {
            warn!("auth middleware active but no API_KEY configured");
            Err((StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "Internal Server Error"}))).into_response())
        }
    }
}

pub fn create_auth_state(config: ApiConfig) -> Arc<AuthState> {
    Arc::new(AuthState { config })
}
