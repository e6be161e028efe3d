//! Pre-shared bearer token auth for the remote listener's HTTP surface.
//!
//! Simpler than the per-peer hashed-key cache a multi-tenant hub needs:
//! the remote listener has exactly one shared secret (or none, if
//! `remote.auth_token` is unset — useful for trusted-LAN deployments).

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use super::RemoteState;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Marker extractor: presence means the request's bearer token matched
/// (or no token was configured).
pub struct RemoteAuth;

#[async_trait]
impl FromRequestParts<Arc<RemoteState>> for RemoteAuth {
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<RemoteState>,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = &state.auth_token else {
            return Ok(RemoteAuth);
        };

        let presented = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        match presented {
            Some(token) if token == expected => Ok(RemoteAuth),
            _ => Err((
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse { error: "missing or invalid bearer token".to_string() }),
            )),
        }
    }
}
