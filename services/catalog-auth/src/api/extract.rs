//! Request extractor for bearer session tokens.
//!
//! # Purpose
//! Gives handlers (and downstream catalog routes) a verified `(user_id, role)`
//! without touching the token machinery directly.
//!
//! # Security
//! Tokens are verified against the configured default audience. Any failure,
//! including a missing header, yields the generic 401 body.
use crate::api::error::{ApiError, INVALID_CREDENTIALS, api_auth_error, api_unauthorized};
use crate::app::AppState;
use crate::model::Role;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub role: Role,
    pub permissions: Vec<String>,
    pub jti: String,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let Some(bearer) = extract_bearer(&parts.headers) else {
            tracing::debug!("missing bearer token");
            return Err(api_unauthorized(INVALID_CREDENTIALS));
        };
        let claims = state
            .sessions
            .verify_access_token(bearer, &state.default_audience)
            .await
            .map_err(|err| api_auth_error("authenticate", &err))?;
        Ok(AuthenticatedUser {
            user_id: claims.sub,
            role: claims.role,
            permissions: claims.permissions,
            jti: claims.jti,
        })
    }
}

pub(crate) fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(axum::http::header::AUTHORIZATION)?;
    let value = value.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token)
}
