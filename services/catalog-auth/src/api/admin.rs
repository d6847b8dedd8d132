//! Operator endpoints for signing-key administration.
//!
//! # Purpose
//! Exposes `KeyManager::rotate_keys` and `KeyManager::revoke_key` behind an
//! operator token sent in `X-Catalog-Admin-Token`.
//!
//! # Security
//! - Routes answer 404 `not_enabled` when no admin token is configured.
//! - The presented token is compared in constant time.
use crate::api::error::{
    ApiError, api_internal, api_internal_message, api_not_enabled, api_not_found,
    api_unauthorized,
};
use crate::api::types::{ErrorResponse, KeyRevocationResponse, KeyRotationResponse};
use crate::app::AppState;
use crate::auth::keys::KeyError;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;

pub const ADMIN_TOKEN_HEADER: &str = "X-Catalog-Admin-Token";

#[utoipa::path(
    post,
    path = "/admin/keys/rotate",
    tag = "admin",
    responses(
        (status = 200, description = "New active signing key", body = KeyRotationResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 404, description = "Not enabled", body = ErrorResponse)
    )
)]
pub async fn rotate_keys(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<KeyRotationResponse>, ApiError> {
    ensure_admin_authorized(&state, &headers)?;
    let rotation = state
        .key_manager
        .rotate_keys()
        .await
        .map_err(|err| key_error("failed to rotate signing key", err))?;
    Ok(Json(KeyRotationResponse {
        kid: rotation.key.kid,
        previous_kid: rotation.previous_kid,
    }))
}

#[utoipa::path(
    post,
    path = "/admin/keys/{kid}/revoke",
    tag = "admin",
    params(("kid" = String, Path, description = "Key identifier")),
    responses(
        (status = 200, description = "Key revoked", body = KeyRevocationResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 404, description = "Unknown kid or not enabled", body = ErrorResponse)
    )
)]
pub async fn revoke_key(
    Path(kid): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<KeyRevocationResponse>, ApiError> {
    ensure_admin_authorized(&state, &headers)?;
    state
        .key_manager
        .revoke_key(&kid)
        .await
        .map_err(|err| key_error("failed to revoke signing key", err))?;
    Ok(Json(KeyRevocationResponse {
        kid,
        status: "revoked".to_string(),
    }))
}

fn key_error(message: &str, err: KeyError) -> ApiError {
    match err {
        KeyError::KeyNotFound(_) => api_not_found("signing key not found"),
        KeyError::Store(store) => api_internal(message, &store),
        other => {
            tracing::error!(error = %other, "{message}");
            api_internal_message(message)
        }
    }
}

fn ensure_admin_authorized(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.admin_token.as_deref() else {
        return Err(api_not_enabled("key administration not enabled"));
    };
    let token = match headers.get(ADMIN_TOKEN_HEADER) {
        Some(value) => value
            .to_str()
            .map_err(|_| api_unauthorized("invalid admin token"))?,
        None => return Err(api_unauthorized("missing admin token")),
    };
    if !constant_time_eq(token.as_bytes(), expected.as_bytes()) {
        tracing::warn!("rejected admin token");
        return Err(api_unauthorized("invalid admin token"));
    }
    Ok(())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (left, right) in a.iter().zip(b.iter()) {
        diff |= left ^ right;
    }
    diff == 0
}
