//! API error types and helpers.
//!
//! # Purpose and responsibility
//! Centralizes HTTP error response construction so every endpoint returns the
//! same `{code, message, request_id}` shape.
//!
//! # Key invariants and assumptions
//! - Error responses include a stable `code` and a human-readable `message`.
//! - Every credential failure maps to the same 401 body. Expired, revoked,
//!   reused and unknown credentials are indistinguishable to the client.
//!
//! # Security considerations
//! - Precise failure reasons are logged server-side only.
//! - Internal errors log details but return generic messages.
use crate::api::types::ErrorResponse;
use crate::auth::error::AuthError;
use crate::store::StoreError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;

/// Message returned for every rejected credential.
pub const INVALID_CREDENTIALS: &str = "invalid credentials";

/// Structured API error returned by handlers.
///
/// # Example
/// ```rust
/// use axum::http::StatusCode;
/// use catalog_auth::api::error::ApiError;
/// use catalog_auth::api::types::ErrorResponse;
///
/// let err = ApiError {
///     status: StatusCode::NOT_FOUND,
///     body: ErrorResponse {
///         code: "not_found".to_string(),
///         message: "missing".to_string(),
///         request_id: None,
///     },
/// };
/// ```
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn api_error(status: StatusCode, code: &str, message: &str) -> ApiError {
    ApiError {
        status,
        body: ErrorResponse {
            code: code.to_string(),
            message: message.to_string(),
            request_id: None,
        },
    }
}

/// Build a 404 Not Found error.
pub fn api_not_found(message: &str) -> ApiError {
    api_error(StatusCode::NOT_FOUND, "not_found", message)
}

/// Build a 404 error for disabled features.
///
/// Uses NOT_FOUND so a disabled surface looks the same as a missing one.
pub fn api_not_enabled(message: &str) -> ApiError {
    api_error(StatusCode::NOT_FOUND, "not_enabled", message)
}

/// Build a 500 Internal Server Error from a store error.
///
/// Logs the store error and returns a generic internal error response.
pub fn api_internal(message: &str, err: &StoreError) -> ApiError {
    tracing::error!(error = ?err, "catalog-auth storage error");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

/// Build a 500 Internal Server Error without a store error.
pub fn api_internal_message(message: &str) -> ApiError {
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

/// Build a 401 Unauthorized error.
pub fn api_unauthorized(message: &str) -> ApiError {
    api_error(StatusCode::UNAUTHORIZED, "unauthorized", message)
}

/// Map an [`AuthError`] to the generic 401 or to a 500.
///
/// `operation` only labels the log line.
pub fn api_auth_error(operation: &str, err: &AuthError) -> ApiError {
    if err.is_client_error() {
        match err {
            AuthError::IdentityProviderUnavailable(_) => {
                tracing::error!(operation, reason = err.reason(), error = %err, "identity provider unavailable");
            }
            _ => {
                tracing::info!(operation, reason = err.reason(), error = %err, "credentials rejected");
            }
        }
        return api_unauthorized(INVALID_CREDENTIALS);
    }
    tracing::error!(operation, reason = err.reason(), error = %err, "auth operation failed");
    api_internal_message("internal error")
}
