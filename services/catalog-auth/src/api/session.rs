//! Login, refresh and logout handlers.
//!
//! # Purpose and responsibility
//! Thin HTTP adapters over [`AuthSessionService`](crate::auth::session::AuthSessionService).
//!
//! # Key invariants and assumptions
//! - Credential failures of every kind return the same 401 body.
//! - `POST /auth/logout` returns 200 whether or not the token existed. Only a
//!   storage failure produces an error.
//!
//! # Security considerations
//! - Raw refresh tokens appear in responses only; they are never logged.
use crate::api::error::{ApiError, api_auth_error};
use crate::api::extract::AuthenticatedUser;
use crate::api::types::{
    ErrorResponse, GoogleLoginRequest, LoginResponse, LogoutAllResponse, LogoutRequest, LogoutResponse,
    MeResponse, RefreshRequest, TOKEN_TYPE_BEARER, TokenPairResponse,
};
use crate::app::AppState;
use crate::auth::session::ClientContext;
use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;

const MAX_DEVICE_INFO_LEN: usize = 256;

fn client_context(headers: &HeaderMap) -> ClientContext {
    let device_info = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(|agent| agent.chars().take(MAX_DEVICE_INFO_LEN).collect::<String>());
    let ip_address = headers
        .get("X-Forwarded-For")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty());
    ClientContext {
        device_info,
        ip_address,
    }
}

#[utoipa::path(
    post,
    path = "/auth/google",
    tag = "auth",
    request_body = GoogleLoginRequest,
    responses(
        (status = 200, description = "Session issued", body = LoginResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 500, description = "Internal error", body = ErrorResponse)
    )
)]
pub async fn google_login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<GoogleLoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let login = state
        .sessions
        .login_with_google(&body.id_token, &body.audience, client_context(&headers))
        .await
        .map_err(|err| api_auth_error("login", &err))?;
    Ok(Json(LoginResponse {
        user: login.user,
        access_token: login.access_token.token,
        refresh_token: login.refresh_token.token,
        token_type: TOKEN_TYPE_BEARER.to_string(),
        expires_in: login.access_token.expires_in,
    }))
}

#[utoipa::path(
    post,
    path = "/auth/refresh",
    tag = "auth",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Rotated token pair", body = TokenPairResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 500, description = "Internal error", body = ErrorResponse)
    )
)]
pub async fn refresh(
    State(state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<TokenPairResponse>, ApiError> {
    let rotated = state
        .sessions
        .refresh(&body.refresh_token, &body.audience)
        .await
        .map_err(|err| api_auth_error("refresh", &err))?;
    Ok(Json(TokenPairResponse {
        access_token: rotated.access_token.token,
        refresh_token: rotated.refresh_token.token,
        token_type: TOKEN_TYPE_BEARER.to_string(),
        expires_in: rotated.access_token.expires_in,
    }))
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "auth",
    request_body = LogoutRequest,
    responses(
        (status = 200, description = "Logged out", body = LogoutResponse),
        (status = 500, description = "Internal error", body = ErrorResponse)
    )
)]
pub async fn logout(
    State(state): State<AppState>,
    body: Option<Json<LogoutRequest>>,
) -> Result<Json<LogoutResponse>, ApiError> {
    // Unreadable bodies and empty tokens still answer 200.
    let token = body
        .map(|Json(body)| body.refresh_token)
        .unwrap_or_default();
    if !token.is_empty() {
        state
            .sessions
            .logout(&token)
            .await
            .map_err(|err| api_auth_error("logout", &err))?;
    }
    Ok(Json(LogoutResponse {
        status: "ok".to_string(),
    }))
}

#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "auth",
    responses(
        (status = 200, description = "Authenticated caller", body = MeResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse)
    )
)]
pub async fn me(user: AuthenticatedUser) -> Json<MeResponse> {
    Json(MeResponse {
        user_id: user.user_id,
        role: user.role,
        permissions: user.permissions,
    })
}

#[utoipa::path(
    post,
    path = "/auth/logout-all",
    tag = "auth",
    responses(
        (status = 200, description = "Every refresh token of the caller revoked", body = LogoutAllResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 500, description = "Internal error", body = ErrorResponse)
    )
)]
pub async fn logout_all(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<LogoutAllResponse>, ApiError> {
    let revoked = state
        .sessions
        .logout_everywhere(&user.user_id)
        .await
        .map_err(|err| api_auth_error("logout_all", &err))?;
    Ok(Json(LogoutAllResponse { revoked }))
}
