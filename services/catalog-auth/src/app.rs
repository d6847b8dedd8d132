//! HTTP application wiring.
//!
//! # Purpose
//! Builds the Axum router, configures middleware, and assembles the shared
//! application state injected into handlers.
//!
//! # Notes
//! [`build_state`] is generic over the store so tests can wire the in-memory
//! backend and a fake identity verifier without touching `main`.
use crate::api;
use crate::auth;
use crate::auth::key_manager::KeyManager;
use crate::auth::oidc::IdentityVerifier;
use crate::auth::refresh::RefreshTokenStore;
use crate::auth::session::{AuthSessionService, SessionConfig};
use crate::auth::session_token::TokenService;
use crate::observability;
use crate::store::AuthStore;
use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_opentelemetry::OpenTelemetrySpanExt;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn AuthStore>,
    pub key_manager: Arc<KeyManager>,
    pub sessions: Arc<AuthSessionService>,
    /// Audience bearer tokens are verified against by the request extractor.
    pub default_audience: String,
    pub admin_token: Option<String>,
}

/// Settings that shape [`AppState`] independently of the backend.
#[derive(Debug, Clone)]
pub struct StateSettings {
    pub session: SessionConfig,
    pub default_audience: String,
    pub admin_token: Option<String>,
}

pub fn build_state<S>(
    store: Arc<S>,
    identity: Arc<dyn IdentityVerifier>,
    settings: StateSettings,
) -> AppState
where
    S: AuthStore + 'static,
{
    let key_manager = Arc::new(KeyManager::new(store.clone()));
    let tokens = TokenService::new(key_manager.clone());
    let sessions = AuthSessionService::new(
        identity,
        store.clone(),
        tokens,
        RefreshTokenStore::new(store.clone()),
        settings.session,
    );
    AppState {
        store,
        key_manager,
        sessions: Arc::new(sessions),
        default_audience: settings.default_audience,
        admin_token: settings
            .admin_token
            .filter(|token| !token.trim().is_empty()),
    }
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            let parent = observability::trace_context_from_headers(request.headers());
            let span = tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version()
            );
            span.set_parent(parent);
            span
        });

    Router::new()
        .route("/v1/system/health", get(api::system::system_health))
        .route("/v1/openapi.json", get(api::system::openapi_json))
        .route("/.well-known/jwks.json", get(auth::jwks::jwks))
        .route("/auth/google", post(api::session::google_login))
        .route("/auth/refresh", post(api::session::refresh))
        .route("/auth/logout", post(api::session::logout))
        .route("/auth/logout-all", post(api::session::logout_all))
        .route("/auth/me", get(api::session::me))
        .route("/admin/keys/rotate", post(api::admin::rotate_keys))
        .route("/admin/keys/:kid/revoke", post(api::admin::revoke_key))
        .layer(trace_layer)
        .with_state(state)
}
