//! OpenAPI schema aggregation for the auth API.
//!
//! # Purpose
//! Collects all routes and schema types into a single OpenAPI document served
//! at `/v1/openapi.json`.
use crate::api::{
    admin, session, system,
    types::{
        ErrorResponse, GoogleLoginRequest, HealthStatus, KeyRevocationResponse,
        KeyRotationResponse, LoginResponse, LogoutAllResponse, LogoutRequest, LogoutResponse,
        MeResponse, RefreshRequest, TokenPairResponse,
    },
};
use crate::auth::jwks::{self, JwkResponse, JwksResponse};
use crate::model::{Role, User};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "catalog-auth",
        version = "v1",
        description = "Catalog trust and session token service"
    ),
    paths(
        system::system_health,
        jwks::jwks,
        session::google_login,
        session::refresh,
        session::logout,
        session::me,
        session::logout_all,
        admin::rotate_keys,
        admin::revoke_key
    ),
    components(schemas(
        HealthStatus,
        ErrorResponse,
        GoogleLoginRequest,
        RefreshRequest,
        LogoutRequest,
        LoginResponse,
        TokenPairResponse,
        LogoutResponse,
        LogoutAllResponse,
        MeResponse,
        KeyRotationResponse,
        KeyRevocationResponse,
        JwkResponse,
        JwksResponse,
        User,
        Role
    )),
    tags(
        (name = "system", description = "System and discovery endpoints"),
        (name = "auth", description = "Login, refresh, logout and JWKS"),
        (name = "admin", description = "Signing-key administration")
    )
)]
pub struct ApiDoc;
