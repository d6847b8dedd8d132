//! HTTP API request/response types.
//!
//! # Purpose
//! Payload shapes for the auth REST API and OpenAPI schema generation.
use crate::model::{Role, User};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub const TOKEN_TYPE_BEARER: &str = "Bearer";

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct HealthStatus {
    pub status: String,
    pub storage: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub request_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct GoogleLoginRequest {
    pub id_token: String,
    pub audience: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct RefreshRequest {
    pub refresh_token: String,
    pub audience: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct LogoutRequest {
    #[serde(default)]
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct LoginResponse {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct TokenPairResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct LogoutResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct LogoutAllResponse {
    pub revoked: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct MeResponse {
    pub user_id: String,
    pub role: Role,
    pub permissions: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct KeyRotationResponse {
    pub kid: String,
    pub previous_kid: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct KeyRevocationResponse {
    pub kid: String,
    pub status: String,
}
