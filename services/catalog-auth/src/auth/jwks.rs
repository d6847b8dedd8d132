//! JWKS publication for session-token signing keys.
//!
//! # Purpose
//! Translate stored RSA public keys into RFC 7517 JWKs and serve them at
//! `GET /.well-known/jwks.json` so catalog services can verify session tokens
//! without access to private key material.
//!
//! # Key invariants
//! - Only the public modulus (`n`) and exponent (`e`) are exported.
//! - Revoked keys are never published.
//! - A key whose PEM fails to parse is skipped, not fatal for the whole set.
//!
//! # Security boundary
//! This is where public key material leaves the service. The conversion only
//! ever reads `public_key_pem`.
use crate::api::error::{ApiError, api_internal_message};
use crate::app::AppState;
use crate::auth::keys::KeyError;
use crate::model::SigningKey;
use axum::Json;
use axum::extract::State;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rsa::RsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[utoipa::path(
    get,
    path = "/.well-known/jwks.json",
    tag = "auth",
    responses((status = 200, description = "Session token signing keys", body = JwksResponse))
)]
pub async fn jwks(State(state): State<AppState>) -> Result<Json<JwksResponse>, ApiError> {
    let keys = state.key_manager.get_jwks_public_keys().await.map_err(|err| {
        tracing::error!(error = %err, "failed to load signing keys for jwks");
        api_internal_message("failed to load signing keys")
    })?;
    Ok(Json(JwksResponse { keys }))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct JwkResponse {
    pub kty: String,
    pub kid: String,
    #[serde(rename = "use")]
    pub use_field: String,
    pub alg: String,
    pub n: String,
    pub e: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct JwksResponse {
    pub keys: Vec<JwkResponse>,
}

/// Convert the public half of a stored key into a JWK.
pub fn public_jwk(key: &SigningKey) -> Result<JwkResponse, KeyError> {
    let public_key = RsaPublicKey::from_public_key_pem(&key.public_key_pem)
        .map_err(|err| KeyError::InvalidKey(format!("{}: {err}", key.kid)))?;
    Ok(JwkResponse {
        kty: "RSA".to_string(),
        kid: key.kid.clone(),
        use_field: "sig".to_string(),
        alg: alg_to_string(key.algorithm),
        n: URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
        e: URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
    })
}

pub(crate) fn alg_to_string(alg: jsonwebtoken::Algorithm) -> String {
    match alg {
        jsonwebtoken::Algorithm::RS256 => "RS256",
        jsonwebtoken::Algorithm::RS384 => "RS384",
        jsonwebtoken::Algorithm::RS512 => "RS512",
        jsonwebtoken::Algorithm::ES256 => "ES256",
        jsonwebtoken::Algorithm::ES384 => "ES384",
        jsonwebtoken::Algorithm::PS256 => "PS256",
        jsonwebtoken::Algorithm::PS384 => "PS384",
        jsonwebtoken::Algorithm::PS512 => "PS512",
        jsonwebtoken::Algorithm::HS256 => "HS256",
        jsonwebtoken::Algorithm::HS384 => "HS384",
        jsonwebtoken::Algorithm::HS512 => "HS512",
        jsonwebtoken::Algorithm::EdDSA => "EdDSA",
    }
    .to_string()
}
