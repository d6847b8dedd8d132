//! Session token minting and verification.
//!
//! # Purpose
//! Issues the service's own RS256 access tokens and validates them for any
//! catalog component that needs a verified `(user_id, role)`.
//!
//! # Key invariants
//! - `iss` is always [`SESSION_ISSUER`]; `sub` is always the internal user id.
//! - Lifetime is fixed at [`ACCESS_TOKEN_TTL_SECS`]; tokens are never extended.
//! - The header `kid` selects exactly one verification key. A missing or
//!   revoked key fails closed; no other key is tried.
//! - Signing and verification are pinned to RS256, never taken from the token
//!   header or from a key's stored algorithm.
//!
//! # Security
//! Failure variants are precise for logs and metrics; the HTTP layer collapses
//! them into one generic 401.
use crate::auth::key_manager::KeyManager;
use crate::auth::keys::{KeyError, SESSION_SIGNING_ALGORITHM};
use crate::model::Role;
use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

pub const SESSION_ISSUER: &str = "catalog-auth";
pub const ACCESS_TOKEN_TTL_SECS: i64 = 30 * 60;

/// Claims carried by session tokens.
///
/// # Overview
/// `sub` is the internal user id, never the external provider subject.
/// `role` and `permissions` feed authorization in downstream services.
///
/// # Examples
/// ```rust
/// use catalog_auth::auth::session_token::SessionClaims;
/// use catalog_auth::model::Role;
///
/// let claims: SessionClaims = serde_json::from_value(serde_json::json!({
///     "iss": "catalog-auth",
///     "aud": "catalog-api",
///     "sub": "user-1",
///     "exp": 1_700_001_800,
///     "iat": 1_700_000_000,
///     "jti": "j-1",
///     "role": "seller",
/// }))
/// .expect("claims");
/// assert_eq!(claims.role, Role::Seller);
/// assert!(claims.permissions.is_empty());
/// ```
///
/// # Security
/// - Only trust these after [`TokenService::verify_token`] returned them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub iss: String,
    pub aud: String,
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    pub role: Role,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct IssuedAccessToken {
    pub token: String,
    pub expires_in: i64,
    pub claims: SessionClaims,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("malformed token")]
    MalformedToken,
    #[error("signing key not found")]
    KeyNotFound,
    #[error("token expired")]
    TokenExpired,
    #[error("token not yet valid")]
    TokenNotYetValid,
    #[error("signature invalid")]
    SignatureInvalid,
    #[error("audience mismatch")]
    AudienceMismatch,
    #[error("issuer mismatch")]
    IssuerMismatch,
    #[error("token signing failed: {0}")]
    Signing(String),
    #[error(transparent)]
    Key(KeyError),
}

impl TokenError {
    /// Stable label for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            TokenError::MalformedToken => "malformed",
            TokenError::KeyNotFound => "key_not_found",
            TokenError::TokenExpired => "expired",
            TokenError::TokenNotYetValid => "not_yet_valid",
            TokenError::SignatureInvalid => "signature_invalid",
            TokenError::AudienceMismatch => "audience_mismatch",
            TokenError::IssuerMismatch => "issuer_mismatch",
            TokenError::Signing(_) => "signing_error",
            TokenError::Key(_) => "key_error",
        }
    }

    /// True for failures caused by the presented token rather than the service.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, TokenError::Signing(_) | TokenError::Key(_))
    }
}

impl From<KeyError> for TokenError {
    fn from(value: KeyError) -> Self {
        match value {
            KeyError::KeyNotFound(_) => TokenError::KeyNotFound,
            other => TokenError::Key(other),
        }
    }
}

/// Mints and verifies session tokens with keys owned by [`KeyManager`].
///
/// # Overview
/// Stateless apart from the shared key manager; clones share the parsed-key
/// cache.
///
/// # Examples
/// ```no_run
/// # async fn demo() -> Result<(), catalog_auth::auth::session_token::TokenError> {
/// use catalog_auth::auth::key_manager::KeyManager;
/// use catalog_auth::auth::session_token::TokenService;
/// use catalog_auth::model::Role;
/// use catalog_auth::store::memory::InMemoryStore;
/// use std::sync::Arc;
///
/// let keys = Arc::new(KeyManager::new(Arc::new(InMemoryStore::new())));
/// let tokens = TokenService::new(keys);
/// let issued = tokens
///     .generate_access_token("user-1", Role::Customer, "catalog-api", None)
///     .await?;
/// let claims = tokens.verify_token(&issued.token, "catalog-api").await?;
/// assert_eq!(claims.sub, "user-1");
/// # Ok(())
/// # }
/// ```
///
/// # Security
/// - Only the `kid` is read from the token header before verification.
/// - The algorithm is fixed to [`SESSION_SIGNING_ALGORITHM`].
#[derive(Clone)]
pub struct TokenService {
    keys: Arc<KeyManager>,
}

impl TokenService {
    pub fn new(keys: Arc<KeyManager>) -> Self {
        Self { keys }
    }

    pub fn key_manager(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    /// Mint a session token for `user_id`.
    ///
    /// # Arguments
    /// - `role`: copied into the `role` claim.
    /// - `audience`: the `aud` claim. Callers check it against their
    ///   allowlist first.
    /// - `permissions`: optional extra grants; empty when `None`.
    ///
    /// # Returns
    /// - The compact JWT plus its claims and lifetime in seconds.
    ///
    /// # Errors
    /// - [`TokenError::Key`] when no usable signing key can be obtained, or
    ///   the active key is not an RS256 key.
    /// - [`TokenError::Signing`] when encoding fails.
    pub async fn generate_access_token(
        &self,
        user_id: &str,
        role: Role,
        audience: &str,
        permissions: Option<Vec<String>>,
    ) -> Result<IssuedAccessToken, TokenError> {
        let key = self.keys.get_active_signing_key().await?;
        let now = Utc::now().timestamp();
        let claims = SessionClaims {
            iss: SESSION_ISSUER.to_string(),
            aud: audience.to_string(),
            sub: user_id.to_string(),
            exp: now + ACCESS_TOKEN_TTL_SECS,
            iat: now,
            jti: uuid::Uuid::new_v4().to_string(),
            role,
            permissions: permissions.unwrap_or_default(),
        };

        if key.algorithm != SESSION_SIGNING_ALGORITHM {
            return Err(TokenError::Key(KeyError::UnsupportedAlgorithm(key.algorithm)));
        }
        let mut header = Header::new(SESSION_SIGNING_ALGORITHM);
        header.kid = Some(key.kid.clone());
        let encoding_key = self.keys.encoding_key(&key)?;
        let token = jsonwebtoken::encode(&header, &claims, &encoding_key)
            .map_err(|err| TokenError::Signing(err.to_string()))?;
        Ok(IssuedAccessToken {
            token,
            expires_in: ACCESS_TOKEN_TTL_SECS,
            claims,
        })
    }

    /// Verify a session token for `expected_audience`.
    ///
    /// # Overview
    /// Resolves the key named by the header `kid`, then checks signature,
    /// issuer, audience and the `exp`/`iat` window with zero leeway.
    ///
    /// # Errors
    /// - One [`TokenError`] variant per failure, for logs and metrics.
    /// - Every variant except [`TokenError::Key`] and [`TokenError::Signing`]
    ///   is a client error.
    ///
    /// # Panics
    /// - Does not panic.
    pub async fn verify_token(
        &self,
        token: &str,
        expected_audience: &str,
    ) -> Result<SessionClaims, TokenError> {
        let result = self.verify_inner(token, expected_audience).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(err) => err.reason(),
        };
        metrics::counter!("catalog_auth_token_verifications_total", "outcome" => outcome)
            .increment(1);
        if let Err(err) = &result {
            tracing::debug!(reason = err.reason(), "session token rejected");
        }
        result
    }

    async fn verify_inner(
        &self,
        token: &str,
        expected_audience: &str,
    ) -> Result<SessionClaims, TokenError> {
        let header = jsonwebtoken::decode_header(token).map_err(|_| TokenError::MalformedToken)?;
        let kid = header.kid.ok_or(TokenError::MalformedToken)?;
        let key = self.keys.verification_key(&kid).await?;
        if header.alg != SESSION_SIGNING_ALGORITHM || key.algorithm != SESSION_SIGNING_ALGORITHM {
            return Err(TokenError::SignatureInvalid);
        }

        let mut validation = Validation::new(SESSION_SIGNING_ALGORITHM);
        validation.leeway = 0;
        validation.set_issuer(&[SESSION_ISSUER]);
        validation.set_audience(&[expected_audience]);
        validation.set_required_spec_claims(&["exp", "iat", "iss", "aud", "sub"]);
        let data = jsonwebtoken::decode::<SessionClaims>(token, &key.decoding_key, &validation)
            .map_err(map_jwt_error)?;

        let claims = data.claims;
        let now = Utc::now().timestamp();
        if claims.exp <= now {
            return Err(TokenError::TokenExpired);
        }
        if claims.iat > now {
            return Err(TokenError::TokenNotYetValid);
        }
        Ok(claims)
    }
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> TokenError {
    match err.kind() {
        ErrorKind::ExpiredSignature => TokenError::TokenExpired,
        ErrorKind::ImmatureSignature => TokenError::TokenNotYetValid,
        ErrorKind::InvalidAudience => TokenError::AudienceMismatch,
        ErrorKind::InvalidIssuer => TokenError::IssuerMismatch,
        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => TokenError::SignatureInvalid,
        _ => TokenError::MalformedToken,
    }
}
