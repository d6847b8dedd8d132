//! Google ID token verification.
//!
//! # Purpose
//! Verify an externally issued identity assertion against Google's published
//! signing keys and reduce it to an [`ExternalIdentity`]. This is the only place
//! external tokens are trusted; nothing derived from them is stored except the
//! stable subject id and email.
//!
//! # Key invariants
//! - Only RS256 is accepted, and the JWK must agree with the header algorithm.
//! - `iss` must be one of the configured Google issuers and `aud` one of the
//!   configured OAuth client ids.
//! - `email_verified` must be `true` (Google sometimes sends the string `"true"`).
//! - Any missing claim or failed check yields an error; a partially trusted
//!   identity is never returned.
//!
//! # Concurrency model
//! The JWKS cache is a `DashMap` keyed by URL and shared across tasks. A `kid`
//! miss forces one refresh to pick up Google key rotation.
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use jsonwebtoken::jwk::{AlgorithmParameters, JwkSet, KeyAlgorithm};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const GOOGLE_PROVIDER: &str = "google";
pub const GOOGLE_ISSUERS: [&str; 2] = ["https://accounts.google.com", "accounts.google.com"];

/// Verified identity extracted from an external assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    pub provider: String,
    pub subject: String,
    pub email: String,
    pub name: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("identity verification failed: {0}")]
    VerificationFailed(String),
    #[error("identity provider unavailable: {0}")]
    ProviderUnavailable(String),
}

fn failed(reason: impl Into<String>) -> IdentityError {
    IdentityError::VerificationFailed(reason.into())
}

/// Verifies external identity assertions.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Verify `id_token` and extract the identity it asserts.
    ///
    /// # Arguments
    /// - `id_token`: the raw assertion as presented by the client.
    /// - `expected_audiences`: OAuth client ids the assertion may be issued to.
    ///
    /// # Errors
    /// - [`IdentityError::VerificationFailed`] for any bad, expired or
    ///   incomplete assertion.
    /// - [`IdentityError::ProviderUnavailable`] when the provider's keys
    ///   cannot be fetched.
    async fn verify_external_identity(
        &self,
        id_token: &str,
        expected_audiences: &[String],
    ) -> Result<ExternalIdentity, IdentityError>;
}

#[derive(Debug, Clone)]
pub struct GoogleBridgeConfig {
    pub jwks_url: String,
    pub issuers: Vec<String>,
    pub jwks_ttl: Duration,
    pub clock_skew_seconds: u64,
}

impl GoogleBridgeConfig {
    pub fn new(jwks_url: impl Into<String>, clock_skew_seconds: u64) -> Self {
        Self {
            jwks_url: jwks_url.into(),
            issuers: GOOGLE_ISSUERS.iter().map(|iss| iss.to_string()).collect(),
            jwks_ttl: Duration::from_secs(3600),
            clock_skew_seconds,
        }
    }
}

#[derive(Debug, Clone)]
struct CachedJwks {
    jwks: JwkSet,
    expires_at: Instant,
}

/// [`IdentityVerifier`] for Google ID tokens.
///
/// # Overview
/// Fetches Google's JWKS over HTTPS and caches it for
/// [`GoogleBridgeConfig::jwks_ttl`]. An unknown `kid` forces one refetch
/// before the assertion is rejected.
///
/// # Examples
/// ```no_run
/// # async fn demo() -> Result<(), catalog_auth::auth::oidc::IdentityError> {
/// use catalog_auth::auth::oidc::{GoogleBridgeConfig, GoogleIdentityBridge, IdentityVerifier};
///
/// let bridge = GoogleIdentityBridge::new(GoogleBridgeConfig::new(
///     "https://www.googleapis.com/oauth2/v3/certs",
///     60,
/// ));
/// let identity = bridge
///     .verify_external_identity("eyJ...", &["client-id.apps.googleusercontent.com".to_string()])
///     .await?;
/// println!("{} <{}>", identity.subject, identity.email);
/// # Ok(())
/// # }
/// ```
///
/// # Security
/// - Only RS256 assertions are accepted.
/// - The returned email is lowercased and always verified by Google.
///
/// # Performance
/// - One HTTP round trip per TTL period, plus one per unknown `kid`.
#[derive(Clone)]
pub struct GoogleIdentityBridge {
    client: reqwest::Client,
    jwks_cache: Arc<DashMap<String, CachedJwks>>,
    config: GoogleBridgeConfig,
}

impl GoogleIdentityBridge {
    pub fn new(config: GoogleBridgeConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            jwks_cache: Arc::new(DashMap::new()),
            config,
        }
    }

    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, IdentityError> {
        let jwks = self.get_jwks().await?;
        if let Some(key) = find_jwk(&jwks, kid) {
            ensure_rsa_jwk(key)?;
            return DecodingKey::from_jwk(key).map_err(|err| failed(format!("jwk: {err}")));
        }
        let refreshed = self.refresh_jwks().await?;
        let key = find_jwk(&refreshed, kid).ok_or_else(|| failed("unknown kid"))?;
        ensure_rsa_jwk(key)?;
        DecodingKey::from_jwk(key).map_err(|err| failed(format!("jwk: {err}")))
    }

    async fn get_jwks(&self) -> Result<JwkSet, IdentityError> {
        if let Some(entry) = self.jwks_cache.get(&self.config.jwks_url) {
            if entry.expires_at > Instant::now() {
                return Ok(entry.jwks.clone());
            }
        }
        self.refresh_jwks().await
    }

    async fn refresh_jwks(&self) -> Result<JwkSet, IdentityError> {
        let response = self
            .client
            .get(&self.config.jwks_url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| IdentityError::ProviderUnavailable(err.to_string()))?;
        let jwks: JwkSet = response
            .json()
            .await
            .map_err(|err| IdentityError::ProviderUnavailable(err.to_string()))?;
        self.jwks_cache.insert(
            self.config.jwks_url.clone(),
            CachedJwks {
                jwks: jwks.clone(),
                expires_at: Instant::now() + self.config.jwks_ttl,
            },
        );
        Ok(jwks)
    }
}

#[async_trait]
impl IdentityVerifier for GoogleIdentityBridge {
    async fn verify_external_identity(
        &self,
        id_token: &str,
        expected_audiences: &[String],
    ) -> Result<ExternalIdentity, IdentityError> {
        if expected_audiences.is_empty() {
            return Err(failed("no accepted audiences configured"));
        }
        let header = decode_header(id_token).map_err(|_| failed("malformed token"))?;
        if header.alg != Algorithm::RS256 {
            return Err(failed("unsupported algorithm"));
        }
        let kid = header.kid.as_deref().ok_or_else(|| failed("missing kid"))?;
        let decoding_key = self.decoding_key(kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&self.config.issuers);
        validation.set_audience(expected_audiences);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.leeway = self.config.clock_skew_seconds;
        let data = decode::<Value>(id_token, &decoding_key, &validation)
            .map_err(|err| failed(format!("jwt: {err}")))?;
        let claims = data.claims;
        validate_iat(&claims, self.config.clock_skew_seconds)?;

        let subject = extract_string_claim(&claims, "sub")
            .filter(|sub| !sub.is_empty())
            .ok_or_else(|| failed("missing sub"))?;
        let email = extract_string_claim(&claims, "email")
            .filter(|email| !email.is_empty())
            .ok_or_else(|| failed("missing email"))?;
        if !email_verified(&claims) {
            return Err(failed("email not verified"));
        }
        Ok(ExternalIdentity {
            provider: GOOGLE_PROVIDER.to_string(),
            subject,
            email: email.to_lowercase(),
            name: extract_string_claim(&claims, "name"),
        })
    }
}

fn ensure_rsa_jwk(jwk: &jsonwebtoken::jwk::Jwk) -> Result<(), IdentityError> {
    // Google omits `alg` on some keys; when present it must agree.
    if let Some(key_alg) = jwk.common.key_algorithm {
        if !matches!(key_alg, KeyAlgorithm::RS256) {
            return Err(failed("jwk alg mismatch"));
        }
    }
    match &jwk.algorithm {
        AlgorithmParameters::RSA(_) => Ok(()),
        _ => Err(failed("jwk kty mismatch")),
    }
}

fn find_jwk<'a>(jwks: &'a JwkSet, kid: &str) -> Option<&'a jsonwebtoken::jwk::Jwk> {
    jwks.keys
        .iter()
        .find(|key| key.common.key_id.as_deref() == Some(kid))
}

fn extract_string_claim(claims: &Value, name: &str) -> Option<String> {
    claims
        .get(name)
        .and_then(|value| value.as_str())
        .map(|value| value.to_string())
}

fn email_verified(claims: &Value) -> bool {
    match claims.get("email_verified") {
        Some(Value::Bool(value)) => *value,
        Some(Value::String(value)) => value == "true",
        _ => false,
    }
}

fn validate_iat(claims: &Value, leeway_seconds: u64) -> Result<(), IdentityError> {
    let iat = claims
        .get("iat")
        .and_then(|value| value.as_i64())
        .ok_or_else(|| failed("missing iat"))?;
    if iat > Utc::now().timestamp() + leeway_seconds as i64 {
        return Err(failed("iat in future"));
    }
    Ok(())
}
