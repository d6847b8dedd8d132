//! Signing key records owned by the key manager.
//!
//! # Purpose
//! Describes one asymmetric key pair used to sign session tokens, along with
//! its lifecycle flags (active, rotated, revoked).
//!
//! # Key invariants
//! - At most one record has `is_active && !is_revoked` at any time.
//! - Revocation is logical; records are never hard-deleted so in-flight tokens
//!   can still be attributed to a key.
//! - `rotated_to_kid` is lineage bookkeeping and never used for verification.
//!
//! # Security
//! - `private_key_pem` must never be logged or serialized; `Debug` redacts it.
use chrono::{DateTime, Utc};
use jsonwebtoken::Algorithm;

#[derive(Clone)]
pub struct SigningKey {
    pub id: String,
    pub kid: String,
    pub algorithm: Algorithm,
    pub public_key_pem: String,
    pub private_key_pem: String,
    pub is_active: bool,
    pub is_revoked: bool,
    pub rotated_at: Option<DateTime<Utc>>,
    pub rotated_to_kid: Option<String>,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl SigningKey {
    /// True when this key may be used to sign new tokens.
    pub fn can_sign(&self) -> bool {
        self.is_active && !self.is_revoked
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("id", &self.id)
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("private_key_pem", &"<redacted>")
            .field("is_active", &self.is_active)
            .field("is_revoked", &self.is_revoked)
            .field("rotated_at", &self.rotated_at)
            .field("rotated_to_kid", &self.rotated_to_kid)
            .field("created_at", &self.created_at)
            .field("revoked_at", &self.revoked_at)
            .finish()
    }
}
