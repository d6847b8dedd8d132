//! Signing key generation for session tokens.
//!
//! # Purpose
//! Produce fresh RSA key pairs, PEM encoded, that the key manager persists and
//! later exposes (public halves only) via JWKS.
//!
//! # Key invariants
//! - Keys are RSA with a modulus of at least [`RSA_KEY_BITS`] bits.
//! - The private key is PKCS#8 PEM and the public key is SPKI PEM, which is
//!   what `jsonwebtoken`'s `from_rsa_pem` constructors accept.
//! - `kid` values are random and not secret.
//!
//! # Security
//! Private key material must never be logged or serialized outside storage.
use crate::model::SigningKey;
use chrono::Utc;
use jsonwebtoken::Algorithm;
use rand::RngCore;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use thiserror::Error;

use crate::store::StoreError;

pub const RSA_KEY_BITS: usize = 2048;

/// The only algorithm session tokens are signed and accepted with.
pub const SESSION_SIGNING_ALGORITHM: Algorithm = Algorithm::RS256;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("signing key not found: {0}")]
    KeyNotFound(String),
    #[error("unsupported signing algorithm {0:?}")]
    UnsupportedAlgorithm(Algorithm),
    #[error("key generation failed: {0}")]
    Generation(String),
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub fn is_rsa_algorithm(algorithm: Algorithm) -> bool {
    matches!(
        algorithm,
        Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512
    )
}

/// Generate a new, not yet persisted, signing key.
///
/// The returned record is marked active; whether it actually becomes the
/// active key is decided by the store. RSA generation is CPU heavy, so async
/// callers should run this on a blocking thread.
pub fn generate_signing_key(algorithm: Algorithm) -> Result<SigningKey, KeyError> {
    if !is_rsa_algorithm(algorithm) {
        return Err(KeyError::UnsupportedAlgorithm(algorithm));
    }
    let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), RSA_KEY_BITS)
        .map_err(|err| KeyError::Generation(err.to_string()))?;
    let public_key = RsaPublicKey::from(&private_key);
    let private_key_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|err| KeyError::Generation(err.to_string()))?
        .to_string();
    let public_key_pem = public_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|err| KeyError::Generation(err.to_string()))?;

    let mut kid_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut kid_bytes);

    Ok(SigningKey {
        id: uuid::Uuid::new_v4().to_string(),
        kid: hex::encode(kid_bytes),
        algorithm,
        public_key_pem,
        private_key_pem,
        is_active: true,
        is_revoked: false,
        rotated_at: None,
        rotated_to_kid: None,
        created_at: Utc::now(),
        revoked_at: None,
    })
}
