//! Signing-key lifecycle: lazy creation, rotation, revocation and lookup.
//!
//! # Purpose
//! Owns the set of RSA keys that sign session tokens. Every other component
//! reaches key material through [`KeyManager`].
//!
//! # Key invariants
//! - At most one key is active and unrevoked. Concurrent lazy creation is
//!   resolved by the store (`insert_signing_key_if_none_active`); the loser
//!   re-reads instead of inserting a second key.
//! - Verification keys are looked up by `kid` in the store on every call, so
//!   revocation takes effect immediately on every instance sharing the store.
//! - Rotated (deactivated) keys stay available for verification until revoked.
//!
//! # Concurrency model
//! The parsed-key cache is a `std::sync::RwLock<HashMap>`; it is never held
//! across an `.await`. RSA generation runs on the blocking pool.
use crate::auth::jwks::{JwkResponse, public_jwk};
use crate::auth::keys::{KeyError, SESSION_SIGNING_ALGORITHM, generate_signing_key};
use crate::model::SigningKey;
use crate::store::SigningKeyStore;
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Attempts at resolving a lazy-creation race before giving up.
const ACTIVE_KEY_ATTEMPTS: usize = 3;

/// Outcome of [`KeyManager::rotate_keys`].
#[derive(Debug, Clone)]
pub struct KeyRotation {
    pub key: SigningKey,
    pub previous_kid: Option<String>,
}

/// Key resolved for verification.
#[derive(Clone)]
pub struct VerificationKey {
    pub kid: String,
    pub algorithm: Algorithm,
    pub decoding_key: DecodingKey,
}

#[derive(Default)]
struct KeyCache {
    encoding: RwLock<HashMap<String, EncodingKey>>,
    decoding: RwLock<HashMap<String, DecodingKey>>,
}

impl KeyCache {
    fn encoding_key(&self, key: &SigningKey) -> Result<EncodingKey, KeyError> {
        if let Ok(guard) = self.encoding.read() {
            if let Some(cached) = guard.get(&key.kid) {
                return Ok(cached.clone());
            }
        }
        let parsed = EncodingKey::from_rsa_pem(key.private_key_pem.as_bytes())
            .map_err(|err| KeyError::InvalidKey(format!("{}: {err}", key.kid)))?;
        if let Ok(mut guard) = self.encoding.write() {
            guard.insert(key.kid.clone(), parsed.clone());
        }
        Ok(parsed)
    }

    fn decoding_key(&self, key: &SigningKey) -> Result<DecodingKey, KeyError> {
        if let Ok(guard) = self.decoding.read() {
            if let Some(cached) = guard.get(&key.kid) {
                return Ok(cached.clone());
            }
        }
        let parsed = DecodingKey::from_rsa_pem(key.public_key_pem.as_bytes())
            .map_err(|err| KeyError::InvalidKey(format!("{}: {err}", key.kid)))?;
        if let Ok(mut guard) = self.decoding.write() {
            guard.insert(key.kid.clone(), parsed.clone());
        }
        Ok(parsed)
    }

    fn invalidate(&self, kid: &str) {
        if let Ok(mut guard) = self.encoding.write() {
            guard.remove(kid);
        }
        if let Ok(mut guard) = self.decoding.write() {
            guard.remove(kid);
        }
    }
}

/// Owner of the session-token signing keys.
///
/// # Overview
/// Creates the first key on demand, rotates and revokes keys, and resolves
/// verification keys by `kid`. Parsed PEM material is cached per `kid`; the
/// store stays the source of truth for which keys are usable.
///
/// # Examples
/// ```no_run
/// # async fn demo() -> Result<(), catalog_auth::auth::keys::KeyError> {
/// use catalog_auth::auth::key_manager::KeyManager;
/// use catalog_auth::store::memory::InMemoryStore;
/// use std::sync::Arc;
///
/// let manager = KeyManager::new(Arc::new(InMemoryStore::new()));
/// let key = manager.get_active_signing_key().await?;
/// let rotation = manager.rotate_keys().await?;
/// assert_eq!(rotation.previous_kid.as_deref(), Some(key.kid.as_str()));
/// # Ok(())
/// # }
/// ```
///
/// # Security
/// Private key PEM never leaves this type except as an [`EncodingKey`].
pub struct KeyManager {
    store: Arc<dyn SigningKeyStore>,
    cache: KeyCache,
}

impl KeyManager {
    pub fn new(store: Arc<dyn SigningKeyStore>) -> Self {
        Self {
            store,
            cache: KeyCache::default(),
        }
    }

    /// Return the active key, creating one if none exists.
    ///
    /// # Errors
    /// - [`KeyError::Store`] when the store cannot be read or written.
    /// - [`KeyError::KeyNotFound`] when creation races were lost repeatedly
    ///   and no active key could be read back.
    pub async fn get_active_signing_key(&self) -> Result<SigningKey, KeyError> {
        for _ in 0..ACTIVE_KEY_ATTEMPTS {
            if let Some(key) = self.store.active_signing_key().await? {
                return Ok(key);
            }
            let candidate = generate_off_thread(SESSION_SIGNING_ALGORITHM).await?;
            if self
                .store
                .insert_signing_key_if_none_active(candidate.clone())
                .await?
            {
                tracing::info!(kid = %candidate.kid, "created initial signing key");
                return Ok(candidate);
            }
            // Another caller won the insert; loop and read its key.
            tracing::debug!("lost signing key creation race, re-reading");
        }
        Err(KeyError::KeyNotFound("active signing key".to_string()))
    }

    /// Generate a key and make it the active one, deactivating the previous key.
    ///
    /// # Errors
    /// [`KeyError::UnsupportedAlgorithm`] for anything other than
    /// [`SESSION_SIGNING_ALGORITHM`]. Session tokens are RS256 only.
    pub async fn create_new_key(&self, algorithm: Algorithm) -> Result<SigningKey, KeyError> {
        let (key, _) = self.activate_new_key(algorithm).await?;
        Ok(key)
    }

    /// [`create_new_key`](Self::create_new_key) plus `rotated_to_kid` lineage.
    ///
    /// # Returns
    /// - The new active key and the `kid` it replaced, if any.
    ///
    /// # Errors
    /// - [`KeyError::Generation`] or [`KeyError::Store`]. A failure to record
    ///   lineage is logged and does not fail the rotation.
    pub async fn rotate_keys(&self) -> Result<KeyRotation, KeyError> {
        let (key, previous_kid) = self.activate_new_key(SESSION_SIGNING_ALGORITHM).await?;
        if let Some(previous) = previous_kid.as_deref() {
            // Lineage is advisory; the rotation itself has already committed.
            if let Err(err) = self.store.set_rotated_to_kid(previous, &key.kid).await {
                tracing::warn!(
                    error = %err,
                    previous_kid = %previous,
                    kid = %key.kid,
                    "failed to record key lineage"
                );
            }
        }
        metrics::counter!("catalog_auth_key_rotations_total").increment(1);
        tracing::info!(kid = %key.kid, previous_kid = ?previous_kid, "rotated signing key");
        Ok(KeyRotation { key, previous_kid })
    }

    async fn activate_new_key(
        &self,
        algorithm: Algorithm,
    ) -> Result<(SigningKey, Option<String>), KeyError> {
        if algorithm != SESSION_SIGNING_ALGORITHM {
            return Err(KeyError::UnsupportedAlgorithm(algorithm));
        }
        let key = generate_off_thread(algorithm).await?;
        let previous = self
            .store
            .activate_signing_key(key.clone(), Utc::now())
            .await?;
        Ok((key, previous))
    }

    /// Revoke a key. Irreversible; tokens carrying this `kid` stop verifying.
    ///
    /// # Overview
    /// Revoking the active key leaves no active key. The next signing call
    /// creates a fresh one.
    ///
    /// # Errors
    /// - [`KeyError::KeyNotFound`] for an unknown `kid`.
    /// - [`KeyError::Store`] when the update fails.
    ///
    /// # Security
    /// - Takes effect on the next verification in every instance sharing the
    ///   store; no cache outlives it.
    pub async fn revoke_key(&self, kid: &str) -> Result<(), KeyError> {
        let found = self.store.revoke_signing_key(kid, Utc::now()).await?;
        self.cache.invalidate(kid);
        if !found {
            return Err(KeyError::KeyNotFound(kid.to_string()));
        }
        metrics::counter!("catalog_auth_key_revocations_total").increment(1);
        tracing::warn!(kid = %kid, "revoked signing key");
        Ok(())
    }

    /// PEM public key for an existing, unrevoked key.
    pub async fn get_public_key_by_kid(&self, kid: &str) -> Result<String, KeyError> {
        Ok(self.unrevoked_key(kid).await?.public_key_pem)
    }

    /// Decoding key for an existing, unrevoked key. Never falls back to another key.
    pub async fn verification_key(&self, kid: &str) -> Result<VerificationKey, KeyError> {
        let key = self.unrevoked_key(kid).await?;
        let decoding_key = self.cache.decoding_key(&key)?;
        Ok(VerificationKey {
            kid: key.kid,
            algorithm: key.algorithm,
            decoding_key,
        })
    }

    /// Encoding key for `key`, parsed once per `kid`.
    pub fn encoding_key(&self, key: &SigningKey) -> Result<EncodingKey, KeyError> {
        self.cache.encoding_key(key)
    }

    /// JWKs for every unrevoked key. Keys that fail conversion are skipped.
    pub async fn get_jwks_public_keys(&self) -> Result<Vec<JwkResponse>, KeyError> {
        let keys = self.store.list_unrevoked_signing_keys().await?;
        let mut jwks = Vec::with_capacity(keys.len());
        for key in &keys {
            match public_jwk(key) {
                Ok(jwk) => jwks.push(jwk),
                Err(err) => {
                    tracing::warn!(kid = %key.kid, error = %err, "skipping unconvertible signing key");
                }
            }
        }
        Ok(jwks)
    }

    async fn unrevoked_key(&self, kid: &str) -> Result<SigningKey, KeyError> {
        match self.store.signing_key_by_kid(kid).await? {
            Some(key) if !key.is_revoked => Ok(key),
            Some(_) => {
                self.cache.invalidate(kid);
                Err(KeyError::KeyNotFound(kid.to_string()))
            }
            None => Err(KeyError::KeyNotFound(kid.to_string())),
        }
    }
}

async fn generate_off_thread(algorithm: Algorithm) -> Result<SigningKey, KeyError> {
    tokio::task::spawn_blocking(move || generate_signing_key(algorithm))
        .await
        .map_err(|err| KeyError::Generation(err.to_string()))?
}
