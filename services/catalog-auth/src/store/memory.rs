//! In-memory implementation of the auth store.
//!
//! # Purpose
//! Implements every store trait with `HashMap`s guarded by
//! `tokio::sync::RwLock`. It exists for:
//! - local development and tests (no external dependencies)
//! - injecting a fake backend into the auth services
//!
//! # Durability and consistency
//! - **Not durable**: all state is lost on process restart.
//! - **Single-process consistency**: each atomic operation (key activation,
//!   refresh rotation) runs under one write lock, which gives the same
//!   single-winner semantics the Postgres backend gets from transactions and
//!   conditional updates.
//! - **No multi-node coordination**: multiple instances each have independent state.
use super::{
    AuthStore, RefreshTokenRepository, RotationOutcome, SigningKeyStore, StoreError, StoreResult,
    UserDirectory,
};
use crate::model::{IdentityLink, RefreshTokenRecord, RevokeReason, SigningKey, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct UserTables {
    /// Users keyed by internal id.
    users: HashMap<String, User>,
    /// Lower-cased email to user id.
    emails: HashMap<String, String>,
    /// `(provider, provider_user_id)` to link.
    links: HashMap<(String, String), IdentityLink>,
}

/// In-memory auth store.
///
/// Cloning shares the underlying maps, so a clone handed to one service sees
/// writes made through another.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    /// Signing keys keyed by `kid`.
    signing_keys: Arc<RwLock<HashMap<String, SigningKey>>>,
    /// Refresh token records keyed by token hash.
    refresh_tokens: Arc<RwLock<HashMap<String, RefreshTokenRecord>>>,
    users: Arc<RwLock<UserTables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SigningKeyStore for InMemoryStore {
    async fn active_signing_key(&self) -> StoreResult<Option<SigningKey>> {
        let keys = self.signing_keys.read().await;
        Ok(keys.values().find(|key| key.can_sign()).cloned())
    }

    async fn insert_signing_key_if_none_active(&self, key: SigningKey) -> StoreResult<bool> {
        let mut keys = self.signing_keys.write().await;
        if keys.values().any(|existing| existing.can_sign()) {
            return Ok(false);
        }
        if keys.contains_key(&key.kid) {
            return Err(StoreError::Conflict("signing key kid exists".into()));
        }
        let mut key = key;
        key.is_active = true;
        key.is_revoked = false;
        keys.insert(key.kid.clone(), key);
        Ok(true)
    }

    async fn activate_signing_key(
        &self,
        key: SigningKey,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<String>> {
        // Deactivate and insert under one write lock so no reader ever sees
        // zero or two active keys.
        let mut keys = self.signing_keys.write().await;
        if keys.contains_key(&key.kid) {
            return Err(StoreError::Conflict("signing key kid exists".into()));
        }
        let mut previous = None;
        for existing in keys.values_mut() {
            if existing.can_sign() {
                existing.is_active = false;
                existing.rotated_at = Some(now);
                previous = Some(existing.kid.clone());
            }
        }
        let mut key = key;
        key.is_active = true;
        key.is_revoked = false;
        keys.insert(key.kid.clone(), key);
        Ok(previous)
    }

    async fn set_rotated_to_kid(&self, kid: &str, rotated_to_kid: &str) -> StoreResult<()> {
        let mut keys = self.signing_keys.write().await;
        let key = keys
            .get_mut(kid)
            .ok_or_else(|| StoreError::NotFound("signing key".into()))?;
        key.rotated_to_kid = Some(rotated_to_kid.to_string());
        Ok(())
    }

    async fn revoke_signing_key(&self, kid: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        let mut keys = self.signing_keys.write().await;
        let Some(key) = keys.get_mut(kid) else {
            return Ok(false);
        };
        key.is_active = false;
        key.is_revoked = true;
        if key.revoked_at.is_none() {
            key.revoked_at = Some(now);
        }
        Ok(true)
    }

    async fn signing_key_by_kid(&self, kid: &str) -> StoreResult<Option<SigningKey>> {
        Ok(self.signing_keys.read().await.get(kid).cloned())
    }

    async fn list_unrevoked_signing_keys(&self) -> StoreResult<Vec<SigningKey>> {
        let keys = self.signing_keys.read().await;
        let mut items: Vec<SigningKey> = keys
            .values()
            .filter(|key| !key.is_revoked)
            .cloned()
            .collect();
        // Deterministic output keeps JWKS responses cache friendly.
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.kid.cmp(&b.kid)));
        Ok(items)
    }
}

#[async_trait]
impl RefreshTokenRepository for InMemoryStore {
    async fn insert_refresh_token(&self, record: RefreshTokenRecord) -> StoreResult<()> {
        let mut tokens = self.refresh_tokens.write().await;
        if tokens.contains_key(&record.token_hash) {
            return Err(StoreError::Conflict("refresh token hash exists".into()));
        }
        tokens.insert(record.token_hash.clone(), record);
        Ok(())
    }

    async fn refresh_token_by_hash(
        &self,
        token_hash: &str,
    ) -> StoreResult<Option<RefreshTokenRecord>> {
        Ok(self.refresh_tokens.read().await.get(token_hash).cloned())
    }

    async fn refresh_token_by_previous_hash(
        &self,
        token_hash: &str,
    ) -> StoreResult<Option<RefreshTokenRecord>> {
        let tokens = self.refresh_tokens.read().await;
        Ok(tokens
            .values()
            .find(|record| record.previous_token_hash.as_deref() == Some(token_hash))
            .cloned())
    }

    async fn rotate_refresh_token(
        &self,
        old_hash: &str,
        replacement: RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> StoreResult<RotationOutcome> {
        let mut tokens = self.refresh_tokens.write().await;
        if tokens.contains_key(&replacement.token_hash) {
            return Err(StoreError::Conflict("refresh token hash exists".into()));
        }
        let old = tokens
            .get_mut(old_hash)
            .ok_or_else(|| StoreError::NotFound("refresh token".into()))?;
        // Same guard as the SQL backend: only an unrevoked record can rotate.
        if old.revoked_at.is_some() {
            return Ok(RotationOutcome::AlreadyRevoked);
        }
        old.revoked_at = Some(now);
        old.revoked_reason = Some(RevokeReason::Rotated.to_string());
        old.last_used_at = Some(now);
        tokens.insert(replacement.token_hash.clone(), replacement);
        Ok(RotationOutcome::Rotated)
    }

    async fn revoke_refresh_token(
        &self,
        token_hash: &str,
        reason: RevokeReason,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tokens = self.refresh_tokens.write().await;
        match tokens.get_mut(token_hash) {
            Some(record) if record.revoked_at.is_none() => {
                record.revoked_at = Some(now);
                record.revoked_reason = Some(reason.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_user_refresh_tokens(
        &self,
        user_id: &str,
        reason: RevokeReason,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut tokens = self.refresh_tokens.write().await;
        let mut revoked = 0;
        for record in tokens.values_mut() {
            if record.user_id == user_id && record.is_live(now) {
                record.revoked_at = Some(now);
                record.revoked_reason = Some(reason.to_string());
                revoked += 1;
            }
        }
        Ok(revoked)
    }
}

#[async_trait]
impl UserDirectory for InMemoryStore {
    async fn find_user_by_identity(
        &self,
        provider: &str,
        provider_user_id: &str,
    ) -> StoreResult<Option<User>> {
        let tables = self.users.read().await;
        let key = (provider.to_string(), provider_user_id.to_string());
        Ok(tables
            .links
            .get(&key)
            .and_then(|link| tables.users.get(&link.user_id))
            .cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let tables = self.users.read().await;
        Ok(tables
            .emails
            .get(&email.to_lowercase())
            .and_then(|id| tables.users.get(id))
            .cloned())
    }

    async fn get_user(&self, user_id: &str) -> StoreResult<Option<User>> {
        Ok(self.users.read().await.users.get(user_id).cloned())
    }

    async fn create_user(&self, user: User) -> StoreResult<User> {
        let mut tables = self.users.write().await;
        let email = user.email.to_lowercase();
        if tables.emails.contains_key(&email) {
            return Err(StoreError::Conflict("email exists".into()));
        }
        if tables.users.contains_key(&user.id) {
            return Err(StoreError::Conflict("user exists".into()));
        }
        tables.emails.insert(email, user.id.clone());
        tables.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn upsert_identity_link(&self, link: IdentityLink) -> StoreResult<()> {
        let mut tables = self.users.write().await;
        if !tables.users.contains_key(&link.user_id) {
            return Err(StoreError::NotFound("user".into()));
        }
        let key = (link.provider.clone(), link.provider_user_id.clone());
        tables.links.insert(key, link);
        Ok(())
    }
}

#[async_trait]
impl AuthStore for InMemoryStore {
    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
