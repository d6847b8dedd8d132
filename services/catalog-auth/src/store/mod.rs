//! Persistence traits for the auth service.
//!
//! # Purpose
//! Splits storage into one narrow trait per component so each service can be
//! handed only what it needs, and tests can inject fakes per concern.
//!
//! # Key invariants
//! - Signing-key activation and refresh-token rotation are atomic in every
//!   backend; callers never perform check-then-act sequences on their own.
//! - Backends convert their row shapes into the model types here, at the
//!   store boundary.
use crate::model::{IdentityLink, RefreshTokenRecord, RevokeReason, SigningKey, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub mod memory;
pub mod postgres;
#[cfg(all(test, feature = "pg-tests"))]
mod postgres_tests;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(value: sqlx::Error) -> Self {
        StoreError::Unexpected(anyhow::Error::new(value))
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(value: sqlx::migrate::MigrateError) -> Self {
        StoreError::Unexpected(anyhow::Error::new(value))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of a conditional refresh-token rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationOutcome {
    /// The old record was live, is now revoked, and the replacement exists.
    Rotated,
    /// The old record was already revoked when the guarded update ran.
    AlreadyRevoked,
}

#[async_trait]
pub trait SigningKeyStore: Send + Sync {
    /// The single key with `is_active && !is_revoked`, if any.
    async fn active_signing_key(&self) -> StoreResult<Option<SigningKey>>;

    /// Insert `key` as active only if no active key exists.
    ///
    /// Returns `false` when another active key already exists; the caller must
    /// re-read instead of retrying the insert.
    async fn insert_signing_key_if_none_active(&self, key: SigningKey) -> StoreResult<bool>;

    /// Deactivate the current active key (stamping `rotated_at`) and insert
    /// `key` as the new active key in one atomic step.
    ///
    /// Returns the kid of the key that was deactivated.
    async fn activate_signing_key(
        &self,
        key: SigningKey,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<String>>;

    async fn set_rotated_to_kid(&self, kid: &str, rotated_to_kid: &str) -> StoreResult<()>;

    /// Mark a key revoked and inactive. Returns `false` for an unknown kid.
    async fn revoke_signing_key(&self, kid: &str, now: DateTime<Utc>) -> StoreResult<bool>;

    async fn signing_key_by_kid(&self, kid: &str) -> StoreResult<Option<SigningKey>>;

    async fn list_unrevoked_signing_keys(&self) -> StoreResult<Vec<SigningKey>>;
}

#[async_trait]
pub trait RefreshTokenRepository: Send + Sync {
    async fn insert_refresh_token(&self, record: RefreshTokenRecord) -> StoreResult<()>;

    async fn refresh_token_by_hash(&self, token_hash: &str)
    -> StoreResult<Option<RefreshTokenRecord>>;

    /// The record whose `previous_token_hash` equals `token_hash`, i.e. the
    /// successor of an already consumed token.
    async fn refresh_token_by_previous_hash(
        &self,
        token_hash: &str,
    ) -> StoreResult<Option<RefreshTokenRecord>>;

    /// Revoke the record for `old_hash` (guarded by `revoked_at IS NULL`) with
    /// reason `rotated` and insert `replacement`, atomically.
    async fn rotate_refresh_token(
        &self,
        old_hash: &str,
        replacement: RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> StoreResult<RotationOutcome>;

    /// Revoke one live record. Returns `false` if it was unknown or already revoked.
    async fn revoke_refresh_token(
        &self,
        token_hash: &str,
        reason: RevokeReason,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Revoke every live record for a user. Returns the number revoked.
    async fn revoke_user_refresh_tokens(
        &self,
        user_id: &str,
        reason: RevokeReason,
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user_by_identity(
        &self,
        provider: &str,
        provider_user_id: &str,
    ) -> StoreResult<Option<User>>;

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    async fn get_user(&self, user_id: &str) -> StoreResult<Option<User>>;

    /// Create a user. Fails with [`StoreError::Conflict`] if the email is taken.
    async fn create_user(&self, user: User) -> StoreResult<User>;

    async fn upsert_identity_link(&self, link: IdentityLink) -> StoreResult<()>;
}

/// Everything a full backend provides.
#[async_trait]
pub trait AuthStore: SigningKeyStore + RefreshTokenRepository + UserDirectory {
    async fn health_check(&self) -> StoreResult<()>;
    fn is_durable(&self) -> bool;
    fn backend_name(&self) -> &'static str;
}
