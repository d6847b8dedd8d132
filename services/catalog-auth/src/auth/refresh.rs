//! Opaque refresh tokens: issuance, rotation, revocation and reuse detection.
//!
//! # Purpose
//! Refresh tokens are random 64-byte values handed to the client once. Only
//! their SHA-256 hex digest is persisted. Each use rotates the token and links
//! the new record to the consumed one through `previous_token_hash`.
//!
//! # Key invariants
//! - A raw token can never be recovered from storage.
//! - Rotation of a live token is single-winner. The loser of a race gets
//!   [`RefreshTokenError::RotationConflict`] and causes no revocation. That
//!   holds whether the loser reads the record before or after the winner
//!   commits, as long as the two requests overlap in this process.
//! - Presenting a token that was already rotated away is theft evidence:
//!   every live token of that user is revoked before the call fails with
//!   [`RefreshTokenError::ReuseDetected`].
//!
//! # Security
//! Raw tokens are never logged. Log lines carry at most a short hash prefix.
use crate::model::{RefreshTokenRecord, RevokeReason};
use crate::store::{RefreshTokenRepository, RotationOutcome, StoreError};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;

pub const REFRESH_TOKEN_BYTES: usize = 64;
pub const REFRESH_TOKEN_TTL_DAYS: i64 = 7;

#[derive(Debug, Error)]
pub enum RefreshTokenError {
    #[error("refresh token invalid")]
    Invalid,
    #[error("refresh token expired")]
    Expired,
    #[error("refresh token revoked")]
    Revoked,
    #[error("refresh token reuse detected")]
    ReuseDetected,
    #[error("refresh token rotated concurrently")]
    RotationConflict,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RefreshTokenError {
    pub fn reason(&self) -> &'static str {
        match self {
            RefreshTokenError::Invalid => "invalid",
            RefreshTokenError::Expired => "expired",
            RefreshTokenError::Revoked => "revoked",
            RefreshTokenError::ReuseDetected => "reuse_detected",
            RefreshTokenError::RotationConflict => "conflict",
            RefreshTokenError::Store(_) => "store_error",
        }
    }
}

/// A freshly issued refresh token. `token` is the only copy of the raw value.
#[derive(Clone)]
pub struct IssuedRefreshToken {
    pub token: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for IssuedRefreshToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedRefreshToken")
            .field("token", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// SHA-256 hex digest of a raw refresh token.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn generate_raw_token() -> String {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn hash_prefix(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}

/// Rotation attempts currently in progress for one token hash.
#[derive(Debug)]
struct InFlight {
    active: usize,
    arrivals: u64,
    since: DateTime<Utc>,
}

/// Registration of one rotation attempt. Released on drop.
struct RotationAttempt {
    inflight: Arc<DashMap<String, InFlight>>,
    token_hash: String,
    arrival: u64,
    since: DateTime<Utc>,
    joined_others: bool,
}

impl RotationAttempt {
    fn enter(inflight: &Arc<DashMap<String, InFlight>>, token_hash: &str) -> Self {
        let (arrival, since, joined_others) = {
            let mut entry = inflight
                .entry(token_hash.to_string())
                .or_insert_with(|| InFlight {
                    active: 0,
                    arrivals: 0,
                    since: Utc::now(),
                });
            entry.active += 1;
            entry.arrivals += 1;
            (entry.arrivals, entry.since, entry.active > 1)
        };
        Self {
            inflight: Arc::clone(inflight),
            token_hash: token_hash.to_string(),
            arrival,
            since,
            joined_others,
        }
    }

    /// True when the token was retired at `retired_at` by an attempt that
    /// overlapped this one.
    fn lost_race(&self, retired_at: DateTime<Utc>) -> bool {
        let overlapped = self.joined_others
            || self
                .inflight
                .get(&self.token_hash)
                .is_some_and(|entry| entry.arrivals > self.arrival);
        overlapped && retired_at >= self.since
    }
}

impl Drop for RotationAttempt {
    fn drop(&mut self) {
        self.inflight.remove_if_mut(&self.token_hash, |_, entry| {
            entry.active = entry.active.saturating_sub(1);
            entry.active == 0
        });
    }
}

/// A refresh token that passed every check and can be consumed.
///
/// Nothing has been written yet. Dropping it leaves the token live, so a
/// caller can do its remaining fallible work before
/// [`RefreshTokenStore::commit_rotation`].
pub struct PendingRotation {
    record: RefreshTokenRecord,
    attempt: RotationAttempt,
}

impl PendingRotation {
    pub fn user_id(&self) -> &str {
        &self.record.user_id
    }
}

impl std::fmt::Debug for PendingRotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRotation")
            .field("user_id", &self.record.user_id)
            .field("token", &hash_prefix(&self.record.token_hash))
            .finish()
    }
}

/// Issues, rotates and revokes opaque refresh tokens.
///
/// # Overview
/// Wraps a [`RefreshTokenRepository`] with hashing, expiry and the reuse
/// policy. Clones share the same repository and the same record of
/// in-progress rotations.
///
/// # Examples
/// ```no_run
/// # async fn demo() -> Result<(), catalog_auth::auth::refresh::RefreshTokenError> {
/// use catalog_auth::auth::refresh::RefreshTokenStore;
/// use catalog_auth::store::memory::InMemoryStore;
/// use std::sync::Arc;
///
/// let store = RefreshTokenStore::new(Arc::new(InMemoryStore::new()));
/// let r0 = store.create_token("user-1", None, None).await?;
/// let r1 = store.validate_and_rotate_token(&r0.token).await?;
/// assert_ne!(r0.token, r1.token);
/// # Ok(())
/// # }
/// ```
///
/// # Security
/// - Hashing happens here; raw values never reach logs or storage.
/// - Reuse detection relies on rotated records being kept, not deleted.
#[derive(Clone)]
pub struct RefreshTokenStore {
    repo: Arc<dyn RefreshTokenRepository>,
    ttl: Duration,
    inflight: Arc<DashMap<String, InFlight>>,
}

impl RefreshTokenStore {
    pub fn new(repo: Arc<dyn RefreshTokenRepository>) -> Self {
        Self {
            repo,
            ttl: Duration::days(REFRESH_TOKEN_TTL_DAYS),
            inflight: Arc::new(DashMap::new()),
        }
    }

    /// Override the token lifetime.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn new_record(
        &self,
        user_id: &str,
        device_info: Option<String>,
        ip_address: Option<String>,
        previous_token_hash: Option<String>,
        now: DateTime<Utc>,
    ) -> (String, RefreshTokenRecord) {
        let token = generate_raw_token();
        let record = RefreshTokenRecord {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            token_hash: hash_token(&token),
            previous_token_hash,
            revoked_at: None,
            revoked_reason: None,
            expires_at: now + self.ttl,
            device_info,
            ip_address,
            created_at: now,
            last_used_at: None,
        };
        (token, record)
    }

    /// Issue the root token of a new login session.
    ///
    /// # Arguments
    /// - `user_id`: owner of the session.
    /// - `device_info`, `ip_address`: client metadata carried along every
    ///   rotation of this chain.
    ///
    /// # Returns
    /// - The raw token. It is the only copy; storage holds its hash.
    ///
    /// # Errors
    /// - [`RefreshTokenError::Store`] when the insert fails. No token is
    ///   returned in that case.
    pub async fn create_token(
        &self,
        user_id: &str,
        device_info: Option<String>,
        ip_address: Option<String>,
    ) -> Result<IssuedRefreshToken, RefreshTokenError> {
        let now = Utc::now();
        let (token, record) = self.new_record(user_id, device_info, ip_address, None, now);
        let expires_at = record.expires_at;
        self.repo.insert_refresh_token(record).await?;
        Ok(IssuedRefreshToken {
            token,
            user_id: user_id.to_string(),
            expires_at,
        })
    }

    /// Consume `token` and return its successor.
    ///
    /// Equivalent to [`inspect_token`](Self::inspect_token) followed directly
    /// by [`commit_rotation`](Self::commit_rotation).
    ///
    /// # Errors
    /// - [`RefreshTokenError::Invalid`] for a token never issued.
    /// - [`RefreshTokenError::Revoked`] or [`RefreshTokenError::Expired`] for
    ///   a dead token.
    /// - [`RefreshTokenError::ReuseDetected`] for a token already rotated
    ///   away. Every live token of its owner is revoked first.
    /// - [`RefreshTokenError::RotationConflict`] when an overlapping request
    ///   rotated the same token first.
    pub async fn validate_and_rotate_token(
        &self,
        token: &str,
    ) -> Result<IssuedRefreshToken, RefreshTokenError> {
        let pending = self.inspect_token(token).await?;
        self.commit_rotation(pending).await
    }

    /// Check `token` without consuming it.
    ///
    /// # Overview
    /// Runs every validity check of a rotation. The only write it can make is
    /// the session-tree revocation that follows detected reuse.
    ///
    /// A retired token counts as reuse unless it was retired during this
    /// call by another request for the same token. That request is the
    /// winner, and this call fails with
    /// [`RefreshTokenError::RotationConflict`]. Two replays of a token retired
    /// earlier are still reuse, however closely they arrive.
    ///
    /// # Errors
    /// - Same as [`validate_and_rotate_token`](Self::validate_and_rotate_token).
    pub async fn inspect_token(&self, token: &str) -> Result<PendingRotation, RefreshTokenError> {
        let token_hash = hash_token(token);
        let attempt = RotationAttempt::enter(&self.inflight, &token_hash);
        let now = Utc::now();

        let Some(record) = self.repo.refresh_token_by_hash(&token_hash).await? else {
            // Not a current record. It may be a consumed link of some chain.
            if let Some(successor) = self.repo.refresh_token_by_previous_hash(&token_hash).await? {
                return Err(self
                    .retired_token_presented(&attempt, &successor.user_id, successor.created_at, now)
                    .await);
            }
            return Err(RefreshTokenError::Invalid);
        };

        if record.was_rotated() {
            let retired_at = record
                .last_used_at
                .or(record.revoked_at)
                .unwrap_or(record.created_at);
            return Err(self
                .retired_token_presented(&attempt, &record.user_id, retired_at, now)
                .await);
        }
        if record.revoked_at.is_some() {
            return Err(RefreshTokenError::Revoked);
        }
        if record.expires_at <= now {
            return Err(RefreshTokenError::Expired);
        }
        Ok(PendingRotation { record, attempt })
    }

    /// Consume an inspected token and issue its successor.
    ///
    /// The old record is revoked with reason `rotated` and the successor is
    /// inserted in one guarded step. Only one caller can win it.
    ///
    /// # Errors
    /// - [`RefreshTokenError::RotationConflict`] when the token was consumed
    ///   after it was inspected.
    /// - [`RefreshTokenError::Store`] when the write fails. The token stays
    ///   live in that case.
    pub async fn commit_rotation(
        &self,
        pending: PendingRotation,
    ) -> Result<IssuedRefreshToken, RefreshTokenError> {
        let PendingRotation {
            record,
            attempt: _attempt,
        } = pending;
        let now = Utc::now();
        let (new_token, replacement) = self.new_record(
            &record.user_id,
            record.device_info.clone(),
            record.ip_address.clone(),
            Some(record.token_hash.clone()),
            now,
        );
        let expires_at = replacement.expires_at;
        match self
            .repo
            .rotate_refresh_token(&record.token_hash, replacement, now)
            .await?
        {
            RotationOutcome::Rotated => Ok(IssuedRefreshToken {
                token: new_token,
                user_id: record.user_id,
                expires_at,
            }),
            RotationOutcome::AlreadyRevoked => {
                tracing::info!(
                    user_id = %record.user_id,
                    token = hash_prefix(&record.token_hash),
                    "concurrent refresh rotation lost"
                );
                Err(RefreshTokenError::RotationConflict)
            }
        }
    }

    async fn retired_token_presented(
        &self,
        attempt: &RotationAttempt,
        user_id: &str,
        retired_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> RefreshTokenError {
        if attempt.lost_race(retired_at) {
            tracing::info!(
                user_id = %user_id,
                token = hash_prefix(&attempt.token_hash),
                "refresh token retired by an overlapping rotation"
            );
            return RefreshTokenError::RotationConflict;
        }
        self.revoke_session_tree(user_id, &attempt.token_hash, now)
            .await
    }

    async fn revoke_session_tree(
        &self,
        user_id: &str,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> RefreshTokenError {
        metrics::counter!("catalog_auth_refresh_reuse_detected_total").increment(1);
        match self
            .repo
            .revoke_user_refresh_tokens(user_id, RevokeReason::ReuseDetected, now)
            .await
        {
            Ok(revoked) => {
                tracing::warn!(
                    user_id = %user_id,
                    token = hash_prefix(token_hash),
                    revoked,
                    "retired refresh token reused; session tree revoked"
                );
                RefreshTokenError::ReuseDetected
            }
            Err(err) => {
                tracing::error!(
                    user_id = %user_id,
                    error = %err,
                    "failed to revoke session tree after refresh token reuse"
                );
                RefreshTokenError::Store(err)
            }
        }
    }

    /// Revoke one token. Unknown or already revoked tokens are not an error.
    pub async fn revoke_token(
        &self,
        token: &str,
        reason: RevokeReason,
    ) -> Result<bool, RefreshTokenError> {
        Ok(self
            .repo
            .revoke_refresh_token(&hash_token(token), reason, Utc::now())
            .await?)
    }

    pub async fn revoke_all_user_tokens(
        &self,
        user_id: &str,
        reason: RevokeReason,
    ) -> Result<u64, RefreshTokenError> {
        Ok(self
            .repo
            .revoke_user_refresh_tokens(user_id, reason, Utc::now())
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreResult;
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn store() -> (Arc<InMemoryStore>, RefreshTokenStore) {
        let backend = Arc::new(InMemoryStore::new());
        (backend.clone(), RefreshTokenStore::new(backend))
    }

    #[test]
    fn hash_is_sha256_hex() {
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn created_token_is_opaque_and_only_hash_is_stored() {
        let (backend, store) = store();
        let issued = store
            .create_token("u1", Some("ua".to_string()), Some("10.0.0.1".to_string()))
            .await
            .expect("create");
        assert_eq!(issued.token.len(), REFRESH_TOKEN_BYTES * 2);
        assert!(issued.token.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(backend.refresh_token_by_hash(&issued.token).await.expect("get").is_none());

        let record = backend
            .refresh_token_by_hash(&hash_token(&issued.token))
            .await
            .expect("get")
            .expect("record");
        assert_eq!(record.user_id, "u1");
        let ttl = record.expires_at - record.created_at;
        assert_eq!(ttl, Duration::days(7));
    }

    #[tokio::test]
    async fn single_path_rotation_chains_hashes() {
        let (backend, store) = store();
        let r0 = store
            .create_token("u1", Some("ua".to_string()), None)
            .await
            .expect("r0");
        let r1 = store.validate_and_rotate_token(&r0.token).await.expect("r1");
        let r2 = store.validate_and_rotate_token(&r1.token).await.expect("r2");

        let rec2 = backend
            .refresh_token_by_hash(&hash_token(&r2.token))
            .await
            .expect("get")
            .expect("rec2");
        assert_eq!(rec2.previous_token_hash, Some(hash_token(&r1.token)));
        assert_eq!(rec2.device_info.as_deref(), Some("ua"));
        assert!(rec2.is_live(Utc::now()));

        let rec0 = backend
            .refresh_token_by_hash(&hash_token(&r0.token))
            .await
            .expect("get")
            .expect("rec0");
        assert!(rec0.was_rotated());
    }

    #[tokio::test]
    async fn reuse_of_retired_token_revokes_session_tree() {
        let (backend, store) = store();
        let r0 = store.create_token("u1", None, None).await.expect("r0");
        let other_device = store.create_token("u1", None, None).await.expect("other");
        let stranger = store.create_token("u2", None, None).await.expect("stranger");
        let r1 = store.validate_and_rotate_token(&r0.token).await.expect("r1");

        let err = store
            .validate_and_rotate_token(&r0.token)
            .await
            .expect_err("reuse");
        assert!(matches!(err, RefreshTokenError::ReuseDetected));

        let err = store
            .validate_and_rotate_token(&r1.token)
            .await
            .expect_err("session revoked");
        assert!(matches!(err, RefreshTokenError::Revoked));
        assert!(matches!(
            store.validate_and_rotate_token(&other_device.token).await,
            Err(RefreshTokenError::Revoked)
        ));

        let stranger_record = backend
            .refresh_token_by_hash(&hash_token(&stranger.token))
            .await
            .expect("get")
            .expect("stranger");
        assert!(stranger_record.revoked_at.is_none());
    }

    #[tokio::test]
    async fn consumed_hash_known_only_as_previous_is_reuse() {
        let (backend, store) = store();
        let presented = "f".repeat(128);
        let mut successor = RefreshTokenRecord {
            id: "succ".to_string(),
            user_id: "u9".to_string(),
            token_hash: hash_token("successor"),
            previous_token_hash: Some(hash_token(&presented)),
            revoked_at: None,
            revoked_reason: None,
            expires_at: Utc::now() + Duration::days(1),
            device_info: None,
            ip_address: None,
            created_at: Utc::now(),
            last_used_at: None,
        };
        backend.insert_refresh_token(successor.clone()).await.expect("insert");

        let err = store
            .validate_and_rotate_token(&presented)
            .await
            .expect_err("reuse");
        assert!(matches!(err, RefreshTokenError::ReuseDetected));
        successor = backend
            .refresh_token_by_hash(&successor.token_hash)
            .await
            .expect("get")
            .expect("successor");
        assert_eq!(successor.revoked_reason.as_deref(), Some("reuse_detected"));
    }

    #[tokio::test]
    async fn unknown_expired_and_logged_out_tokens() {
        let (_, store) = store();
        assert!(matches!(
            store.validate_and_rotate_token("nope").await,
            Err(RefreshTokenError::Invalid)
        ));

        let logged_out = store.create_token("u1", None, None).await.expect("token");
        assert!(store.revoke_token(&logged_out.token, RevokeReason::Logout).await.expect("revoke"));
        assert!(!store.revoke_token(&logged_out.token, RevokeReason::Logout).await.expect("again"));
        assert!(!store.revoke_token("unknown", RevokeReason::Logout).await.expect("unknown"));
        assert!(matches!(
            store.validate_and_rotate_token(&logged_out.token).await,
            Err(RefreshTokenError::Revoked)
        ));

        let (_, short) = self::store();
        let short = short.with_ttl(Duration::seconds(-1));
        let expired = short.create_token("u1", None, None).await.expect("token");
        assert!(matches!(
            short.validate_and_rotate_token(&expired.token).await,
            Err(RefreshTokenError::Expired)
        ));
    }

    /// Delegates to the in-memory store. The first rotation stays open until a
    /// second lookup has read the record it just retired.
    struct HeldCommitRepo {
        inner: Arc<InMemoryStore>,
        lookups: AtomicUsize,
        rotations: AtomicUsize,
        committed: Notify,
        reread: Notify,
    }

    impl HeldCommitRepo {
        fn new() -> Self {
            Self {
                inner: Arc::new(InMemoryStore::new()),
                lookups: AtomicUsize::new(0),
                rotations: AtomicUsize::new(0),
                committed: Notify::new(),
                reread: Notify::new(),
            }
        }
    }

    #[async_trait]
    impl RefreshTokenRepository for HeldCommitRepo {
        async fn insert_refresh_token(&self, record: RefreshTokenRecord) -> StoreResult<()> {
            self.inner.insert_refresh_token(record).await
        }

        async fn refresh_token_by_hash(
            &self,
            token_hash: &str,
        ) -> StoreResult<Option<RefreshTokenRecord>> {
            if self.lookups.fetch_add(1, Ordering::SeqCst) == 1 {
                self.committed.notified().await;
                let record = self.inner.refresh_token_by_hash(token_hash).await;
                self.reread.notify_one();
                return record;
            }
            self.inner.refresh_token_by_hash(token_hash).await
        }

        async fn refresh_token_by_previous_hash(
            &self,
            token_hash: &str,
        ) -> StoreResult<Option<RefreshTokenRecord>> {
            self.inner.refresh_token_by_previous_hash(token_hash).await
        }

        async fn rotate_refresh_token(
            &self,
            old_hash: &str,
            replacement: RefreshTokenRecord,
            now: DateTime<Utc>,
        ) -> StoreResult<RotationOutcome> {
            let outcome = self.inner.rotate_refresh_token(old_hash, replacement, now).await;
            if self.rotations.fetch_add(1, Ordering::SeqCst) == 0 {
                self.committed.notify_one();
                self.reread.notified().await;
            }
            outcome
        }

        async fn revoke_refresh_token(
            &self,
            token_hash: &str,
            reason: RevokeReason,
            now: DateTime<Utc>,
        ) -> StoreResult<bool> {
            self.inner.revoke_refresh_token(token_hash, reason, now).await
        }

        async fn revoke_user_refresh_tokens(
            &self,
            user_id: &str,
            reason: RevokeReason,
            now: DateTime<Utc>,
        ) -> StoreResult<u64> {
            self.inner.revoke_user_refresh_tokens(user_id, reason, now).await
        }
    }

    #[tokio::test]
    async fn overlapping_rotation_loser_leaves_winner_alive() {
        let repo = Arc::new(HeldCommitRepo::new());
        let store = RefreshTokenStore::new(repo.clone());
        let r0 = store.create_token("u1", None, None).await.expect("r0");

        let spawn_rotation = |token: String| {
            let store = store.clone();
            tokio::spawn(async move { store.validate_and_rotate_token(&token).await })
        };
        let first = spawn_rotation(r0.token.clone());
        let second = spawn_rotation(r0.token.clone());

        let mut winners = Vec::new();
        for handle in [first, second] {
            match handle.await.expect("join") {
                Ok(issued) => winners.push(issued),
                Err(RefreshTokenError::RotationConflict) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(winners.len(), 1);
        let winner = winners.remove(0);

        // The winner's token was not caught up in a session-tree revocation.
        let next = store
            .validate_and_rotate_token(&winner.token)
            .await
            .expect("winner rotates");

        // A replay after both requests finished is plain reuse.
        let err = store
            .validate_and_rotate_token(&r0.token)
            .await
            .expect_err("replay");
        assert!(matches!(err, RefreshTokenError::ReuseDetected));
        let record = repo
            .inner
            .refresh_token_by_hash(&hash_token(&next.token))
            .await
            .expect("get")
            .expect("next");
        assert_eq!(record.revoked_reason.as_deref(), Some("reuse_detected"));
    }

    #[tokio::test]
    async fn simultaneous_replays_of_old_token_are_reuse() {
        let (_, store) = store();
        let r0 = store.create_token("u1", None, None).await.expect("r0");
        store.validate_and_rotate_token(&r0.token).await.expect("r1");

        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            let token = r0.token.clone();
            handles.push(tokio::spawn(async move {
                store.validate_and_rotate_token(&token).await
            }));
        }
        for handle in handles {
            let result = handle.await.expect("join");
            assert!(matches!(result, Err(RefreshTokenError::ReuseDetected)));
        }
    }

    #[tokio::test]
    async fn dropped_inspection_leaves_token_live() {
        let (_, store) = store();
        let r0 = store.create_token("u1", None, None).await.expect("r0");
        let pending = store.inspect_token(&r0.token).await.expect("inspect");
        assert_eq!(pending.user_id(), "u1");
        drop(pending);

        let pending = store.inspect_token(&r0.token).await.expect("inspect again");
        store.commit_rotation(pending).await.expect("commit");
        assert!(matches!(
            store.inspect_token(&r0.token).await,
            Err(RefreshTokenError::ReuseDetected)
        ));
    }

    #[tokio::test]
    async fn revoke_all_counts_live_tokens() {
        let (_, store) = store();
        store.create_token("u1", None, None).await.expect("a");
        store.create_token("u1", None, None).await.expect("b");
        let revoked = store
            .revoke_all_user_tokens("u1", RevokeReason::LogoutAll)
            .await
            .expect("revoke");
        assert_eq!(revoked, 2);
        assert_eq!(
            store
                .revoke_all_user_tokens("u1", RevokeReason::LogoutAll)
                .await
                .expect("again"),
            0
        );
    }
}
