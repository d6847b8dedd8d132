//! Postgres-backed implementation of the auth store.
//!
//! # What this module is
//! Implements [`SigningKeyStore`], [`RefreshTokenRepository`], [`UserDirectory`]
//! and [`AuthStore`] on top of a shared `sqlx::PgPool`. It is the durable
//! backend for multi-instance deployments.
//!
//! # Key invariants
//! - A partial unique index (`signing_keys_single_active`) guarantees at most
//!   one active, unrevoked signing key. Lazy creation relies on it: the loser
//!   of a concurrent insert sees `ON CONFLICT DO NOTHING` and re-reads.
//! - Key rotation runs in one transaction serialized by an advisory lock, so
//!   deactivating the old key and inserting the new one commit together.
//! - Refresh rotation is a conditional `UPDATE ... WHERE revoked_at IS NULL`
//!   followed by the replacement insert in the same transaction. Only the
//!   transaction that flips `revoked_at` inserts a successor.
//!
//! # Security notes
//! - Database URLs may contain credentials; never log them.
//! - `private_key_pem` is stored as-is. Restrict table access to the service role.
//! - Refresh tokens are stored only as SHA-256 hex digests.
//!
//! # Operational notes
//! Migrations are executed at startup via `sqlx::migrate!("./migrations")` so
//! handlers can assume the schema exists.
use super::{
    AuthStore, RefreshTokenRepository, RotationOutcome, SigningKeyStore, StoreError, StoreResult,
    UserDirectory,
};
use crate::config::PostgresConfig;
use crate::model::{IdentityLink, RefreshTokenRecord, RevokeReason, Role, SigningKey, User};
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::Algorithm;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use std::time::Duration;

/// Advisory lock id serializing signing-key activation across instances.
const SIGNING_KEY_LOCK_ID: i64 = 0x6361_7461_6b65_7973;

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

#[derive(Clone, FromRow)]
struct DbSigningKey {
    id: String,
    kid: String,
    algorithm: String,
    public_key_pem: String,
    private_key_pem: String,
    is_active: bool,
    is_revoked: bool,
    rotated_at: Option<DateTime<Utc>>,
    rotated_to_kid: Option<String>,
    created_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
struct DbRefreshToken {
    id: String,
    user_id: String,
    token_hash: String,
    previous_token_hash: Option<String>,
    revoked_at: Option<DateTime<Utc>>,
    revoked_reason: Option<String>,
    expires_at: DateTime<Utc>,
    device_info: Option<String>,
    ip_address: Option<String>,
    created_at: DateTime<Utc>,
    last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
struct DbUser {
    id: String,
    email: String,
    display_name: Option<String>,
    role: String,
    created_at: DateTime<Utc>,
}

const SIGNING_KEY_COLUMNS: &str = "id, kid, algorithm, public_key_pem, private_key_pem, \
    is_active, is_revoked, rotated_at, rotated_to_kid, created_at, revoked_at";

const REFRESH_TOKEN_COLUMNS: &str = "id, user_id, token_hash, previous_token_hash, revoked_at, \
    revoked_reason, expires_at, device_info, ip_address, created_at, last_used_at";

const USER_COLUMNS: &str = "users.id, users.email, users.display_name, users.role, users.created_at";

impl PostgresStore {
    /// Connect to Postgres and run embedded migrations.
    ///
    /// # Errors
    /// Connection, pool setup or migration failures.
    ///
    /// # Security notes
    /// Avoid logging `pg.url` as it may contain credentials.
    pub async fn connect(pg: &PostgresConfig) -> StoreResult<Self> {
        // Fail fast on an unreachable database instead of hanging startup.
        let connect_options = PgConnectOptions::from_str(&pg.url)?;
        let connect = PgPoolOptions::new()
            .max_connections(pg.max_connections)
            .acquire_timeout(Duration::from_millis(pg.acquire_timeout_ms))
            .connect_with(connect_options);
        let pool = tokio::time::timeout(Duration::from_millis(pg.connect_timeout_ms), connect)
            .await
            .map_err(|_| StoreError::Unexpected(anyhow!("postgres connect timed out")))??;

        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl SigningKeyStore for PostgresStore {
    async fn active_signing_key(&self) -> StoreResult<Option<SigningKey>> {
        let row = sqlx::query_as::<_, DbSigningKey>(&format!(
            "SELECT {SIGNING_KEY_COLUMNS} FROM signing_keys \
             WHERE is_active AND NOT is_revoked LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        row.map(signing_key_from_db).transpose()
    }

    async fn insert_signing_key_if_none_active(&self, key: SigningKey) -> StoreResult<bool> {
        // ON CONFLICT without a target also covers the partial unique index.
        let result = sqlx::query(
            r#"INSERT INTO signing_keys
               (id, kid, algorithm, public_key_pem, private_key_pem, is_active, is_revoked, created_at)
               VALUES ($1, $2, $3, $4, $5, TRUE, FALSE, $6)
               ON CONFLICT DO NOTHING"#,
        )
        .bind(&key.id)
        .bind(&key.kid)
        .bind(algorithm_to_str(key.algorithm)?)
        .bind(&key.public_key_pem)
        .bind(&key.private_key_pem)
        .bind(key.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn activate_signing_key(
        &self,
        key: SigningKey,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<String>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(SIGNING_KEY_LOCK_ID)
            .execute(&mut *tx)
            .await?;

        let previous: Option<String> = sqlx::query_scalar(
            r#"UPDATE signing_keys SET is_active = FALSE, rotated_at = $1
               WHERE is_active AND NOT is_revoked
               RETURNING kid"#,
        )
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let insert = sqlx::query(
            r#"INSERT INTO signing_keys
               (id, kid, algorithm, public_key_pem, private_key_pem, is_active, is_revoked, created_at)
               VALUES ($1, $2, $3, $4, $5, TRUE, FALSE, $6)"#,
        )
        .bind(&key.id)
        .bind(&key.kid)
        .bind(algorithm_to_str(key.algorithm)?)
        .bind(&key.public_key_pem)
        .bind(&key.private_key_pem)
        .bind(key.created_at)
        .execute(&mut *tx)
        .await;
        if let Err(err) = insert {
            if is_unique_violation(&err) {
                return Err(StoreError::Conflict("signing key conflict".into()));
            }
            return Err(StoreError::Unexpected(err.into()));
        }

        tx.commit().await?;
        Ok(previous)
    }

    async fn set_rotated_to_kid(&self, kid: &str, rotated_to_kid: &str) -> StoreResult<()> {
        let result = sqlx::query("UPDATE signing_keys SET rotated_to_kid = $2 WHERE kid = $1")
            .bind(kid)
            .bind(rotated_to_kid)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("signing key".into()));
        }
        Ok(())
    }

    async fn revoke_signing_key(&self, kid: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"UPDATE signing_keys
               SET is_revoked = TRUE, is_active = FALSE, revoked_at = COALESCE(revoked_at, $2)
               WHERE kid = $1"#,
        )
        .bind(kid)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn signing_key_by_kid(&self, kid: &str) -> StoreResult<Option<SigningKey>> {
        let row = sqlx::query_as::<_, DbSigningKey>(&format!(
            "SELECT {SIGNING_KEY_COLUMNS} FROM signing_keys WHERE kid = $1"
        ))
        .bind(kid)
        .fetch_optional(&self.pool)
        .await?;
        row.map(signing_key_from_db).transpose()
    }

    async fn list_unrevoked_signing_keys(&self) -> StoreResult<Vec<SigningKey>> {
        let rows = sqlx::query_as::<_, DbSigningKey>(&format!(
            "SELECT {SIGNING_KEY_COLUMNS} FROM signing_keys \
             WHERE NOT is_revoked ORDER BY created_at DESC, kid"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(signing_key_from_db).collect()
    }
}

#[async_trait]
impl RefreshTokenRepository for PostgresStore {
    async fn insert_refresh_token(&self, record: RefreshTokenRecord) -> StoreResult<()> {
        let insert = bind_refresh_insert(&record).execute(&self.pool).await;
        if let Err(err) = insert {
            if is_unique_violation(&err) {
                return Err(StoreError::Conflict("refresh token hash exists".into()));
            }
            return Err(StoreError::Unexpected(err.into()));
        }
        Ok(())
    }

    async fn refresh_token_by_hash(
        &self,
        token_hash: &str,
    ) -> StoreResult<Option<RefreshTokenRecord>> {
        let row = sqlx::query_as::<_, DbRefreshToken>(&format!(
            "SELECT {REFRESH_TOKEN_COLUMNS} FROM refresh_tokens WHERE token_hash = $1"
        ))
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(refresh_token_from_db))
    }

    async fn refresh_token_by_previous_hash(
        &self,
        token_hash: &str,
    ) -> StoreResult<Option<RefreshTokenRecord>> {
        let row = sqlx::query_as::<_, DbRefreshToken>(&format!(
            "SELECT {REFRESH_TOKEN_COLUMNS} FROM refresh_tokens \
             WHERE previous_token_hash = $1 ORDER BY created_at LIMIT 1"
        ))
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(refresh_token_from_db))
    }

    async fn rotate_refresh_token(
        &self,
        old_hash: &str,
        replacement: RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> StoreResult<RotationOutcome> {
        let mut tx = self.pool.begin().await?;
        // Row lock on the old record serializes concurrent rotations; the
        // loser re-evaluates the predicate after the winner commits.
        let updated = sqlx::query(
            r#"UPDATE refresh_tokens
               SET revoked_at = $2, revoked_reason = $3, last_used_at = $2
               WHERE token_hash = $1 AND revoked_at IS NULL"#,
        )
        .bind(old_hash)
        .bind(now)
        .bind(RevokeReason::Rotated.as_str())
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(RotationOutcome::AlreadyRevoked);
        }

        let insert = bind_refresh_insert(&replacement).execute(&mut *tx).await;
        if let Err(err) = insert {
            if is_unique_violation(&err) {
                return Err(StoreError::Conflict("refresh token hash exists".into()));
            }
            return Err(StoreError::Unexpected(err.into()));
        }

        tx.commit().await?;
        Ok(RotationOutcome::Rotated)
    }

    async fn revoke_refresh_token(
        &self,
        token_hash: &str,
        reason: RevokeReason,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"UPDATE refresh_tokens SET revoked_at = $2, revoked_reason = $3
               WHERE token_hash = $1 AND revoked_at IS NULL"#,
        )
        .bind(token_hash)
        .bind(now)
        .bind(reason.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_user_refresh_tokens(
        &self,
        user_id: &str,
        reason: RevokeReason,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"UPDATE refresh_tokens SET revoked_at = $2, revoked_reason = $3
               WHERE user_id = $1 AND revoked_at IS NULL AND expires_at > $2"#,
        )
        .bind(user_id)
        .bind(now)
        .bind(reason.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl UserDirectory for PostgresStore {
    async fn find_user_by_identity(
        &self,
        provider: &str,
        provider_user_id: &str,
    ) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, DbUser>(&format!(
            "SELECT {USER_COLUMNS} FROM users \
             JOIN identity_links ON identity_links.user_id = users.id \
             WHERE identity_links.provider = $1 AND identity_links.provider_user_id = $2"
        ))
        .bind(provider)
        .bind(provider_user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(user_from_db).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, DbUser>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE users.email = $1"
        ))
        .bind(email.to_lowercase())
        .fetch_optional(&self.pool)
        .await?;
        row.map(user_from_db).transpose()
    }

    async fn get_user(&self, user_id: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, DbUser>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE users.id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(user_from_db).transpose()
    }

    async fn create_user(&self, user: User) -> StoreResult<User> {
        let insert = sqlx::query(
            r#"INSERT INTO users (id, email, display_name, role, created_at)
               VALUES ($1, $2, $3, $4, $5)"#,
        )
        .bind(&user.id)
        .bind(user.email.to_lowercase())
        .bind(&user.display_name)
        .bind(user.role.as_str())
        .bind(user.created_at)
        .execute(&self.pool)
        .await;
        if let Err(err) = insert {
            if is_unique_violation(&err) {
                return Err(StoreError::Conflict("email exists".into()));
            }
            return Err(StoreError::Unexpected(err.into()));
        }
        Ok(user)
    }

    async fn upsert_identity_link(&self, link: IdentityLink) -> StoreResult<()> {
        let upsert = sqlx::query(
            r#"INSERT INTO identity_links (provider, provider_user_id, user_id)
               VALUES ($1, $2, $3)
               ON CONFLICT (provider, provider_user_id)
               DO UPDATE SET user_id = EXCLUDED.user_id, updated_at = now()"#,
        )
        .bind(&link.provider)
        .bind(&link.provider_user_id)
        .bind(&link.user_id)
        .execute(&self.pool)
        .await;
        if let Err(err) = upsert {
            if is_foreign_key_violation(&err) {
                return Err(StoreError::NotFound("user".into()));
            }
            return Err(StoreError::Unexpected(err.into()));
        }
        Ok(())
    }
}

#[async_trait]
impl AuthStore for PostgresStore {
    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn is_durable(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

fn bind_refresh_insert(
    record: &RefreshTokenRecord,
) -> sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments> {
    sqlx::query(
        r#"INSERT INTO refresh_tokens
           (id, user_id, token_hash, previous_token_hash, revoked_at, revoked_reason,
            expires_at, device_info, ip_address, created_at, last_used_at)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"#,
    )
    .bind(&record.id)
    .bind(&record.user_id)
    .bind(&record.token_hash)
    .bind(&record.previous_token_hash)
    .bind(record.revoked_at)
    .bind(&record.revoked_reason)
    .bind(record.expires_at)
    .bind(&record.device_info)
    .bind(&record.ip_address)
    .bind(record.created_at)
    .bind(record.last_used_at)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().map(|code| code == "23505").unwrap_or(false);
    }
    false
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().map(|code| code == "23503").unwrap_or(false);
    }
    false
}

fn signing_key_from_db(row: DbSigningKey) -> StoreResult<SigningKey> {
    Ok(SigningKey {
        id: row.id,
        kid: row.kid,
        algorithm: parse_algorithm(&row.algorithm)?,
        public_key_pem: row.public_key_pem,
        private_key_pem: row.private_key_pem,
        is_active: row.is_active,
        is_revoked: row.is_revoked,
        rotated_at: row.rotated_at,
        rotated_to_kid: row.rotated_to_kid,
        created_at: row.created_at,
        revoked_at: row.revoked_at,
    })
}

fn refresh_token_from_db(row: DbRefreshToken) -> RefreshTokenRecord {
    RefreshTokenRecord {
        id: row.id,
        user_id: row.user_id,
        token_hash: row.token_hash,
        previous_token_hash: row.previous_token_hash,
        revoked_at: row.revoked_at,
        revoked_reason: row.revoked_reason,
        expires_at: row.expires_at,
        device_info: row.device_info,
        ip_address: row.ip_address,
        created_at: row.created_at,
        last_used_at: row.last_used_at,
    }
}

fn user_from_db(row: DbUser) -> StoreResult<User> {
    let role = Role::from_str(&row.role).map_err(|err| StoreError::Unexpected(anyhow!(err)))?;
    Ok(User {
        id: row.id,
        email: row.email,
        display_name: row.display_name,
        role,
        created_at: row.created_at,
    })
}

fn parse_algorithm(value: &str) -> StoreResult<Algorithm> {
    // Session tokens are RSA-signed; reject anything else on load.
    match value {
        "RS256" => Ok(Algorithm::RS256),
        "RS384" => Ok(Algorithm::RS384),
        "RS512" => Ok(Algorithm::RS512),
        _ => Err(StoreError::Unexpected(anyhow!("invalid alg {value}"))),
    }
}

fn algorithm_to_str(value: Algorithm) -> StoreResult<&'static str> {
    match value {
        Algorithm::RS256 => Ok("RS256"),
        Algorithm::RS384 => Ok("RS384"),
        Algorithm::RS512 => Ok("RS512"),
        other => Err(StoreError::Unexpected(anyhow!(
            "unsupported signing alg {other:?}"
        ))),
    }
}
