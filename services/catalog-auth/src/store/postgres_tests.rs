//! Postgres store tests against a real database.
//!
//! # Purpose
//! Exercise the SQL paths (partial unique index, conditional rotation,
//! advisory-locked activation) that the in-memory backend only imitates.
//!
//! # How to use
//! Set `CATALOG_AUTH_TEST_DATABASE_URL` (or `DATABASE_URL`) and run
//! `cargo test -p catalog-auth --features pg-tests postgres_tests`.
//! Without a URL the tests return early.
use super::postgres::PostgresStore;
use super::{
    AuthStore, RefreshTokenRepository, RotationOutcome, SigningKeyStore, StoreError,
    UserDirectory,
};
use crate::config::PostgresConfig;
use crate::model::{IdentityLink, RefreshTokenRecord, RevokeReason, Role, SigningKey, User};
use chrono::{Duration, Utc};
use jsonwebtoken::Algorithm;
use serial_test::serial;
use std::sync::Arc;

fn database_url() -> Option<String> {
    std::env::var("CATALOG_AUTH_TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .ok()
}

async fn fresh_store() -> Option<PostgresStore> {
    let url = database_url()?;
    let pg = PostgresConfig {
        url,
        max_connections: 5,
        connect_timeout_ms: 5_000,
        acquire_timeout_ms: 5_000,
    };
    let store = PostgresStore::connect(&pg).await.expect("connect");
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(1)
        .connect(&pg.url)
        .await
        .expect("reset pool");
    sqlx::query("TRUNCATE signing_keys, refresh_tokens, identity_links, users")
        .execute(&pool)
        .await
        .expect("truncate");
    Some(store)
}

fn signing_key(kid: &str) -> SigningKey {
    SigningKey {
        id: uuid::Uuid::new_v4().to_string(),
        kid: kid.to_string(),
        algorithm: Algorithm::RS256,
        public_key_pem: "public".to_string(),
        private_key_pem: "private".to_string(),
        is_active: true,
        is_revoked: false,
        rotated_at: None,
        rotated_to_kid: None,
        created_at: Utc::now(),
        revoked_at: None,
    }
}

fn refresh_record(hash: &str, user_id: &str, previous: Option<&str>) -> RefreshTokenRecord {
    let now = Utc::now();
    RefreshTokenRecord {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        token_hash: hash.to_string(),
        previous_token_hash: previous.map(str::to_string),
        revoked_at: None,
        revoked_reason: None,
        expires_at: now + Duration::days(7),
        device_info: Some("test-agent".to_string()),
        ip_address: Some("10.0.0.1".to_string()),
        created_at: now,
        last_used_at: None,
    }
}

#[tokio::test]
#[serial]
async fn single_active_key_is_enforced_by_index() {
    let Some(store) = fresh_store().await else {
        return;
    };
    store.health_check().await.expect("health");
    assert!(store.is_durable());

    assert!(
        store
            .insert_signing_key_if_none_active(signing_key("k1"))
            .await
            .expect("first")
    );
    assert!(
        !store
            .insert_signing_key_if_none_active(signing_key("k2"))
            .await
            .expect("second")
    );

    let previous = store
        .activate_signing_key(signing_key("k3"), Utc::now())
        .await
        .expect("activate");
    assert_eq!(previous.as_deref(), Some("k1"));
    store.set_rotated_to_kid("k1", "k3").await.expect("lineage");

    let old = store.signing_key_by_kid("k1").await.expect("get").expect("k1");
    assert!(!old.is_active);
    assert!(old.rotated_at.is_some());
    assert_eq!(old.rotated_to_kid.as_deref(), Some("k3"));

    assert!(store.revoke_signing_key("k1", Utc::now()).await.expect("revoke"));
    assert!(!store.revoke_signing_key("missing", Utc::now()).await.expect("revoke"));
    let kids: Vec<String> = store
        .list_unrevoked_signing_keys()
        .await
        .expect("list")
        .into_iter()
        .map(|key| key.kid)
        .collect();
    assert_eq!(kids, vec!["k3".to_string()]);
}

#[tokio::test]
#[serial]
async fn concurrent_rotation_has_one_winner() {
    let Some(store) = fresh_store().await else {
        return;
    };
    let store = Arc::new(store);
    store
        .insert_refresh_token(refresh_record("h0", "u1", None))
        .await
        .expect("insert");

    let mut handles = Vec::new();
    for idx in 0..4 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store
                .rotate_refresh_token(
                    "h0",
                    refresh_record(&format!("h1-{idx}"), "u1", Some("h0")),
                    Utc::now(),
                )
                .await
                .expect("rotate")
        }));
    }
    let mut winners = 0;
    for handle in handles {
        if handle.await.expect("join") == RotationOutcome::Rotated {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);

    let old = store.refresh_token_by_hash("h0").await.expect("get").expect("h0");
    assert!(old.was_rotated());
    let successor = store
        .refresh_token_by_previous_hash("h0")
        .await
        .expect("get")
        .expect("successor");
    assert_eq!(successor.device_info.as_deref(), Some("test-agent"));
}

#[tokio::test]
#[serial]
async fn revoke_user_tokens_counts_live_records() {
    let Some(store) = fresh_store().await else {
        return;
    };
    for hash in ["a", "b", "c"] {
        store
            .insert_refresh_token(refresh_record(hash, "u1", None))
            .await
            .expect("insert");
    }
    let now = Utc::now();
    assert!(store.revoke_refresh_token("a", RevokeReason::Logout, now).await.expect("revoke"));
    assert!(!store.revoke_refresh_token("a", RevokeReason::Logout, now).await.expect("again"));
    let count = store
        .revoke_user_refresh_tokens("u1", RevokeReason::ReuseDetected, now)
        .await
        .expect("revoke all");
    assert_eq!(count, 2);
    let b = store.refresh_token_by_hash("b").await.expect("get").expect("b");
    assert_eq!(b.revoked_reason.as_deref(), Some("reuse_detected"));
}

#[tokio::test]
#[serial]
async fn users_and_identity_links() {
    let Some(store) = fresh_store().await else {
        return;
    };
    let user = User {
        id: "u1".to_string(),
        email: "Seller@Example.com".to_string(),
        display_name: Some("Seller".to_string()),
        role: Role::Seller,
        created_at: Utc::now(),
    };
    store.create_user(user.clone()).await.expect("create");
    let dup = User {
        id: "u2".to_string(),
        ..user
    };
    assert!(matches!(store.create_user(dup).await, Err(StoreError::Conflict(_))));

    let by_email = store
        .find_user_by_email("seller@example.com")
        .await
        .expect("find")
        .expect("user");
    assert_eq!(by_email.role, Role::Seller);

    store
        .upsert_identity_link(IdentityLink {
            user_id: "u1".to_string(),
            provider: "google".to_string(),
            provider_user_id: "g-1".to_string(),
        })
        .await
        .expect("link");
    let linked = store
        .find_user_by_identity("google", "g-1")
        .await
        .expect("find")
        .expect("user");
    assert_eq!(linked.id, "u1");

    let missing = store
        .upsert_identity_link(IdentityLink {
            user_id: "nobody".to_string(),
            provider: "google".to_string(),
            provider_user_id: "g-2".to_string(),
        })
        .await;
    assert!(matches!(missing, Err(StoreError::NotFound(_))));
}
