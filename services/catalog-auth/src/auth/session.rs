//! Login, refresh and logout orchestration.
//!
//! # Purpose
//! Ties the identity bridge, user directory, token service and refresh-token
//! store together. Holds no session state of its own.
//!
//! # Login flow
//! `IdentityPresented -> IdentityVerified -> UserResolved -> SessionIssued`.
//! A user is resolved by identity link, then by email, and created otherwise.
//! The identity link is upserted on every login. No session is reported as
//! issued unless the refresh-token write succeeded.
use crate::auth::error::AuthError;
use crate::auth::oidc::{ExternalIdentity, IdentityVerifier};
use crate::auth::refresh::{IssuedRefreshToken, RefreshTokenStore};
use crate::auth::session_token::{IssuedAccessToken, SessionClaims, TokenService};
use crate::model::{IdentityLink, RevokeReason, Role, User};
use crate::store::{StoreError, UserDirectory};
use chrono::Utc;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoginStage {
    IdentityPresented,
    IdentityVerified,
    UserResolved,
    SessionIssued,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Audiences accepted on external identity assertions.
    pub identity_audiences: Vec<String>,
    /// Audiences session tokens may be minted for.
    pub allowed_audiences: Vec<String>,
}

/// Request metadata stored alongside a refresh token.
#[derive(Debug, Clone, Default)]
pub struct ClientContext {
    pub device_info: Option<String>,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LoginResult {
    pub user: User,
    pub access_token: IssuedAccessToken,
    pub refresh_token: IssuedRefreshToken,
}

#[derive(Debug, Clone)]
pub struct RefreshResult {
    pub user_id: String,
    pub access_token: IssuedAccessToken,
    pub refresh_token: IssuedRefreshToken,
}

pub struct AuthSessionService {
    identity: Arc<dyn IdentityVerifier>,
    users: Arc<dyn UserDirectory>,
    tokens: TokenService,
    refresh: RefreshTokenStore,
    config: SessionConfig,
}

impl AuthSessionService {
    pub fn new(
        identity: Arc<dyn IdentityVerifier>,
        users: Arc<dyn UserDirectory>,
        tokens: TokenService,
        refresh: RefreshTokenStore,
        config: SessionConfig,
    ) -> Self {
        Self {
            identity,
            users,
            tokens,
            refresh,
            config,
        }
    }

    fn ensure_audience_allowed(&self, audience: &str) -> Result<(), AuthError> {
        if self
            .config
            .allowed_audiences
            .iter()
            .any(|allowed| allowed == audience)
        {
            return Ok(());
        }
        Err(AuthError::AudienceNotAllowed(audience.to_string()))
    }

    pub async fn login_with_google(
        &self,
        id_token: &str,
        audience: &str,
        client: ClientContext,
    ) -> Result<LoginResult, AuthError> {
        let result = self.login_inner(id_token, audience, client).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(err) => err.reason(),
        };
        metrics::counter!("catalog_auth_logins_total", "outcome" => outcome).increment(1);
        result
    }

    async fn login_inner(
        &self,
        id_token: &str,
        audience: &str,
        client: ClientContext,
    ) -> Result<LoginResult, AuthError> {
        tracing::debug!(stage = ?LoginStage::IdentityPresented, "login started");
        self.ensure_audience_allowed(audience)?;
        let identity = self
            .identity
            .verify_external_identity(id_token, &self.config.identity_audiences)
            .await?;
        tracing::debug!(stage = ?LoginStage::IdentityVerified, provider = %identity.provider, "identity verified");

        let user = self.resolve_user(&identity).await?;
        tracing::debug!(stage = ?LoginStage::UserResolved, user_id = %user.id, "user resolved");

        let access_token = self
            .tokens
            .generate_access_token(&user.id, user.role, audience, None)
            .await?;
        let refresh_token = self
            .refresh
            .create_token(&user.id, client.device_info, client.ip_address)
            .await?;
        tracing::info!(stage = ?LoginStage::SessionIssued, user_id = %user.id, "session issued");
        Ok(LoginResult {
            user,
            access_token,
            refresh_token,
        })
    }

    async fn resolve_user(&self, identity: &ExternalIdentity) -> Result<User, AuthError> {
        let user = match self
            .users
            .find_user_by_identity(&identity.provider, &identity.subject)
            .await?
        {
            Some(user) => user,
            None => match self.users.find_user_by_email(&identity.email).await? {
                Some(user) => user,
                None => self.create_user(identity).await?,
            },
        };
        self.users
            .upsert_identity_link(IdentityLink {
                user_id: user.id.clone(),
                provider: identity.provider.clone(),
                provider_user_id: identity.subject.clone(),
            })
            .await?;
        Ok(user)
    }

    async fn create_user(&self, identity: &ExternalIdentity) -> Result<User, AuthError> {
        let candidate = User {
            id: uuid::Uuid::new_v4().to_string(),
            email: identity.email.to_lowercase(),
            display_name: identity.name.clone(),
            role: Role::default(),
            created_at: Utc::now(),
        };
        match self.users.create_user(candidate).await {
            Ok(user) => {
                tracing::info!(user_id = %user.id, "created user from external identity");
                Ok(user)
            }
            // A concurrent login created the same email first; use its row.
            Err(StoreError::Conflict(_)) => self
                .users
                .find_user_by_email(&identity.email)
                .await?
                .ok_or(AuthError::UserNotFound),
            Err(err) => Err(err.into()),
        }
    }

    /// Exchange a refresh token for a new token pair.
    ///
    /// # Overview
    /// The audience is checked first, then the token, its owner and the new
    /// access token. The refresh token is consumed only after all of that
    /// succeeded, so a failure at any earlier step leaves it usable.
    ///
    /// # Errors
    /// Client errors for bad audiences and dead, replayed or conflicting
    /// tokens. [`AuthError::Store`] and [`AuthError::Key`] when a dependency
    /// fails; the presented token is still live in that case.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        audience: &str,
    ) -> Result<RefreshResult, AuthError> {
        let result = self.refresh_inner(refresh_token, audience).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(err) => err.reason(),
        };
        metrics::counter!("catalog_auth_refresh_total", "outcome" => outcome).increment(1);
        result
    }

    async fn refresh_inner(
        &self,
        refresh_token: &str,
        audience: &str,
    ) -> Result<RefreshResult, AuthError> {
        self.ensure_audience_allowed(audience)?;
        let pending = self.refresh.inspect_token(refresh_token).await?;
        let user = self
            .users
            .get_user(pending.user_id())
            .await?
            .ok_or(AuthError::UserNotFound)?;
        // Minted before the token is consumed; an undelivered JWT is inert.
        let access_token = self
            .tokens
            .generate_access_token(&user.id, user.role, audience, None)
            .await?;
        let rotated = self.refresh.commit_rotation(pending).await?;
        Ok(RefreshResult {
            user_id: user.id,
            access_token,
            refresh_token: rotated,
        })
    }

    /// Revoke one refresh token. Unknown and already revoked tokens succeed.
    pub async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        let revoked = self
            .refresh
            .revoke_token(refresh_token, RevokeReason::Logout)
            .await?;
        tracing::debug!(revoked, "logout processed");
        Ok(())
    }

    /// Revoke every live refresh token of `user_id`.
    pub async fn logout_everywhere(&self, user_id: &str) -> Result<u64, AuthError> {
        let revoked = self
            .refresh
            .revoke_all_user_tokens(user_id, RevokeReason::LogoutAll)
            .await?;
        tracing::info!(user_id = %user_id, revoked, "signed out everywhere");
        Ok(revoked)
    }

    pub async fn verify_access_token(
        &self,
        token: &str,
        audience: &str,
    ) -> Result<SessionClaims, AuthError> {
        Ok(self.tokens.verify_token(token, audience).await?)
    }
}
