//! Umbrella error for session orchestration.
//!
//! Every variant carries its precise cause for logs. [`AuthError::is_client_error`]
//! decides whether the HTTP layer answers with the generic 401 or a 500.
use crate::auth::keys::KeyError;
use crate::auth::oidc::IdentityError;
use crate::auth::refresh::RefreshTokenError;
use crate::auth::session_token::TokenError;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("identity verification failed: {0}")]
    IdentityVerificationFailed(String),
    #[error("identity provider unavailable: {0}")]
    IdentityProviderUnavailable(String),
    #[error("audience not allowed: {0}")]
    AudienceNotAllowed(String),
    #[error("user not found")]
    UserNotFound,
    #[error(transparent)]
    Token(TokenError),
    #[error(transparent)]
    Refresh(RefreshTokenError),
    #[error(transparent)]
    Key(KeyError),
    #[error(transparent)]
    Store(StoreError),
}

impl AuthError {
    /// True when the failure is attributable to the presented credentials.
    ///
    /// An unreachable identity provider also counts: the assertion could not
    /// be verified, so the request is treated as unauthenticated.
    pub fn is_client_error(&self) -> bool {
        match self {
            AuthError::IdentityVerificationFailed(_)
            | AuthError::IdentityProviderUnavailable(_)
            | AuthError::AudienceNotAllowed(_)
            | AuthError::UserNotFound => true,
            AuthError::Token(err) => err.is_client_error(),
            AuthError::Refresh(RefreshTokenError::Store(_)) => false,
            AuthError::Refresh(_) => true,
            AuthError::Key(KeyError::KeyNotFound(_)) => true,
            AuthError::Key(_) | AuthError::Store(_) => false,
        }
    }

    /// Stable label for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::IdentityVerificationFailed(_) => "identity_invalid",
            AuthError::IdentityProviderUnavailable(_) => "identity_unavailable",
            AuthError::AudienceNotAllowed(_) => "audience_not_allowed",
            AuthError::UserNotFound => "user_not_found",
            AuthError::Token(err) => err.reason(),
            AuthError::Refresh(err) => err.reason(),
            AuthError::Key(_) => "key_error",
            AuthError::Store(_) => "store_error",
        }
    }
}

impl From<IdentityError> for AuthError {
    fn from(value: IdentityError) -> Self {
        match value {
            IdentityError::VerificationFailed(reason) => {
                AuthError::IdentityVerificationFailed(reason)
            }
            IdentityError::ProviderUnavailable(reason) => {
                AuthError::IdentityProviderUnavailable(reason)
            }
        }
    }
}

impl From<TokenError> for AuthError {
    fn from(value: TokenError) -> Self {
        match value {
            TokenError::Key(err) => AuthError::Key(err),
            other => AuthError::Token(other),
        }
    }
}

impl From<RefreshTokenError> for AuthError {
    fn from(value: RefreshTokenError) -> Self {
        AuthError::Refresh(value)
    }
}

impl From<KeyError> for AuthError {
    fn from(value: KeyError) -> Self {
        AuthError::Key(value)
    }
}

impl From<StoreError> for AuthError {
    fn from(value: StoreError) -> Self {
        AuthError::Store(value)
    }
}
