//! Auth service data model.
//!
//! # Purpose
//! Re-exports the entity records shared by the auth components and the
//! storage backends.
mod refresh_token;
mod signing_key;
mod user;

pub use refresh_token::{RefreshTokenRecord, RevokeReason};
pub use signing_key::SigningKey;
pub use user::{IdentityLink, Role, User};
