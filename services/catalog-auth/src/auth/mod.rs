//! Token and identity machinery.
//!
//! # Purpose
//! Signing-key lifecycle, JWKS publication, Google identity verification,
//! session-token minting and verification, refresh-token rotation, and the
//! session service that orchestrates them.
pub mod error;
pub mod jwks;
pub mod key_manager;
pub mod keys;
pub mod oidc;
pub mod refresh;
pub mod session;
pub mod session_token;
