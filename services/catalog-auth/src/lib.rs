//! Trust and session-token service library crate.
//!
//! # Purpose
//! Exposes the auth API surface, token machinery, configuration, and storage
//! implementations for use by the binary and tests.
//!
//! # Notes
//! Catalog services consume two things from this crate: a verified
//! `(user_id, role)` via [`api::extract::AuthenticatedUser`], and the
//! login/refresh/logout flows in [`auth::session`].
pub mod api;
pub mod app;
pub mod auth;
pub mod config;
pub mod model;
pub mod observability;
pub mod store;
