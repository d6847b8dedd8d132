//! Auth service HTTP API module.
//!
//! # Purpose
//! Route handler modules, the bearer-token extractor, and shared
//! request/response types.
pub mod admin;
pub mod error;
pub mod extract;
pub mod openapi;
pub mod session;
pub mod system;
pub mod types;
