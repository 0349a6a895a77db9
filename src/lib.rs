//! Thunder - A lightweight OAuth 2.0 / OIDC identity provider core
//!
//! This crate provides the request-handling core of an identity provider:
//! token issuance, OU-scoped authorization, multi-level caching, and the
//! composite resource store backing the admin surface.

pub mod authz;
pub mod cache;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod events;
pub mod oauth;
pub mod observability;
pub mod oidc;
pub mod server;
pub mod store;

pub use config::Config;

/// Result type alias for thunder operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for thunder
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Authentication required: {0}")]
    Unauthenticated(String),

    #[error("Authorization denied: {0}")]
    AccessDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store error: {0}")]
    Store(#[from] store::StoreError),

    #[error("Dependent service failure: {0}")]
    Dependency(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
