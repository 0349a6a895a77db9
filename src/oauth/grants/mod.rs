//! Grant handlers and their registry

pub mod authorization_code;
pub mod client_credentials;
pub mod exchange;
pub mod refresh;

pub use authorization_code::{AuthorizationCodeGrantHandler, AuthorizationCodeStore, AuthorizationCodeRecord};
pub use client_credentials::ClientCredentialsGrantHandler;
pub use exchange::TokenExchangeGrantHandler;
pub use refresh::{RefreshGrantHandler, RefreshTokenStore};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::oauth::{GrantType, OAuthApp, OAuthError, TokenRequest, TokenResponse};

/// Registry lookup error. `Unsupported` maps to the OAuth
/// `unsupported_grant_type` code; anything else is a server error.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Unsupported grant type: {0}")]
    Unsupported(String),

    #[error("Grant registry failure: {0}")]
    Internal(String),
}

/// A grant handler validates its preconditions and mints tokens
#[async_trait]
pub trait GrantHandler: Send + Sync {
    fn grant_type(&self) -> GrantType;

    /// Grant-specific precondition checks. Errors are already shaped
    /// with their OAuth error code and pass through the token service
    /// verbatim.
    async fn validate_grant(
        &self,
        request: &TokenRequest,
        app: &OAuthApp,
    ) -> Result<(), OAuthError>;

    /// Mint the access token for a validated request.
    async fn handle_grant(
        &self,
        request: &TokenRequest,
        app: &OAuthApp,
    ) -> Result<TokenResponse, OAuthError>;
}

/// Mints and persists refresh tokens on behalf of other grants
#[async_trait]
pub trait RefreshTokenIssuer: Send + Sync {
    /// Persist a refresh token and attach it to the response. The record
    /// is durable before the response carries the token; a persistence
    /// failure fails the whole request.
    async fn issue_refresh_token(
        &self,
        response: &mut TokenResponse,
        app: &OAuthApp,
        subject: &str,
        audience: Option<&str>,
        granted_by: GrantType,
        scopes: &[String],
        ou_id: Option<&str>,
    ) -> Result<(), OAuthError>;
}

/// Maps grant-type identifiers to handlers
pub struct GrantHandlerRegistry {
    handlers: HashMap<GrantType, Arc<dyn GrantHandler>>,
    refresh_issuer: Option<Arc<dyn RefreshTokenIssuer>>,
}

impl GrantHandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            refresh_issuer: None,
        }
    }

    pub fn register(&mut self, handler: Arc<dyn GrantHandler>) {
        self.handlers.insert(handler.grant_type(), handler);
    }

    pub fn set_refresh_issuer(&mut self, issuer: Arc<dyn RefreshTokenIssuer>) {
        self.refresh_issuer = Some(issuer);
    }

    /// Resolve the handler for a raw `grant_type` value.
    pub fn handler_for(&self, grant_type: &str) -> Result<Arc<dyn GrantHandler>, RegistryError> {
        let parsed = GrantType::from_param(grant_type)
            .ok_or_else(|| RegistryError::Unsupported(grant_type.to_string()))?;

        self.handlers
            .get(&parsed)
            .cloned()
            .ok_or_else(|| RegistryError::Internal(format!("no handler registered for {grant_type}")))
    }

    /// The refresh-token minting capability, when wired.
    pub fn refresh_issuer(&self) -> Option<Arc<dyn RefreshTokenIssuer>> {
        self.refresh_issuer.clone()
    }
}

impl Default for GrantHandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
