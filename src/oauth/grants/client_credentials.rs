//! Client-credentials grant

use std::sync::Arc;

use async_trait::async_trait;

use super::GrantHandler;
use crate::oauth::{
    AccessToken, GrantType, OAuthApp, OAuthError, TokenIssuer, TokenRequest, TokenResponse,
};

/// Issues machine-to-machine tokens; the subject is the client itself.
pub struct ClientCredentialsGrantHandler {
    issuer: Arc<TokenIssuer>,
}

impl ClientCredentialsGrantHandler {
    pub fn new(issuer: Arc<TokenIssuer>) -> Self {
        Self { issuer }
    }
}

#[async_trait]
impl GrantHandler for ClientCredentialsGrantHandler {
    fn grant_type(&self) -> GrantType {
        GrantType::ClientCredentials
    }

    async fn validate_grant(
        &self,
        request: &TokenRequest,
        _app: &OAuthApp,
    ) -> Result<(), OAuthError> {
        // Client authentication already happened upstream; the grant
        // carries no credential of its own.
        if request.refresh_token.is_some() || request.code.is_some() {
            return Err(OAuthError::invalid_request(
                "client_credentials request carries foreign grant parameters",
            ));
        }
        Ok(())
    }

    async fn handle_grant(
        &self,
        request: &TokenRequest,
        app: &OAuthApp,
    ) -> Result<TokenResponse, OAuthError> {
        let scopes: Vec<String> = request.scope.split_whitespace().map(String::from).collect();

        let (token, expires_in) = self.issuer.issue_access_token(
            &app.client_id,
            request.audience.as_deref(),
            &scopes,
            app.ou_id.as_deref(),
            None,
        )?;

        Ok(TokenResponse {
            access_token: AccessToken {
                token,
                token_type: "Bearer".to_string(),
                expires_in,
                subject: app.client_id.clone(),
                subject_ou: app.ou_id.clone(),
                audience: request.audience.clone(),
                scopes,
                claims_request: request.claims_request.clone(),
                claims_locales: request.claims_locales.clone(),
            },
            refresh_token: None,
            id_token: None,
            issued_token_type: None,
        })
    }
}
