//! Token exchange (RFC 8693)

use std::sync::Arc;

use async_trait::async_trait;

use super::GrantHandler;
use crate::oauth::{
    AccessToken, GrantType, OAuthApp, OAuthError, TokenIssuer, TokenRequest, TokenResponse,
    TOKEN_TYPE_ACCESS, TOKEN_TYPE_JWT,
};

fn supported_token_type(value: &str) -> bool {
    value == TOKEN_TYPE_ACCESS || value == TOKEN_TYPE_JWT
}

/// Exchanges a subject token for a new access token, optionally carrying
/// the acting party as an `act` claim.
pub struct TokenExchangeGrantHandler {
    issuer: Arc<TokenIssuer>,
}

impl TokenExchangeGrantHandler {
    pub fn new(issuer: Arc<TokenIssuer>) -> Self {
        Self { issuer }
    }
}

#[async_trait]
impl GrantHandler for TokenExchangeGrantHandler {
    fn grant_type(&self) -> GrantType {
        GrantType::TokenExchange
    }

    async fn validate_grant(
        &self,
        request: &TokenRequest,
        _app: &OAuthApp,
    ) -> Result<(), OAuthError> {
        let subject_token = request
            .subject_token
            .as_deref()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| OAuthError::invalid_request("subject_token is required"))?;

        let subject_type = request
            .subject_token_type
            .as_deref()
            .ok_or_else(|| OAuthError::invalid_request("subject_token_type is required"))?;
        if !supported_token_type(subject_type) {
            return Err(OAuthError::invalid_request(format!(
                "unsupported subject_token_type '{subject_type}'"
            )));
        }

        if let Some(requested) = request.requested_token_type.as_deref() {
            if !supported_token_type(requested) {
                return Err(OAuthError::invalid_request(format!(
                    "unsupported requested_token_type '{requested}'"
                )));
            }
        }

        if request.actor_token.is_some() {
            let actor_type = request
                .actor_token_type
                .as_deref()
                .ok_or_else(|| {
                    OAuthError::invalid_request("actor_token_type is required with actor_token")
                })?;
            if !supported_token_type(actor_type) {
                return Err(OAuthError::invalid_request(format!(
                    "unsupported actor_token_type '{actor_type}'"
                )));
            }
        }

        // Signature verification belongs to validation so a bad subject
        // token never reaches minting
        self.issuer.verify(subject_token)?;

        if let Some(actor_token) = request.actor_token.as_deref() {
            self.issuer.verify(actor_token)?;
        }

        Ok(())
    }

    async fn handle_grant(
        &self,
        request: &TokenRequest,
        app: &OAuthApp,
    ) -> Result<TokenResponse, OAuthError> {
        let subject_token = request
            .subject_token
            .as_deref()
            .ok_or_else(|| OAuthError::invalid_request("subject_token is required"))?;
        let subject_claims = self.issuer.verify(subject_token)?;

        let actor = match request.actor_token.as_deref() {
            Some(actor_token) => {
                let actor_claims = self.issuer.verify(actor_token)?;
                Some(serde_json::json!({ "sub": actor_claims.sub }))
            }
            None => None,
        };

        // Audience comes from the exchange request; `resource` doubles as
        // the audience when no audience is sent
        let audience = request
            .audience
            .clone()
            .or_else(|| request.resource.clone());

        // The exchanged token carries the request's filtered scopes,
        // narrowed to what the subject token actually held
        let subject_scopes = subject_claims.scopes();
        let scopes: Vec<String> = if request.scope.is_empty() {
            subject_scopes
                .iter()
                .filter(|scope| app.allowed_scopes.iter().any(|allowed| allowed == *scope))
                .cloned()
                .collect()
        } else {
            request
                .scope
                .split_whitespace()
                .filter(|scope| subject_scopes.iter().any(|held| held.as_str() == *scope))
                .map(String::from)
                .collect()
        };

        let (token, expires_in) = self.issuer.issue_access_token(
            &subject_claims.sub,
            audience.as_deref(),
            &scopes,
            subject_claims.ou.as_deref(),
            actor,
        )?;

        Ok(TokenResponse {
            access_token: AccessToken {
                token,
                token_type: "Bearer".to_string(),
                expires_in,
                subject: subject_claims.sub.clone(),
                subject_ou: subject_claims.ou.clone(),
                audience,
                scopes,
                claims_request: request.claims_request.clone(),
                claims_locales: request.claims_locales.clone(),
            },
            refresh_token: None,
            id_token: None,
            issued_token_type: request
                .requested_token_type
                .clone()
                .or_else(|| Some(TOKEN_TYPE_ACCESS.to_string())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenConfig;
    use crate::oauth::{ClientAuthMethod, ErrorCode};
    use std::collections::HashSet;

    fn issuer() -> Arc<TokenIssuer> {
        Arc::new(TokenIssuer::new(&TokenConfig {
            issuer: "thunder-test".to_string(),
            signing_secret: "0123456789abcdef0123456789abcdef".to_string(),
            access_token_ttl_secs: 3600,
            refresh_token_ttl_secs: 86400,
        }))
    }

    fn app() -> OAuthApp {
        OAuthApp {
            app_id: "app-1".to_string(),
            client_id: "exchanger".to_string(),
            hashed_client_secret: None,
            redirect_uris: vec![],
            grant_types: HashSet::from([GrantType::TokenExchange]),
            allowed_scopes: vec!["system:user".to_string()],
            auth_method: ClientAuthMethod::ClientSecretBasic,
            ou_id: None,
        }
    }

    fn subject_token(issuer: &TokenIssuer) -> String {
        issuer
            .issue_access_token(
                "user-7",
                None,
                &["system:user".to_string()],
                Some("ou1"),
                None,
            )
            .unwrap()
            .0
    }

    #[tokio::test]
    async fn test_exchange_preserves_subject() {
        let issuer = issuer();
        let handler = TokenExchangeGrantHandler::new(Arc::clone(&issuer));

        let request = TokenRequest {
            grant_type: GrantType::TokenExchange.as_param().to_string(),
            subject_token: Some(subject_token(&issuer)),
            subject_token_type: Some(TOKEN_TYPE_ACCESS.to_string()),
            audience: Some("downstream".to_string()),
            ..Default::default()
        };

        handler.validate_grant(&request, &app()).await.unwrap();
        let response = handler.handle_grant(&request, &app()).await.unwrap();

        assert_eq!(response.access_token.subject, "user-7");
        assert_eq!(response.access_token.audience.as_deref(), Some("downstream"));
        assert_eq!(
            response.issued_token_type.as_deref(),
            Some(TOKEN_TYPE_ACCESS)
        );

        let claims = issuer.verify(&response.access_token.token).unwrap();
        assert_eq!(claims.aud.as_deref(), Some("downstream"));
        assert_eq!(claims.ou.as_deref(), Some("ou1"));
    }

    #[tokio::test]
    async fn test_requested_token_type_echoed() {
        let issuer = issuer();
        let handler = TokenExchangeGrantHandler::new(Arc::clone(&issuer));

        let request = TokenRequest {
            grant_type: GrantType::TokenExchange.as_param().to_string(),
            subject_token: Some(subject_token(&issuer)),
            subject_token_type: Some(TOKEN_TYPE_JWT.to_string()),
            requested_token_type: Some(TOKEN_TYPE_JWT.to_string()),
            ..Default::default()
        };

        let response = handler.handle_grant(&request, &app()).await.unwrap();
        assert_eq!(response.issued_token_type.as_deref(), Some(TOKEN_TYPE_JWT));
    }

    #[tokio::test]
    async fn test_actor_recorded_as_act_claim() {
        let issuer = issuer();
        let handler = TokenExchangeGrantHandler::new(Arc::clone(&issuer));
        let actor_token = issuer
            .issue_access_token("service-9", None, &[], None, None)
            .unwrap()
            .0;

        let request = TokenRequest {
            grant_type: GrantType::TokenExchange.as_param().to_string(),
            subject_token: Some(subject_token(&issuer)),
            subject_token_type: Some(TOKEN_TYPE_ACCESS.to_string()),
            actor_token: Some(actor_token),
            actor_token_type: Some(TOKEN_TYPE_ACCESS.to_string()),
            ..Default::default()
        };

        handler.validate_grant(&request, &app()).await.unwrap();
        let response = handler.handle_grant(&request, &app()).await.unwrap();

        let claims = issuer.verify(&response.access_token.token).unwrap();
        assert_eq!(claims.act.unwrap()["sub"], "service-9");
    }

    #[tokio::test]
    async fn test_missing_subject_token_rejected() {
        let handler = TokenExchangeGrantHandler::new(issuer());
        let request = TokenRequest {
            grant_type: GrantType::TokenExchange.as_param().to_string(),
            ..Default::default()
        };

        let result = handler.validate_grant(&request, &app()).await;
        assert!(matches!(result, Err(e) if e.code == ErrorCode::InvalidRequest));
    }

    #[tokio::test]
    async fn test_unknown_token_type_rejected() {
        let issuer = issuer();
        let handler = TokenExchangeGrantHandler::new(Arc::clone(&issuer));
        let request = TokenRequest {
            grant_type: GrantType::TokenExchange.as_param().to_string(),
            subject_token: Some(subject_token(&issuer)),
            subject_token_type: Some("urn:ietf:params:oauth:token-type:saml2".to_string()),
            ..Default::default()
        };

        let result = handler.validate_grant(&request, &app()).await;
        assert!(matches!(result, Err(e) if e.code == ErrorCode::InvalidRequest));
    }

    #[tokio::test]
    async fn test_forged_subject_token_rejected() {
        let handler = TokenExchangeGrantHandler::new(issuer());
        let request = TokenRequest {
            grant_type: GrantType::TokenExchange.as_param().to_string(),
            subject_token: Some("not.a.jwt".to_string()),
            subject_token_type: Some(TOKEN_TYPE_ACCESS.to_string()),
            ..Default::default()
        };

        assert!(handler.validate_grant(&request, &app()).await.is_err());
    }
}
