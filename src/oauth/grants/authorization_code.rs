//! Authorization-code grant with PKCE

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::GrantHandler;
use crate::oauth::{
    AccessToken, ErrorCode, GrantType, OAuthApp, OAuthError, TokenIssuer, TokenRequest,
    TokenResponse,
};

/// State captured at `/authorize` time, redeemed exactly once at `/token`
#[derive(Debug, Clone)]
pub struct AuthorizationCodeRecord {
    pub client_id: String,
    pub redirect_uri: String,
    pub subject: String,
    pub subject_ou: Option<String>,
    pub scopes: Vec<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Issued authorization codes pending redemption
pub struct AuthorizationCodeStore {
    codes: DashMap<String, AuthorizationCodeRecord>,
    ttl: Duration,
}

impl AuthorizationCodeStore {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            codes: DashMap::new(),
            ttl: Duration::seconds(ttl_secs),
        }
    }

    /// Record a freshly issued code.
    pub fn issue(&self, code: impl Into<String>, mut record: AuthorizationCodeRecord) {
        record.expires_at = Utc::now() + self.ttl;
        self.codes.insert(code.into(), record);
    }

    /// Non-consuming lookup for validation.
    pub fn peek(&self, code: &str) -> Option<AuthorizationCodeRecord> {
        self.codes.get(code).map(|record| record.value().clone())
    }

    /// Redeem a code; a second redemption returns `None`.
    pub fn consume(&self, code: &str) -> Option<AuthorizationCodeRecord> {
        self.codes.remove(code).map(|(_, record)| record)
    }
}

/// Check a PKCE verifier against the stored challenge.
fn pkce_matches(challenge: &str, method: Option<&str>, verifier: &str) -> bool {
    match method.unwrap_or("plain") {
        "S256" => {
            let digest = Sha256::digest(verifier.as_bytes());
            let computed = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest);
            computed.as_bytes().ct_eq(challenge.as_bytes()).into()
        }
        _ => verifier.as_bytes().ct_eq(challenge.as_bytes()).into(),
    }
}

/// Redeems authorization codes for access tokens
pub struct AuthorizationCodeGrantHandler {
    issuer: Arc<TokenIssuer>,
    codes: Arc<AuthorizationCodeStore>,
}

impl AuthorizationCodeGrantHandler {
    pub fn new(issuer: Arc<TokenIssuer>, codes: Arc<AuthorizationCodeStore>) -> Self {
        Self { issuer, codes }
    }

    fn check_record(
        &self,
        record: &AuthorizationCodeRecord,
        request: &TokenRequest,
        app: &OAuthApp,
    ) -> Result<(), OAuthError> {
        if record.client_id != app.client_id {
            return Err(OAuthError::invalid_grant(
                "authorization code was issued to a different client",
            ));
        }

        if record.expires_at <= Utc::now() {
            return Err(OAuthError::invalid_grant("authorization code has expired"));
        }

        match request.redirect_uri.as_deref() {
            Some(uri) if uri == record.redirect_uri => {}
            _ => {
                return Err(OAuthError::invalid_grant(
                    "redirect_uri does not match the authorization request",
                ))
            }
        }

        if let Some(challenge) = &record.code_challenge {
            let verifier = request.code_verifier.as_deref().ok_or_else(|| {
                OAuthError::invalid_request("code_verifier is required for this authorization")
            })?;
            if !pkce_matches(challenge, record.code_challenge_method.as_deref(), verifier) {
                return Err(OAuthError::invalid_grant("code_verifier does not match"));
            }
        }

        Ok(())
    }
}

#[async_trait]
impl GrantHandler for AuthorizationCodeGrantHandler {
    fn grant_type(&self) -> GrantType {
        GrantType::AuthorizationCode
    }

    async fn validate_grant(
        &self,
        request: &TokenRequest,
        app: &OAuthApp,
    ) -> Result<(), OAuthError> {
        if app.redirect_uris.is_empty() {
            return Err(OAuthError::new(
                ErrorCode::UnauthorizedClient,
                "client has no registered redirect URIs",
            ));
        }

        let code = request
            .code
            .as_deref()
            .filter(|code| !code.is_empty())
            .ok_or_else(|| OAuthError::invalid_request("authorization code is required"))?;

        let record = self
            .codes
            .peek(code)
            .ok_or_else(|| OAuthError::invalid_grant("authorization code is unknown or used"))?;

        self.check_record(&record, request, app)
    }

    async fn handle_grant(
        &self,
        request: &TokenRequest,
        app: &OAuthApp,
    ) -> Result<TokenResponse, OAuthError> {
        let code = request
            .code
            .as_deref()
            .ok_or_else(|| OAuthError::invalid_request("authorization code is required"))?;

        // Single use: the remove is the atomic redemption point
        let record = self
            .codes
            .consume(code)
            .ok_or_else(|| OAuthError::invalid_grant("authorization code is unknown or used"))?;

        self.check_record(&record, request, app)?;

        // The token carries the scopes consented at /authorize, narrowed
        // by the request's filtered scope when one was sent
        let scopes: Vec<String> = if request.scope.is_empty() {
            record.scopes.clone()
        } else {
            request
                .scope
                .split_whitespace()
                .filter(|scope| record.scopes.iter().any(|granted| granted.as_str() == *scope))
                .map(String::from)
                .collect()
        };

        let (token, expires_in) = self.issuer.issue_access_token(
            &record.subject,
            request.audience.as_deref(),
            &scopes,
            record.subject_ou.as_deref(),
            None,
        )?;

        Ok(TokenResponse {
            access_token: AccessToken {
                token,
                token_type: "Bearer".to_string(),
                expires_in,
                subject: record.subject.clone(),
                subject_ou: record.subject_ou.clone(),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenConfig;
    use crate::oauth::ClientAuthMethod;
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
            client_id: "clientA".to_string(),
            hashed_client_secret: None,
            redirect_uris: vec!["https://app/cb".to_string()],
            grant_types: HashSet::from([GrantType::AuthorizationCode, GrantType::RefreshToken]),
            allowed_scopes: vec!["system:user".to_string()],
            auth_method: ClientAuthMethod::ClientSecretBasic,
            ou_id: None,
        }
    }

    fn record(challenge: Option<(&str, &str)>) -> AuthorizationCodeRecord {
        AuthorizationCodeRecord {
            client_id: "clientA".to_string(),
            redirect_uri: "https://app/cb".to_string(),
            subject: "user-7".to_string(),
            subject_ou: Some("ou1".to_string()),
            scopes: vec!["system:user".to_string()],
            code_challenge: challenge.map(|(c, _)| c.to_string()),
            code_challenge_method: challenge.map(|(_, m)| m.to_string()),
            expires_at: Utc::now(),
        }
    }

    fn request(code: &str, verifier: Option<&str>) -> TokenRequest {
        TokenRequest {
            grant_type: "authorization_code".to_string(),
            code: Some(code.to_string()),
            redirect_uri: Some("https://app/cb".to_string()),
            code_verifier: verifier.map(String::from),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_code_redeems_once() {
        let codes = Arc::new(AuthorizationCodeStore::new(600));
        codes.issue("C1", record(None));
        let handler = AuthorizationCodeGrantHandler::new(issuer(), Arc::clone(&codes));

        let request = request("C1", None);
        handler.validate_grant(&request, &app()).await.unwrap();
        let response = handler.handle_grant(&request, &app()).await.unwrap();
        assert_eq!(response.access_token.subject, "user-7");

        // Replay is rejected
        let replay = handler.handle_grant(&request, &app()).await;
        assert!(matches!(replay, Err(e) if e.code == ErrorCode::InvalidGrant));
    }

    #[tokio::test]
    async fn test_redirect_uri_must_match() {
        let codes = Arc::new(AuthorizationCodeStore::new(600));
        codes.issue("C1", record(None));
        let handler = AuthorizationCodeGrantHandler::new(issuer(), codes);

        let mut bad = request("C1", None);
        bad.redirect_uri = Some("https://evil/cb".to_string());
        assert!(handler.validate_grant(&bad, &app()).await.is_err());
    }

    #[tokio::test]
    async fn test_pkce_s256() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        let digest = Sha256::digest(verifier.as_bytes());
        let challenge = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest);

        let codes = Arc::new(AuthorizationCodeStore::new(600));
        codes.issue("C1", record(Some((&challenge, "S256"))));
        let handler = AuthorizationCodeGrantHandler::new(issuer(), codes);

        // Missing verifier
        assert!(handler
            .validate_grant(&request("C1", None), &app())
            .await
            .is_err());

        // Wrong verifier
        assert!(handler
            .validate_grant(&request("C1", Some("wrong")), &app())
            .await
            .is_err());

        // Correct verifier
        assert!(handler
            .validate_grant(&request("C1", Some(verifier)), &app())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_expired_code_rejected() {
        let codes = Arc::new(AuthorizationCodeStore::new(-1));
        codes.issue("C1", record(None));
        let handler = AuthorizationCodeGrantHandler::new(issuer(), codes);

        let result = handler.validate_grant(&request("C1", None), &app()).await;
        assert!(matches!(result, Err(e) if e.code == ErrorCode::InvalidGrant));
    }

    #[tokio::test]
    async fn test_code_bound_to_client() {
        let codes = Arc::new(AuthorizationCodeStore::new(600));
        let mut foreign = record(None);
        foreign.client_id = "clientB".to_string();
        codes.issue("C1", foreign);
        let handler = AuthorizationCodeGrantHandler::new(issuer(), codes);

        assert!(handler
            .validate_grant(&request("C1", None), &app())
            .await
            .is_err());
    }
}
