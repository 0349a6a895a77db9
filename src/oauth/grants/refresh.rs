//! Refresh-token grant and refresh-token persistence

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::RngCore;

use super::{GrantHandler, RefreshTokenIssuer};
use crate::oauth::{
    AccessToken, GrantType, OAuthApp, OAuthError, RefreshToken, TokenIssuer, TokenRequest,
    TokenResponse,
};

/// Persisted state behind an opaque refresh token
#[derive(Debug, Clone)]
pub struct RefreshTokenRecord {
    pub client_id: String,
    pub subject: String,
    pub subject_ou: Option<String>,
    pub audience: Option<String>,
    pub scopes: Vec<String>,
    /// The grant that originally minted this token family
    pub granted_by: GrantType,
    pub expires_at: DateTime<Utc>,
}

/// Refresh-token table. Tokens are opaque random secrets; rotation
/// replaces the secret on every use.
pub struct RefreshTokenStore {
    records: DashMap<String, RefreshTokenRecord>,
}

impl RefreshTokenStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Persist a new record and return its opaque token.
    pub fn persist(&self, record: RefreshTokenRecord) -> String {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        let token = hex::encode(secret);

        self.records.insert(token.clone(), record);
        token
    }

    /// Redeem a token, removing it so it cannot be replayed.
    pub fn take(&self, token: &str) -> Option<RefreshTokenRecord> {
        self.records.remove(token).map(|(_, record)| record)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for RefreshTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Rotates refresh tokens and mints replacement access tokens. Also the
/// [`RefreshTokenIssuer`] used by the authorization-code grant.
pub struct RefreshGrantHandler {
    issuer: Arc<TokenIssuer>,
    store: Arc<RefreshTokenStore>,
}

impl RefreshGrantHandler {
    pub fn new(issuer: Arc<TokenIssuer>, store: Arc<RefreshTokenStore>) -> Self {
        Self { issuer, store }
    }
}

#[async_trait]
impl GrantHandler for RefreshGrantHandler {
    fn grant_type(&self) -> GrantType {
        GrantType::RefreshToken
    }

    async fn validate_grant(
        &self,
        request: &TokenRequest,
        _app: &OAuthApp,
    ) -> Result<(), OAuthError> {
        match request.refresh_token.as_deref() {
            Some(token) if !token.is_empty() => Ok(()),
            _ => Err(OAuthError::invalid_request("refresh_token is required")),
        }
    }

    async fn handle_grant(
        &self,
        request: &TokenRequest,
        app: &OAuthApp,
    ) -> Result<TokenResponse, OAuthError> {
        let presented = request
            .refresh_token
            .as_deref()
            .ok_or_else(|| OAuthError::invalid_request("refresh_token is required"))?;

        // Removing the record is the rotation point: a replayed token
        // finds nothing.
        let record = self
            .store
            .take(presented)
            .ok_or_else(|| OAuthError::invalid_grant("refresh token is unknown or rotated"))?;

        if record.client_id != app.client_id {
            return Err(OAuthError::invalid_grant(
                "refresh token was issued to a different client",
            ));
        }

        if record.expires_at <= Utc::now() {
            return Err(OAuthError::invalid_grant("refresh token has expired"));
        }

        // Narrow to the originally granted scopes, re-filtered against
        // the app's current allowed set
        let scopes: Vec<String> = if request.scope.is_empty() {
            record
                .scopes
                .iter()
                .filter(|scope| app.allowed_scopes.iter().any(|allowed| allowed == *scope))
                .cloned()
                .collect()
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
            record.audience.as_deref(),
            &scopes,
            record.subject_ou.as_deref(),
            None,
        )?;

        let mut response = TokenResponse {
            access_token: AccessToken {
                token,
                token_type: "Bearer".to_string(),
                expires_in,
                subject: record.subject.clone(),
                subject_ou: record.subject_ou.clone(),
                audience: record.audience.clone(),
                scopes: scopes.clone(),
                claims_request: request.claims_request.clone(),
                claims_locales: request.claims_locales.clone(),
            },
            refresh_token: None,
            id_token: None,
            issued_token_type: None,
        };

        // Rotate: the successor token inherits the family's origin
        self.issue_refresh_token(
            &mut response,
            app,
            &record.subject,
            record.audience.as_deref(),
            record.granted_by,
            &scopes,
            record.subject_ou.as_deref(),
        )
        .await?;

        Ok(response)
    }
}

#[async_trait]
impl RefreshTokenIssuer for RefreshGrantHandler {
    async fn issue_refresh_token(
        &self,
        response: &mut TokenResponse,
        app: &OAuthApp,
        subject: &str,
        audience: Option<&str>,
        granted_by: GrantType,
        scopes: &[String],
        ou_id: Option<&str>,
    ) -> Result<(), OAuthError> {
        let expires_in = self.issuer.refresh_ttl_secs();

        let token = self.store.persist(RefreshTokenRecord {
            client_id: app.client_id.clone(),
            subject: subject.to_string(),
            subject_ou: ou_id.map(String::from),
            audience: audience.map(String::from),
            scopes: scopes.to_vec(),
            granted_by,
            expires_at: Utc::now() + Duration::seconds(expires_in as i64),
        });

        response.refresh_token = Some(RefreshToken { token, expires_in });
        Ok(())
    }
}
