//! Access-token minting and verification

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::TokenConfig;
use crate::oauth::{ErrorCode, OAuthError};

/// Claims carried by a thunder-issued access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub sub: String,
    pub iss: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,

    /// Granted scopes, space-delimited
    #[serde(default)]
    pub scope: String,

    /// The subject's organization unit, when it belongs to one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ou: Option<String>,

    /// Acting party for exchanged tokens (RFC 8693 `act`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub act: Option<serde_json::Value>,
}

impl AccessTokenClaims {
    pub fn scopes(&self) -> Vec<String> {
        self.scope.split_whitespace().map(String::from).collect()
    }
}

/// Signs and verifies the tokens this provider issues
pub struct TokenIssuer {
    issuer: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl_secs: u64,
    refresh_ttl_secs: u64,
}

impl TokenIssuer {
    pub fn new(config: &TokenConfig) -> Self {
        Self {
            issuer: config.issuer.clone(),
            encoding_key: EncodingKey::from_secret(config.signing_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.signing_secret.as_bytes()),
            access_ttl_secs: config.access_token_ttl_secs,
            refresh_ttl_secs: config.refresh_token_ttl_secs,
        }
    }

    pub fn access_ttl_secs(&self) -> u64 {
        self.access_ttl_secs
    }

    pub fn refresh_ttl_secs(&self) -> u64 {
        self.refresh_ttl_secs
    }

    /// Mint a signed access token. Returns the compact JWT and its
    /// lifetime in seconds.
    pub fn issue_access_token(
        &self,
        subject: &str,
        audience: Option<&str>,
        scopes: &[String],
        ou_id: Option<&str>,
        actor: Option<serde_json::Value>,
    ) -> Result<(String, u64), OAuthError> {
        let now = Utc::now().timestamp();
        let claims = AccessTokenClaims {
            sub: subject.to_string(),
            iss: self.issuer.clone(),
            aud: audience.map(String::from),
            exp: now + self.access_ttl_secs as i64,
            iat: now,
            jti: uuid::Uuid::new_v4().to_string(),
            scope: scopes.join(" "),
            ou: ou_id.map(String::from),
            act: actor,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| {
                tracing::error!(error = %e, "failed to sign access token");
                OAuthError::server_error()
            })?;

        Ok((token, self.access_ttl_secs))
    }

    /// Verify a token this provider issued and return its claims.
    pub fn verify(&self, token: &str) -> Result<AccessTokenClaims, OAuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        // Audience is optional on our tokens; callers check it themselves
        validation.validate_aud = false;

        decode::<AccessTokenClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                OAuthError::new(ErrorCode::InvalidGrant, format!("token rejected: {e}"))
            })
    }
}
