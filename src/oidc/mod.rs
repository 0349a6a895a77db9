//! Federation against external OIDC identity providers
//!
//! Thunder can hand users off to upstream IdPs: build the authorize URL,
//! exchange the returned code at the IdP's token endpoint, verify the ID
//! token against the IdP's JWKS, and map the federated subject to an
//! internal user. IdPs without a JWKS endpoint are trusted as configured.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::cache::CacheService;
use crate::config::IdpConfig;
use crate::store::ResourceStore;

/// OIDC federation error type
#[derive(Debug, thiserror::Error)]
pub enum OidcError {
    /// Sentinel for missing or undecodable ID tokens
    #[error("invalid id token")]
    InvalidIdToken,

    #[error("identity provider '{0}' is not configured")]
    UnknownIdp(String),

    #[error("token response is invalid: {0}")]
    InvalidTokenResponse(String),

    #[error("upstream request failed: {0}")]
    Upstream(String),

    #[error("id token verification failed: {0}")]
    Verification(String),

    #[error("no internal user for subject '{0}'")]
    UserNotFound(String),
}

/// Token response from an upstream IdP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamTokenResponse {
    #[serde(default)]
    pub access_token: String,

    #[serde(default)]
    pub token_type: String,

    #[serde(default)]
    pub expires_in: Option<u64>,

    #[serde(default)]
    pub refresh_token: Option<String>,

    #[serde(default)]
    pub id_token: String,

    #[serde(default)]
    pub scope: Option<String>,
}

/// JWKS document as served by the IdP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwksDocument {
    #[serde(default)]
    pub keys: Vec<JwksKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwksKey {
    #[serde(default)]
    pub kty: String,
    #[serde(default)]
    pub kid: Option<String>,
    #[serde(default)]
    pub alg: Option<String>,
    #[serde(default)]
    pub n: Option<String>,
    #[serde(default)]
    pub e: Option<String>,
}

/// Federation service over the configured IdP records
pub struct OidcService {
    idps: HashMap<String, IdpConfig>,
    http: reqwest::Client,
    jwks_cache: Arc<CacheService<JwksDocument>>,
    users: Arc<dyn ResourceStore>,
}

impl OidcService {
    pub fn new(
        idps: Vec<IdpConfig>,
        jwks_cache: Arc<CacheService<JwksDocument>>,
        users: Arc<dyn ResourceStore>,
    ) -> Result<Self, OidcError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| OidcError::Upstream(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            idps: idps.into_iter().map(|idp| (idp.id.clone(), idp)).collect(),
            http,
            jwks_cache,
            users,
        })
    }

    fn idp(&self, idp_id: &str) -> Result<&IdpConfig, OidcError> {
        self.idps
            .get(idp_id)
            .ok_or_else(|| OidcError::UnknownIdp(idp_id.to_string()))
    }

    /// The IdP's OAuth client configuration. The returned scope list
    /// always contains `openid`.
    pub fn get_oauth_client_config(&self, idp_id: &str) -> Result<IdpConfig, OidcError> {
        let mut config = self.idp(idp_id)?.clone();
        if !config.scopes.iter().any(|scope| scope == "openid") {
            config.scopes.push("openid".to_string());
        }
        Ok(config)
    }

    /// Authorization URL for redirecting the user to the upstream IdP.
    pub fn build_authorize_url(&self, idp_id: &str, state: &str) -> Result<String, OidcError> {
        let config = self.get_oauth_client_config(idp_id)?;
        let endpoint = config.authorization_endpoint.as_deref().ok_or_else(|| {
            OidcError::Upstream(format!("identity provider '{idp_id}' has no authorization endpoint"))
        })?;

        let mut url = url::Url::parse(endpoint)
            .map_err(|e| OidcError::Upstream(format!("bad authorization endpoint: {e}")))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &config.client_id)
            .append_pair("redirect_uri", &config.redirect_uri)
            .append_pair("scope", &config.scopes.join(" "))
            .append_pair("state", state);

        Ok(url.into())
    }

    /// Exchange an authorization code at the upstream token endpoint,
    /// then validate the response.
    pub async fn exchange_code_for_token(
        &self,
        idp_id: &str,
        code: &str,
        validate_id_token: bool,
    ) -> Result<UpstreamTokenResponse, OidcError> {
        let config = self.idp(idp_id)?;

        let mut form = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", code.to_string()),
            ("redirect_uri", config.redirect_uri.clone()),
            ("client_id", config.client_id.clone()),
        ];
        if let Some(secret) = &config.client_secret {
            form.push(("client_secret", secret.clone()));
        }

        let response = self
            .http
            .post(&config.token_endpoint)
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .form(&form)
            .send()
            .await
            .map_err(|e| OidcError::Upstream(format!("token endpoint: {e}")))?;

        if !response.status().is_success() {
            return Err(OidcError::Upstream(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let token_response: UpstreamTokenResponse = response
            .json()
            .await
            .map_err(|e| OidcError::Upstream(format!("token endpoint body: {e}")))?;

        self.validate_token_response(idp_id, &token_response, validate_id_token)
            .await?;

        Ok(token_response)
    }

    /// Validate an upstream token response; optionally verify the ID
    /// token signature.
    pub async fn validate_token_response(
        &self,
        idp_id: &str,
        token_response: &UpstreamTokenResponse,
        validate_id_token: bool,
    ) -> Result<(), OidcError> {
        if token_response.access_token.is_empty() {
            return Err(OidcError::InvalidTokenResponse(
                "access_token is empty".to_string(),
            ));
        }

        if token_response.id_token.is_empty() {
            return Err(OidcError::InvalidTokenResponse(
                "id_token is empty".to_string(),
            ));
        }

        if validate_id_token {
            self.validate_id_token(idp_id, &token_response.id_token)
                .await?;
        }

        Ok(())
    }

    /// Verify an ID token against the IdP's JWKS. IdPs without a JWKS
    /// endpoint are trusted and the check passes.
    pub async fn validate_id_token(&self, idp_id: &str, id_token: &str) -> Result<(), OidcError> {
        if id_token.is_empty() {
            return Err(OidcError::InvalidIdToken);
        }

        let config = self.idp(idp_id)?;
        let Some(jwks_endpoint) = config.jwks_endpoint.as_deref() else {
            tracing::debug!(idp = %idp_id, "no JWKS endpoint configured, trusting id token");
            return Ok(());
        };

        let jwks = self.fetch_jwks(idp_id, jwks_endpoint, config.http_timeout_secs).await?;

        let header = decode_header(id_token).map_err(|_| OidcError::InvalidIdToken)?;
        let key = jwks
            .keys
            .iter()
            .find(|key| match (&header.kid, &key.kid) {
                (Some(want), Some(have)) => want == have,
                // A JWKS with a single key may omit kid
                _ => jwks.keys.len() == 1,
            })
            .ok_or_else(|| {
                OidcError::Verification("no JWKS key matches the token's kid".to_string())
            })?;

        if key.kty != "RSA" {
            return Err(OidcError::Verification(format!(
                "unsupported JWKS key type '{}'",
                key.kty
            )));
        }

        let (n, e) = match (&key.n, &key.e) {
            (Some(n), Some(e)) => (n, e),
            _ => {
                return Err(OidcError::Verification(
                    "JWKS RSA key is missing modulus or exponent".to_string(),
                ))
            }
        };

        let decoding_key = DecodingKey::from_rsa_components(n, e)
            .map_err(|e| OidcError::Verification(format!("bad JWKS key material: {e}")))?;

        let mut validation = Validation::new(header.alg);
        // Audience and issuer checks belong to the caller's policy; the
        // signature and expiry are verified here
        validation.validate_aud = false;

        decode::<serde_json::Value>(id_token, &decoding_key, &validation)
            .map(|_| ())
            .map_err(|e| OidcError::Verification(e.to_string()))
    }

    /// Decode the claims segment of an ID token without verifying it.
    pub fn get_id_token_claims(&self, id_token: &str) -> Result<serde_json::Value, OidcError> {
        if id_token.is_empty() {
            return Err(OidcError::InvalidIdToken);
        }

        let mut segments = id_token.split('.');
        let claims_segment = match (segments.next(), segments.next()) {
            (Some(_), Some(claims)) => claims,
            _ => return Err(OidcError::InvalidIdToken),
        };

        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(claims_segment)
            .map_err(|_| OidcError::InvalidIdToken)?;

        serde_json::from_slice(&decoded).map_err(|_| OidcError::InvalidIdToken)
    }

    /// Fetch the subject's profile from the IdP's userinfo endpoint.
    pub async fn fetch_user_info(
        &self,
        idp_id: &str,
        access_token: &str,
    ) -> Result<serde_json::Value, OidcError> {
        let config = self.idp(idp_id)?;
        let endpoint = config.userinfo_endpoint.as_deref().ok_or_else(|| {
            OidcError::Upstream(format!("identity provider '{idp_id}' has no userinfo endpoint"))
        })?;

        let response = self
            .http
            .get(endpoint)
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .bearer_auth(access_token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| OidcError::Upstream(format!("userinfo endpoint: {e}")))?;

        if !response.status().is_success() {
            return Err(OidcError::Upstream(format!(
                "userinfo endpoint returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| OidcError::Upstream(format!("userinfo body: {e}")))
    }

    /// Map a federated subject to an internal user record.
    pub async fn get_internal_user(
        &self,
        sub: &str,
    ) -> Result<crate::store::Resource, OidcError> {
        if let Ok(user) = self.users.get(sub).await {
            return Ok(user);
        }

        let users = self
            .users
            .list_all()
            .await
            .map_err(|e| OidcError::Upstream(format!("user store: {e}")))?;

        users
            .into_iter()
            .find(|user| user.body.get("sub").and_then(|v| v.as_str()) == Some(sub))
            .ok_or_else(|| OidcError::UserNotFound(sub.to_string()))
    }

    /// JWKS documents are served out of the multi-level cache; a miss
    /// fetches from the IdP and populates it.
    async fn fetch_jwks(
        &self,
        idp_id: &str,
        endpoint: &str,
        timeout_secs: u64,
    ) -> Result<JwksDocument, OidcError> {
        if let Some(cached) = self.jwks_cache.get(idp_id).await {
            return Ok(cached);
        }

        let response = self
            .http
            .get(endpoint)
            .timeout(Duration::from_secs(timeout_secs))
            .send()
            .await
            .map_err(|e| OidcError::Upstream(format!("JWKS endpoint: {e}")))?;

        if !response.status().is_success() {
            return Err(OidcError::Upstream(format!(
                "JWKS endpoint returned {}",
                response.status()
            )));
        }

        let jwks: JwksDocument = response
            .json()
            .await
            .map_err(|e| OidcError::Upstream(format!("JWKS body: {e}")))?;

        self.jwks_cache.set(idp_id, jwks.clone()).await;
        Ok(jwks)
    }
}
