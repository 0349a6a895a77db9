//! OAuth 2.0 core types: apps, grants, requests, responses, and the
//! RFC 6749 error vocabulary

pub mod grants;
pub mod issuer;
pub mod token_service;

pub use issuer::TokenIssuer;
pub use token_service::TokenService;

use std::collections::HashSet;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::crypto::Credential;

/// RFC 8693 token type identifier for access tokens
pub const TOKEN_TYPE_ACCESS: &str = "urn:ietf:params:oauth:token-type:access_token";

/// RFC 8693 token type identifier for JWTs
pub const TOKEN_TYPE_JWT: &str = "urn:ietf:params:oauth:token-type:jwt";

/// Supported grant types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    ClientCredentials,
    AuthorizationCode,
    RefreshToken,
    TokenExchange,
}

impl GrantType {
    /// Parse the `grant_type` form value
    pub fn from_param(value: &str) -> Option<Self> {
        match value {
            "client_credentials" => Some(GrantType::ClientCredentials),
            "authorization_code" => Some(GrantType::AuthorizationCode),
            "refresh_token" => Some(GrantType::RefreshToken),
            "urn:ietf:params:oauth:grant-type:token-exchange" => Some(GrantType::TokenExchange),
            _ => None,
        }
    }

    pub fn as_param(&self) -> &'static str {
        match self {
            GrantType::ClientCredentials => "client_credentials",
            GrantType::AuthorizationCode => "authorization_code",
            GrantType::RefreshToken => "refresh_token",
            GrantType::TokenExchange => "urn:ietf:params:oauth:grant-type:token-exchange",
        }
    }
}

/// Client authentication methods at the token endpoint (RFC 6749 §2.3)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
    #[default]
    ClientSecretBasic,
    ClientSecretPost,
    None,
}

/// An OAuth client application record, owned by its parent application
#[derive(Debug, Clone)]
pub struct OAuthApp {
    pub app_id: String,
    pub client_id: String,

    /// Hashed secret; absent for public clients
    pub hashed_client_secret: Option<Credential>,

    /// Ordered redirect URIs; must be non-empty for the code grant
    pub redirect_uris: Vec<String>,

    pub grant_types: HashSet<GrantType>,

    /// Scopes this client may be granted
    pub allowed_scopes: Vec<String>,

    pub auth_method: ClientAuthMethod,

    /// OU the application belongs to, when OU-scoped
    pub ou_id: Option<String>,
}

impl OAuthApp {
    pub fn allows_grant(&self, grant_type: GrantType) -> bool {
        self.grant_types.contains(&grant_type)
    }

    /// Intersect a space-delimited scope request with the allowed set,
    /// preserving request order. An empty intersection is a valid result.
    pub fn filter_scopes(&self, requested: &str) -> Vec<String> {
        requested
            .split_whitespace()
            .filter(|scope| self.allowed_scopes.iter().any(|allowed| allowed.as_str() == *scope))
            .map(String::from)
            .collect()
    }
}

/// In-memory client registry keyed by `client_id`
pub struct ClientRegistry {
    apps: DashMap<String, OAuthApp>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            apps: DashMap::new(),
        }
    }

    pub fn register(&self, app: OAuthApp) {
        self.apps.insert(app.client_id.clone(), app);
    }

    pub fn get(&self, client_id: &str) -> Option<OAuthApp> {
        self.apps.get(client_id).map(|app| app.value().clone())
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Fingerprint of an inbound `/token` call, constructed once per request.
/// Only `scope` changes after construction, when the filtered value
/// replaces the requested one.
#[derive(Debug, Clone, Default)]
pub struct TokenRequest {
    pub grant_type: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: String,

    // Credential fields
    pub username: Option<String>,
    pub password: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub refresh_token: Option<String>,
    pub code_verifier: Option<String>,

    // Token-exchange fields (RFC 8693)
    pub subject_token: Option<String>,
    pub subject_token_type: Option<String>,
    pub actor_token: Option<String>,
    pub actor_token_type: Option<String>,
    pub requested_token_type: Option<String>,
    pub resource: Option<String>,
    pub audience: Option<String>,

    // OIDC claims negotiation
    pub claims_request: Option<String>,
    pub claims_locales: Option<String>,
}

impl TokenRequest {
    /// Build a request from decoded form pairs.
    pub fn from_form_pairs<'a>(pairs: impl Iterator<Item = (std::borrow::Cow<'a, str>, std::borrow::Cow<'a, str>)>) -> Self {
        let mut request = TokenRequest::default();
        for (key, value) in pairs {
            let value = value.into_owned();
            match key.as_ref() {
                "grant_type" => request.grant_type = value,
                "client_id" => request.client_id = value,
                "client_secret" => request.client_secret = value,
                "scope" => request.scope = value,
                "username" => request.username = Some(value),
                "password" => request.password = Some(value),
                "code" => request.code = Some(value),
                "redirect_uri" => request.redirect_uri = Some(value),
                "refresh_token" => request.refresh_token = Some(value),
                "code_verifier" => request.code_verifier = Some(value),
                "subject_token" => request.subject_token = Some(value),
                "subject_token_type" => request.subject_token_type = Some(value),
                "actor_token" => request.actor_token = Some(value),
                "actor_token_type" => request.actor_token_type = Some(value),
                "requested_token_type" => request.requested_token_type = Some(value),
                "resource" => request.resource = Some(value),
                "audience" => request.audience = Some(value),
                "claims" => request.claims_request = Some(value),
                "claims_locales" => request.claims_locales = Some(value),
                _ => {}
            }
        }
        request
    }
}

/// Minted access token and its metadata
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub subject: String,
    /// OU of the subject; carried so downstream minting (refresh
    /// issuance) stays OU-correct. Never serialized to the wire.
    pub subject_ou: Option<String>,
    pub audience: Option<String>,
    pub scopes: Vec<String>,
    pub claims_request: Option<String>,
    pub claims_locales: Option<String>,
}

/// Minted refresh token
#[derive(Debug, Clone)]
pub struct RefreshToken {
    pub token: String,
    pub expires_in: u64,
}

/// Result of a successful grant; the wire DTO is derived from this
#[derive(Debug, Clone)]
pub struct TokenResponse {
    pub access_token: AccessToken,
    pub refresh_token: Option<RefreshToken>,
    pub id_token: Option<String>,
    pub issued_token_type: Option<String>,
}

/// RFC 6749 §5.2 error codes, plus `server_error`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidRequest,
    InvalidClient,
    InvalidGrant,
    UnauthorizedClient,
    UnsupportedGrantType,
    InvalidScope,
    ServerError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidRequest => "invalid_request",
            ErrorCode::InvalidClient => "invalid_client",
            ErrorCode::InvalidGrant => "invalid_grant",
            ErrorCode::UnauthorizedClient => "unauthorized_client",
            ErrorCode::UnsupportedGrantType => "unsupported_grant_type",
            ErrorCode::InvalidScope => "invalid_scope",
            ErrorCode::ServerError => "server_error",
        }
    }

    /// Status mapping: server errors are 500, client-auth failures 401,
    /// everything else 400.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::ServerError => 500,
            ErrorCode::InvalidClient | ErrorCode::UnauthorizedClient => 401,
            _ => 400,
        }
    }
}

/// An OAuth-shaped failure, ready for the RFC 6749 error body
#[derive(Debug, Clone, thiserror::Error)]
#[error("{}: {description}", .code.as_str())]
pub struct OAuthError {
    pub code: ErrorCode,
    pub description: String,
}

impl OAuthError {
    pub fn new(code: ErrorCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }

    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, description)
    }

    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidGrant, description)
    }

    /// Server errors never leak the underlying cause to the client.
    pub fn server_error() -> Self {
        Self::new(ErrorCode::ServerError, "Something went wrong")
    }
}
