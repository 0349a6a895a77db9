//! Axum server, middleware, and the token endpoint

pub mod admin;

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    extract::State,
    http::{header, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use base64::Engine;
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::authz::{AuthorizationEngine, OuInheritancePolicy, OuTreeResolver, RequestContext};
use crate::cache::CacheService;
use crate::config::{Config, StoreMode};
use crate::crypto::CredentialHasher;
use crate::events::{Event, EventLogger, EventType};
use crate::oauth::grants::{
    AuthorizationCodeGrantHandler, AuthorizationCodeStore, ClientCredentialsGrantHandler,
    GrantHandlerRegistry, RefreshGrantHandler, RefreshTokenStore, TokenExchangeGrantHandler,
};
use crate::oauth::{
    ClientAuthMethod, ClientRegistry, ErrorCode, OAuthApp, OAuthError, TokenIssuer, TokenRequest,
    TokenResponse, TokenService,
};
use crate::oidc::{JwksDocument, OidcService};
use crate::store::{CompositeStore, FileStore, MemoryStore, ResourceStore};
use crate::{Error, Result};

/// Upper bound on token-endpoint form bodies
const MAX_FORM_BYTES: usize = 64 * 1024;

/// Authorization codes are short-lived by design
const AUTHORIZATION_CODE_TTL_SECS: i64 = 600;

/// Application state shared across handlers
pub struct AppState {
    pub config: Config,
    pub clients: Arc<ClientRegistry>,
    pub hasher: Arc<CredentialHasher>,
    pub issuer: Arc<TokenIssuer>,
    pub token_service: TokenService,
    pub engine: AuthorizationEngine,
    pub ou_resolver: Arc<OuTreeResolver>,
    pub users: Arc<dyn ResourceStore>,
    pub user_schemas: Arc<dyn ResourceStore>,
    pub themes: Arc<dyn ResourceStore>,
    pub authorization_codes: Arc<AuthorizationCodeStore>,
    pub refresh_tokens: Arc<RefreshTokenStore>,
    pub token_context_cache: Arc<CacheService<RequestContext>>,
    pub oidc: Arc<OidcService>,
    pub events: Arc<EventLogger>,
}

impl AppState {
    /// Wire the full runtime from configuration.
    pub fn from_config(config: Config) -> Result<Self> {
        let events = Arc::new(EventLogger::new(&config.events)?);
        let hasher = Arc::new(CredentialHasher::new(config.crypto.password_hashing.clone()));
        let issuer = Arc::new(TokenIssuer::new(&config.token));

        let authorization_codes = Arc::new(AuthorizationCodeStore::new(AUTHORIZATION_CODE_TTL_SECS));
        let refresh_tokens = Arc::new(RefreshTokenStore::new());

        let refresh_handler = Arc::new(RefreshGrantHandler::new(
            Arc::clone(&issuer),
            Arc::clone(&refresh_tokens),
        ));

        let mut registry = GrantHandlerRegistry::new();
        registry.register(Arc::new(ClientCredentialsGrantHandler::new(Arc::clone(
            &issuer,
        ))));
        registry.register(Arc::new(AuthorizationCodeGrantHandler::new(
            Arc::clone(&issuer),
            Arc::clone(&authorization_codes),
        )));
        registry.register(
            Arc::clone(&refresh_handler) as Arc<dyn crate::oauth::grants::GrantHandler>
        );
        registry.register(Arc::new(TokenExchangeGrantHandler::new(Arc::clone(
            &issuer,
        ))));
        registry.set_refresh_issuer(refresh_handler);

        let token_service = TokenService::new(registry, Arc::clone(&events));

        let ou_resolver = Arc::new(OuTreeResolver::new());
        let engine = AuthorizationEngine::new(Some(OuInheritancePolicy::with_default_actions(
            Arc::clone(&ou_resolver) as Arc<dyn crate::authz::OuHierarchyResolver>,
        )));

        let users: Arc<dyn ResourceStore> = Arc::new(MemoryStore::new());
        let user_schemas = build_overlay_store(&config)?;
        let themes = build_overlay_store(&config)?;

        let token_context_cache: Arc<CacheService<RequestContext>> =
            Arc::new(CacheService::new("token_context", &config.cache, None));
        let jwks_cache: Arc<CacheService<JwksDocument>> =
            Arc::new(CacheService::new("jwks", &config.cache, None));

        let oidc = Arc::new(
            OidcService::new(
                config.identity_providers.clone(),
                jwks_cache,
                Arc::clone(&users),
            )
            .map_err(|e| Error::Dependency(e.to_string()))?,
        );

        Ok(Self {
            config,
            clients: Arc::new(ClientRegistry::new()),
            hasher,
            issuer,
            token_service,
            engine,
            ou_resolver,
            users,
            user_schemas,
            themes,
            authorization_codes,
            refresh_tokens,
            token_context_cache,
            oidc,
            events,
        })
    }
}

/// Build the overlay-capable store selected by `stores.mode`.
fn build_overlay_store(config: &Config) -> Result<Arc<dyn ResourceStore>> {
    let store: Arc<dyn ResourceStore> = match config.stores.mode {
        StoreMode::Mutable => Arc::new(MemoryStore::new()),
        StoreMode::Declarative => {
            let dir = config.stores.declarative_dir.as_ref().ok_or_else(|| {
                Error::Validation("declarative mode requires stores.declarative_dir".to_string())
            })?;
            Arc::new(FileStore::load(dir)?)
        }
        StoreMode::Composite => {
            let dir = config.stores.declarative_dir.as_ref().ok_or_else(|| {
                Error::Validation("composite mode requires stores.declarative_dir".to_string())
            })?;
            Arc::new(CompositeStore::new(
                Arc::new(FileStore::load(dir)?),
                Arc::new(MemoryStore::new()),
                config.stores.max_composite_records,
            ))
        }
    };
    Ok(store)
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// RFC 6749 §5.2 error body
#[derive(Serialize)]
struct OAuthErrorBody {
    error: &'static str,
    error_description: String,
}

/// Shape an OAuth error as its wire response, no-store headers included.
fn oauth_error_response(error: &OAuthError) -> Response {
    let status =
        StatusCode::from_u16(error.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = Json(OAuthErrorBody {
        error: error.code.as_str(),
        error_description: error.description.clone(),
    });

    with_no_store((status, body).into_response())
}

/// Token responses and token errors must never be cached.
fn with_no_store(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
}

fn trace_id_from<B>(request: &Request<B>) -> String {
    request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// Client-authentication middleware for the token endpoint.
///
/// Parses the form body once, authenticates the client per its configured
/// method, and places both the parsed [`TokenRequest`] and the
/// authenticated [`OAuthApp`] into request extensions.
pub async fn client_auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let trace_id = trace_id_from(&request);

    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if !content_type.starts_with("application/x-www-form-urlencoded") {
        return token_failure(
            &state,
            &trace_id,
            OAuthError::invalid_request("expected application/x-www-form-urlencoded"),
        );
    }

    let basic_credentials = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Basic "))
        .and_then(decode_basic);

    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, MAX_FORM_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return token_failure(
                &state,
                &trace_id,
                OAuthError::invalid_request("request body is unreadable or too large"),
            )
        }
    };

    let token_request = TokenRequest::from_form_pairs(url::form_urlencoded::parse(&bytes));

    let (client_id, presented_secret) = match &basic_credentials {
        Some((id, secret)) => (id.clone(), Some(secret.clone())),
        None => (
            token_request.client_id.clone(),
            (!token_request.client_secret.is_empty()).then(|| token_request.client_secret.clone()),
        ),
    };

    if client_id.is_empty() {
        return token_failure(
            &state,
            &trace_id,
            OAuthError::new(ErrorCode::InvalidClient, "client authentication required"),
        );
    }

    let app = match state.clients.get(&client_id) {
        Some(app) => app,
        None => {
            return token_failure(
                &state,
                &trace_id,
                OAuthError::new(ErrorCode::InvalidClient, "unknown client"),
            )
        }
    };

    if let Err(error) = authenticate_client(&state, &app, basic_credentials.is_some(), presented_secret) {
        return token_failure(&state, &trace_id, error);
    }

    let mut request = Request::from_parts(parts, Body::from(bytes));
    request.extensions_mut().insert(app);
    request.extensions_mut().insert(token_request);
    request.extensions_mut().insert(TraceId(trace_id));

    next.run(request).await
}

/// Per-request trace id carried through extensions
#[derive(Debug, Clone)]
pub struct TraceId(pub String);

fn decode_basic(encoded: &str) -> Option<(String, String)> {
    let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    Some((id.to_string(), secret.to_string()))
}

/// Verify the presented secret against the app's configured method.
fn authenticate_client(
    state: &AppState,
    app: &OAuthApp,
    via_basic: bool,
    presented_secret: Option<String>,
) -> std::result::Result<(), OAuthError> {
    let invalid = || OAuthError::new(ErrorCode::InvalidClient, "client authentication failed");

    match app.auth_method {
        ClientAuthMethod::None => Ok(()),
        ClientAuthMethod::ClientSecretBasic if !via_basic => Err(invalid()),
        ClientAuthMethod::ClientSecretPost if via_basic => Err(invalid()),
        _ => {
            let secret = presented_secret.ok_or_else(invalid)?;
            let reference = app.hashed_client_secret.as_ref().ok_or_else(invalid)?;

            match state.hasher.verify(&secret, reference) {
                Ok(true) => Ok(()),
                Ok(false) => Err(invalid()),
                Err(e) => {
                    tracing::error!(client_id = %app.client_id, error = %e, "stored client secret is unusable");
                    Err(OAuthError::server_error())
                }
            }
        }
    }
}

/// Emit the terminal failure event for requests rejected before the token
/// service runs.
fn token_failure(state: &AppState, trace_id: &str, error: OAuthError) -> Response {
    state.events.log(
        &Event::new(EventType::TokenIssuanceFailed)
            .with_trace_id(trace_id)
            .with_status_code(error.code.http_status())
            .with_error_type(error.code.as_str()),
    );
    oauth_error_response(&error)
}

/// Successful token response body (RFC 6749 §5.1)
#[derive(Serialize)]
struct TokenResponseBody {
    access_token: String,
    token_type: String,
    expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    id_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    issued_token_type: Option<String>,
}

impl From<TokenResponse> for TokenResponseBody {
    fn from(response: TokenResponse) -> Self {
        Self {
            access_token: response.access_token.token,
            token_type: response.access_token.token_type,
            expires_in: response.access_token.expires_in,
            refresh_token: response.refresh_token.map(|refresh| refresh.token),
            scope: response.access_token.scopes.join(" "),
            id_token: response.id_token,
            issued_token_type: response.issued_token_type,
        }
    }
}

/// `POST /oauth2/token`
async fn token_endpoint(
    State(state): State<Arc<AppState>>,
    app: Option<Extension<OAuthApp>>,
    token_request: Option<Extension<TokenRequest>>,
    trace_id: Option<Extension<TraceId>>,
) -> Response {
    // Middleware misconfiguration, never the client's fault
    let (Some(Extension(app)), Some(Extension(token_request)), Some(Extension(TraceId(trace_id)))) =
        (app, token_request, trace_id)
    else {
        tracing::error!("token endpoint reached without client authentication state");
        return oauth_error_response(&OAuthError::server_error());
    };

    match state
        .token_service
        .process_token_request(&trace_id, token_request, &app)
        .await
    {
        Ok(response) => with_no_store(
            (StatusCode::OK, Json(TokenResponseBody::from(response))).into_response(),
        ),
        Err(error) => oauth_error_response(&error),
    }
}

/// Bearer-token middleware for the admin surface.
///
/// Verifies the token, builds the read-only [`RequestContext`], and caches
/// it by `jti` so repeated calls skip claim assembly.
pub async fn bearer_auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> std::result::Result<Response, AppError> {
    let trace_id = trace_id_from(&request);

    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| AppError(Error::Unauthenticated("missing bearer token".to_string())))?;

    let claims = state
        .issuer
        .verify(token)
        .map_err(|e| AppError(Error::Unauthenticated(e.description)))?;

    let context = match state.token_context_cache.get(&claims.jti).await {
        Some(mut cached) => {
            cached.trace_id = trace_id;
            cached
        }
        None => {
            let context = RequestContext {
                trace_id,
                subject: claims.sub.clone(),
                scopes: claims.scopes(),
                ou_id: claims.ou.clone(),
            };
            state
                .token_context_cache
                .set(&claims.jti, context.clone())
                .await;
            context
        }
    };

    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

/// Admin error body
#[derive(Serialize)]
struct AdminErrorBody {
    code: &'static str,
    message: &'static str,
    description: String,
}

/// Admin-surface error wrapper mapping error kinds to status codes
#[derive(Debug)]
pub struct AppError(pub Error);

impl From<Error> for AppError {
    fn from(error: Error) -> Self {
        AppError(error)
    }
}

impl From<crate::store::StoreError> for AppError {
    fn from(error: crate::store::StoreError) -> Self {
        AppError(Error::Store(error))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        use crate::store::StoreError;

        let (status, code, message) = match &self.0 {
            Error::Validation(_) => (StatusCode::BAD_REQUEST, "invalid_request", "Invalid request"),
            Error::Unsupported(_) => (StatusCode::BAD_REQUEST, "unsupported", "Unsupported operation"),
            Error::Unauthenticated(_) => (
                StatusCode::UNAUTHORIZED,
                "unauthenticated",
                "Authentication required",
            ),
            Error::AccessDenied(_) => (StatusCode::FORBIDDEN, "access_denied", "Access denied"),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", "Resource not found"),
            Error::Conflict(_) => (StatusCode::CONFLICT, "conflict", "Resource already exists"),
            Error::Store(StoreError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, "not_found", "Resource not found")
            }
            Error::Store(StoreError::Conflict(_)) => {
                (StatusCode::CONFLICT, "conflict", "Resource already exists")
            }
            Error::Store(StoreError::Immutable(_)) => (
                StatusCode::BAD_REQUEST,
                "cannot_mutate_declarative",
                "Declarative resources cannot be mutated",
            ),
            Error::Store(StoreError::LimitExceeded { .. }) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "Something went wrong",
            ),
            Error::Config(_)
            | Error::Store(StoreError::Backend(_))
            | Error::Dependency(_)
            | Error::Internal(_)
            | Error::Io(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "Something went wrong",
            ),
        };

        // Internal detail stays in the logs, not in the response body
        let description = match status {
            StatusCode::INTERNAL_SERVER_ERROR => {
                tracing::error!(error = %self.0, "admin request failed");
                String::new()
            }
            _ => self.0.to_string(),
        };

        (
            status,
            Json(AdminErrorBody {
                code,
                message,
                description,
            }),
        )
            .into_response()
    }
}

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    let token_routes = Router::new()
        .route("/oauth2/token", post(token_endpoint))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            client_auth_middleware,
        ));

    let admin_routes = admin::router().layer(middleware::from_fn_with_state(
        Arc::clone(&state),
        bearer_auth_middleware,
    ));

    Router::new()
        .route("/health", get(health))
        .merge(token_routes)
        .merge(admin_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the server until ctrl-c, then shut the caches down.
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("thunder listening on {}", addr);

    let app = build_router(Arc::clone(&state));
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .map_err(|e| Error::Internal(format!("server error: {e}")))?;

    state.token_context_cache.shutdown().await;
    Ok(())
}
