//! End-to-end token-request pipeline
//!
//! Parse and client authentication happen upstream; this service owns
//! everything from grant validation to the finished response. Every
//! request emits a started event and exactly one terminal event.

use std::sync::Arc;
use std::time::Instant;

use crate::events::{Event, EventLogger, EventType};
use crate::oauth::grants::{GrantHandlerRegistry, RegistryError};
use crate::oauth::{
    ErrorCode, GrantType, OAuthApp, OAuthError, TokenRequest, TokenResponse, TOKEN_TYPE_ACCESS,
};

/// Orchestrates grant validation, scope filtering, handler dispatch, and
/// refresh-token minting.
pub struct TokenService {
    registry: GrantHandlerRegistry,
    events: Arc<EventLogger>,
}

impl TokenService {
    pub fn new(registry: GrantHandlerRegistry, events: Arc<EventLogger>) -> Self {
        Self { registry, events }
    }

    /// Process a parsed, client-authenticated token request.
    pub async fn process_token_request(
        &self,
        trace_id: &str,
        mut request: TokenRequest,
        app: &OAuthApp,
    ) -> Result<TokenResponse, OAuthError> {
        let started = Instant::now();

        self.events.log(
            &Event::new(EventType::TokenIssuanceStarted)
                .with_trace_id(trace_id)
                .with_client_id(&app.client_id)
                .with_grant_type(&request.grant_type),
        );

        if request.grant_type.is_empty() {
            return Err(self.fail(
                trace_id,
                app,
                &request,
                started,
                OAuthError::invalid_request("grant_type is required"),
            ));
        }

        let grant_type = match GrantType::from_param(&request.grant_type) {
            Some(grant_type) => grant_type,
            None => {
                return Err(self.fail(
                    trace_id,
                    app,
                    &request,
                    started,
                    OAuthError::new(
                        ErrorCode::UnsupportedGrantType,
                        format!("grant type '{}' is not supported", request.grant_type),
                    ),
                ))
            }
        };

        let handler = match self.registry.handler_for(&request.grant_type) {
            Ok(handler) => handler,
            Err(RegistryError::Unsupported(value)) => {
                return Err(self.fail(
                    trace_id,
                    app,
                    &request,
                    started,
                    OAuthError::new(
                        ErrorCode::UnsupportedGrantType,
                        format!("grant type '{value}' is not supported"),
                    ),
                ))
            }
            Err(RegistryError::Internal(cause)) => {
                tracing::error!(error = %cause, "grant registry failure");
                return Err(self.fail(trace_id, app, &request, started, OAuthError::server_error()));
            }
        };

        if !app.allows_grant(grant_type) {
            return Err(self.fail(
                trace_id,
                app,
                &request,
                started,
                OAuthError::new(
                    ErrorCode::UnauthorizedClient,
                    format!(
                        "client is not authorized for the '{}' grant",
                        request.grant_type
                    ),
                ),
            ));
        }

        if let Err(e) = handler.validate_grant(&request, app).await {
            return Err(self.fail(trace_id, app, &request, started, e));
        }

        // Scope filtering: the request carries only the intersection from
        // here on. An empty intersection is a valid outcome.
        let granted = app.filter_scopes(&request.scope);
        request.scope = granted.join(" ");

        let mut response = match handler.handle_grant(&request, app).await {
            Ok(response) => response,
            Err(e) => return Err(self.fail(trace_id, app, &request, started, e)),
        };

        if grant_type == GrantType::AuthorizationCode && app.allows_grant(GrantType::RefreshToken) {
            let issuer = match self.registry.refresh_issuer() {
                Some(issuer) => issuer,
                None => {
                    tracing::error!(
                        "refresh_token allowed but no refresh issuer is wired into the registry"
                    );
                    return Err(self.fail(
                        trace_id,
                        app,
                        &request,
                        started,
                        OAuthError::server_error(),
                    ));
                }
            };

            let subject = response.access_token.subject.clone();
            let audience = response.access_token.audience.clone();
            let scopes = response.access_token.scopes.clone();
            let subject_ou = response.access_token.subject_ou.clone();

            if let Err(e) = issuer
                .issue_refresh_token(
                    &mut response,
                    app,
                    &subject,
                    audience.as_deref(),
                    grant_type,
                    &scopes,
                    subject_ou.as_deref(),
                )
                .await
            {
                // A response without a persisted refresh token must not
                // leave the building with an access token either
                tracing::error!(error = %e, "refresh token persistence failed");
                return Err(self.fail(trace_id, app, &request, started, OAuthError::server_error()));
            }
        }

        if grant_type == GrantType::TokenExchange && response.issued_token_type.is_none() {
            response.issued_token_type = Some(
                request
                    .requested_token_type
                    .clone()
                    .unwrap_or_else(|| TOKEN_TYPE_ACCESS.to_string()),
            );
        }

        self.events.log(
            &Event::new(EventType::TokenIssued)
                .with_trace_id(trace_id)
                .with_client_id(&app.client_id)
                .with_grant_type(&request.grant_type)
                .with_scope(response.access_token.scopes.join(" "))
                .with_subject(&response.access_token.subject)
                .with_status_code(200)
                .with_duration(started.elapsed().as_millis() as u64),
        );

        Ok(response)
    }

    /// Emit the single terminal failure event and sanitize server errors.
    fn fail(
        &self,
        trace_id: &str,
        app: &OAuthApp,
        request: &TokenRequest,
        started: Instant,
        error: OAuthError,
    ) -> OAuthError {
        self.events.log(
            &Event::new(EventType::TokenIssuanceFailed)
                .with_trace_id(trace_id)
                .with_client_id(&app.client_id)
                .with_grant_type(&request.grant_type)
                .with_scope(&request.scope)
                .with_status_code(error.code.http_status())
                .with_duration(started.elapsed().as_millis() as u64)
                .with_error_type(error.code.as_str()),
        );

        if error.code == ErrorCode::ServerError {
            OAuthError::server_error()
        } else {
            error
        }
    }
}
