#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;

use thunder::authz::OrganizationUnit;
use thunder::config::{
    CacheConfig, Config, CryptoConfig, EventsConfig, HashAlgorithmKind, ServerConfig, StoresConfig,
    TokenConfig,
};
use thunder::oauth::{ClientAuthMethod, GrantType, OAuthApp};
use thunder::server::{build_router, AppState};

/// Baseline configuration for tests: quiet events, sha256 hashing so the
/// suite stays fast, no background cleanup.
pub fn test_config() -> Config {
    let mut crypto = CryptoConfig::default();
    crypto.password_hashing.algorithm = HashAlgorithmKind::Sha256;

    Config {
        server: ServerConfig::default(),
        token: TokenConfig {
            issuer: "thunder-test".to_string(),
            signing_secret: "0123456789abcdef0123456789abcdef".to_string(),
            access_token_ttl_secs: 3600,
            refresh_token_ttl_secs: 86400,
        },
        cache: CacheConfig {
            cleanup_interval_secs: -1,
            ..CacheConfig::default()
        },
        crypto,
        stores: StoresConfig::default(),
        identity_providers: vec![],
        events: EventsConfig {
            enabled: false,
            stdout: false,
            file: None,
        },
    }
}

pub fn test_state() -> Arc<AppState> {
    Arc::new(AppState::from_config(test_config()).expect("test state"))
}

/// Bind the router on an ephemeral port and serve it in the background.
pub async fn spawn_server(state: Arc<AppState>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().unwrap();

    let router = build_router(state);
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    format!("http://{}", addr)
}

/// Register an OAuth app whose plaintext secret is `secret`.
pub fn register_app(
    state: &AppState,
    client_id: &str,
    secret: Option<&str>,
    auth_method: ClientAuthMethod,
    grants: &[GrantType],
    scopes: &[&str],
) {
    let hashed = secret.map(|secret| state.hasher.generate(secret).expect("hash secret"));

    state.clients.register(OAuthApp {
        app_id: format!("app-{client_id}"),
        client_id: client_id.to_string(),
        hashed_client_secret: hashed,
        redirect_uris: vec!["https://app/cb".to_string()],
        grant_types: grants.iter().copied().collect::<HashSet<_>>(),
        allowed_scopes: scopes.iter().map(|s| s.to_string()).collect(),
        auth_method,
        ou_id: None,
    });
}

/// Seed the ou1 → ou12 chain plus a sibling ou2.
pub fn seed_ou_tree(state: &AppState) {
    for (id, parent) in [("ou1", None), ("ou12", Some("ou1")), ("ou2", None)] {
        state.ou_resolver.insert(OrganizationUnit {
            id: id.to_string(),
            handle: id.to_string(),
            name: id.to_uppercase(),
            parent_id: parent.map(String::from),
        });
    }
}

/// Mint a bearer token for an admin caller.
pub fn mint_token(state: &AppState, subject: &str, scopes: &[&str], ou: Option<&str>) -> String {
    let scopes: Vec<String> = scopes.iter().map(|s| s.to_string()).collect();
    state
        .issuer
        .issue_access_token(subject, None, &scopes, ou, None)
        .expect("mint token")
        .0
}
