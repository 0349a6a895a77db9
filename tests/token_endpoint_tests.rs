//! End-to-end token endpoint tests against an in-process server

use chrono::Utc;
use serde_json::Value;
use thunder::oauth::grants::AuthorizationCodeRecord;
use thunder::oauth::{ClientAuthMethod, GrantType};

mod common;

use common::{register_app, spawn_server, test_state};

fn code_record(client_id: &str) -> AuthorizationCodeRecord {
    AuthorizationCodeRecord {
        client_id: client_id.to_string(),
        redirect_uri: "https://app/cb".to_string(),
        subject: "user-7".to_string(),
        subject_ou: Some("ou1".to_string()),
        scopes: vec!["system:user".to_string()],
        code_challenge: None,
        code_challenge_method: None,
        expires_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_client_credentials_happy_path() {
    let state = test_state();
    register_app(
        &state,
        "clientA",
        Some("s3cret"),
        ClientAuthMethod::ClientSecretPost,
        &[GrantType::ClientCredentials],
        &["system:user:view"],
    );
    let base = spawn_server(state).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/oauth2/token"))
        .form(&[
            ("grant_type", "client_credentials"),
            ("client_id", "clientA"),
            ("client_secret", "s3cret"),
            ("scope", "system:user:view openid"),
        ])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("cache-control").unwrap(),
        "no-store"
    );
    assert_eq!(response.headers().get("pragma").unwrap(), "no-cache");

    let body: Value = response.json().await.unwrap();
    // openid is not in the allowed set and gets filtered out
    assert_eq!(body["scope"], "system:user:view");
    assert_eq!(body["token_type"], "Bearer");
    assert!(!body["access_token"].as_str().unwrap().is_empty());
    assert!(body.get("refresh_token").is_none());
}

#[tokio::test]
async fn test_authorization_code_with_refresh() {
    let state = test_state();
    register_app(
        &state,
        "clientB",
        Some("s3cret"),
        ClientAuthMethod::ClientSecretBasic,
        &[GrantType::AuthorizationCode, GrantType::RefreshToken],
        &["system:user"],
    );
    state.authorization_codes.issue("C1", code_record("clientB"));
    let base = spawn_server(state).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/oauth2/token"))
        .basic_auth("clientB", Some("s3cret"))
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", "C1"),
            ("redirect_uri", "https://app/cb"),
        ])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert!(!body["access_token"].as_str().unwrap().is_empty());
    assert!(!body["refresh_token"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_refresh_token_rotation_over_http() {
    let state = test_state();
    register_app(
        &state,
        "clientB",
        Some("s3cret"),
        ClientAuthMethod::ClientSecretBasic,
        &[GrantType::AuthorizationCode, GrantType::RefreshToken],
        &["system:user"],
    );
    state.authorization_codes.issue("C1", code_record("clientB"));
    let base = spawn_server(state).await;
    let client = reqwest::Client::new();

    let body: Value = client
        .post(format!("{base}/oauth2/token"))
        .basic_auth("clientB", Some("s3cret"))
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", "C1"),
            ("redirect_uri", "https://app/cb"),
        ])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let refresh_token = body["refresh_token"].as_str().unwrap().to_string();

    // Redeem the refresh token
    let response = client
        .post(format!("{base}/oauth2/token"))
        .basic_auth("clientB", Some("s3cret"))
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", &refresh_token),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let rotated: Value = response.json().await.unwrap();
    assert_ne!(rotated["refresh_token"].as_str().unwrap(), refresh_token);

    // The old token is rotated out
    let replay = client
        .post(format!("{base}/oauth2/token"))
        .basic_auth("clientB", Some("s3cret"))
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", &refresh_token),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(replay.status(), 400);
    let error: Value = replay.json().await.unwrap();
    assert_eq!(error["error"], "invalid_grant");
}

#[tokio::test]
async fn test_unsupported_grant_type() {
    let state = test_state();
    register_app(
        &state,
        "clientC",
        Some("s3cret"),
        ClientAuthMethod::ClientSecretPost,
        &[GrantType::AuthorizationCode],
        &[],
    );
    let base = spawn_server(state).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/oauth2/token"))
        .form(&[
            ("grant_type", "password"),
            ("client_id", "clientC"),
            ("client_secret", "s3cret"),
            ("username", "u"),
            ("password", "p"),
        ])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "unsupported_grant_type");
}

#[tokio::test]
async fn test_supported_but_disallowed_grant_is_unauthorized_client() {
    let state = test_state();
    register_app(
        &state,
        "clientC",
        Some("s3cret"),
        ClientAuthMethod::ClientSecretPost,
        &[GrantType::AuthorizationCode],
        &[],
    );
    let base = spawn_server(state).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/oauth2/token"))
        .form(&[
            ("grant_type", "client_credentials"),
            ("client_id", "clientC"),
            ("client_secret", "s3cret"),
        ])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "unauthorized_client");
}

#[tokio::test]
async fn test_wrong_secret_is_invalid_client() {
    let state = test_state();
    register_app(
        &state,
        "clientA",
        Some("s3cret"),
        ClientAuthMethod::ClientSecretPost,
        &[GrantType::ClientCredentials],
        &[],
    );
    let base = spawn_server(state).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/oauth2/token"))
        .form(&[
            ("grant_type", "client_credentials"),
            ("client_id", "clientA"),
            ("client_secret", "wrong"),
        ])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "invalid_client");
}

#[tokio::test]
async fn test_unknown_client_is_invalid_client() {
    let state = test_state();
    let base = spawn_server(state).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/oauth2/token"))
        .form(&[("grant_type", "client_credentials"), ("client_id", "ghost")])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_non_form_body_is_invalid_request() {
    let state = test_state();
    let base = spawn_server(state).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/oauth2/token"))
        .json(&serde_json::json!({ "grant_type": "client_credentials" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn test_token_exchange_issued_token_type() {
    let state = test_state();
    register_app(
        &state,
        "exchanger",
        Some("s3cret"),
        ClientAuthMethod::ClientSecretPost,
        &[GrantType::ClientCredentials, GrantType::TokenExchange],
        &["system:user"],
    );
    let base = spawn_server(state).await;
    let client = reqwest::Client::new();

    let minted: Value = client
        .post(format!("{base}/oauth2/token"))
        .form(&[
            ("grant_type", "client_credentials"),
            ("client_id", "exchanger"),
            ("client_secret", "s3cret"),
            ("scope", "system:user"),
        ])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let subject_token = minted["access_token"].as_str().unwrap();

    let response = client
        .post(format!("{base}/oauth2/token"))
        .form(&[
            (
                "grant_type",
                "urn:ietf:params:oauth:grant-type:token-exchange",
            ),
            ("client_id", "exchanger"),
            ("client_secret", "s3cret"),
            ("subject_token", subject_token),
            (
                "subject_token_type",
                "urn:ietf:params:oauth:token-type:access_token",
            ),
            ("scope", "system:user"),
            ("audience", "downstream"),
        ])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body["issued_token_type"],
        "urn:ietf:params:oauth:token-type:access_token"
    );
    assert_eq!(body["scope"], "system:user");
}

#[tokio::test]
async fn test_health_endpoint() {
    let state = test_state();
    let base = spawn_server(state).await;

    let response = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
}
