//! Admin-surface authorization tests: OU membership, OU inheritance, and
//! scope implication over live HTTP

use serde_json::{json, Value};
use thunder::store::{Resource, ResourceStore};

mod common;

use common::{mint_token, seed_ou_tree, spawn_server, test_state};

async fn seed_resources(state: &thunder::server::AppState) {
    state
        .users
        .create(Resource {
            id: "user-ou2".to_string(),
            display_name: "Resident of ou2".to_string(),
            ou_id: Some("ou2".to_string()),
            body: json!({}),
        })
        .await
        .unwrap();

    state
        .user_schemas
        .create(Resource {
            id: "schema-ou1".to_string(),
            display_name: "Employee schema".to_string(),
            ou_id: Some("ou1".to_string()),
            body: json!({ "attributes": ["email"] }),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_write_denied_across_ou_boundary() {
    let state = test_state();
    seed_ou_tree(&state);
    seed_resources(&state).await;
    let token = mint_token(&state, "admin-1", &["system:user"], Some("ou1"));
    let base = spawn_server(state).await;

    // Caller in ou1 writes a user owned by ou2
    let response = reqwest::Client::new()
        .put(format!("{base}/users/user-ou2"))
        .bearer_auth(&token)
        .json(&json!({ "displayName": "Renamed", "ouId": "ou2" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 403);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "access_denied");
}

#[tokio::test]
async fn test_write_allowed_in_own_ou() {
    let state = test_state();
    seed_ou_tree(&state);
    seed_resources(&state).await;
    let token = mint_token(&state, "admin-2", &["system:user"], Some("ou2"));
    let base = spawn_server(state).await;

    let response = reqwest::Client::new()
        .put(format!("{base}/users/user-ou2"))
        .bearer_auth(&token)
        .json(&json!({ "displayName": "Renamed", "ouId": "ou2" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["displayName"], "Renamed");
}

#[tokio::test]
async fn test_read_inherited_from_ancestor_but_write_denied() {
    let state = test_state();
    seed_ou_tree(&state);
    seed_resources(&state).await;
    // ou12 is a child of ou1, which owns the schema
    let token = mint_token(&state, "admin-12", &["system:userschema"], Some("ou12"));
    let base = spawn_server(state).await;
    let client = reqwest::Client::new();

    let read = client
        .get(format!("{base}/user-schemas/schema-ou1"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(read.status(), 200);
    let body: Value = read.json().await.unwrap();
    assert_eq!(body["id"], "schema-ou1");

    // Deleting the same schema never inherits
    let delete = client
        .delete(format!("{base}/user-schemas/schema-ou1"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(delete.status(), 403);
}

#[tokio::test]
async fn test_sibling_ou_cannot_read() {
    let state = test_state();
    seed_ou_tree(&state);
    seed_resources(&state).await;
    let token = mint_token(&state, "admin-2", &["system:userschema"], Some("ou2"));
    let base = spawn_server(state).await;

    let response = reqwest::Client::new()
        .get(format!("{base}/user-schemas/schema-ou1"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn test_scope_implication_parent_grants_child() {
    let state = test_state();
    seed_ou_tree(&state);
    seed_resources(&state).await;
    // Holding system:user implies system:user:view
    let token = mint_token(&state, "admin-2", &["system:user"], Some("ou2"));
    let base = spawn_server(state).await;

    let response = reqwest::Client::new()
        .get(format!("{base}/users/user-ou2"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_child_scope_does_not_grant_parent_action() {
    let state = test_state();
    seed_ou_tree(&state);
    seed_resources(&state).await;
    // system:user:view does not satisfy system:user:update
    let token = mint_token(&state, "admin-2", &["system:user:view"], Some("ou2"));
    let base = spawn_server(state).await;

    let response = reqwest::Client::new()
        .put(format!("{base}/users/user-ou2"))
        .bearer_auth(&token)
        .json(&json!({ "displayName": "Nope", "ouId": "ou2" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn test_missing_bearer_token_is_unauthenticated() {
    let state = test_state();
    let base = spawn_server(state).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{base}/users/whoever"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let response = client
        .get(format!("{base}/users/whoever"))
        .bearer_auth("garbage.token.here")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_unknown_resource_is_not_found() {
    let state = test_state();
    seed_ou_tree(&state);
    let token = mint_token(&state, "admin-1", &["system:user"], Some("ou1"));
    let base = spawn_server(state).await;

    let response = reqwest::Client::new()
        .get(format!("{base}/users/ghost"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn test_schema_list_includes_ancestor_ou_schemas() {
    let state = test_state();
    seed_ou_tree(&state);
    seed_resources(&state).await;
    let token = mint_token(&state, "admin-12", &["system:userschema"], Some("ou12"));
    let base = spawn_server(state).await;

    let body: Value = reqwest::Client::new()
        .get(format!("{base}/user-schemas"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let ids: Vec<&str> = body["resources"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&"schema-ou1"));
}

#[tokio::test]
async fn test_user_list_filtered_by_caller_ou() {
    let state = test_state();
    seed_ou_tree(&state);
    seed_resources(&state).await;
    state
        .users
        .create(Resource {
            id: "user-ou1".to_string(),
            display_name: "Resident of ou1".to_string(),
            ou_id: Some("ou1".to_string()),
            body: json!({}),
        })
        .await
        .unwrap();

    let token = mint_token(&state, "admin-1", &["system:user"], Some("ou1"));
    let base = spawn_server(state).await;

    let body: Value = reqwest::Client::new()
        .get(format!("{base}/users"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let ids: Vec<&str> = body["resources"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["user-ou1"]);
}

#[tokio::test]
async fn test_ou_list_returns_only_callers_ou() {
    let state = test_state();
    seed_ou_tree(&state);
    let token = mint_token(&state, "admin-1", &["system:ou"], Some("ou1"));
    let base = spawn_server(state).await;

    let body: Value = reqwest::Client::new()
        .get(format!("{base}/organization-units"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["count"], 1);
    assert_eq!(body["resources"][0]["id"], "ou1");
}

#[tokio::test]
async fn test_ou_delete_requires_membership() {
    let state = test_state();
    seed_ou_tree(&state);
    let token = mint_token(&state, "admin-1", &["system:ou"], Some("ou1"));
    let base = spawn_server(state).await;
    let client = reqwest::Client::new();

    let denied = client
        .delete(format!("{base}/organization-units/ou2"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), 403);

    let allowed = client
        .delete(format!("{base}/organization-units/ou1"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(allowed.status(), 204);
}
