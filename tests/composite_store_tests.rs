//! Composite-store behavior over the admin surface: declarative
//! precedence on read, immutability on write

use serde_json::{json, Value};
use std::sync::Arc;
use thunder::config::StoreMode;
use thunder::server::AppState;

mod common;

use common::{mint_token, spawn_server, test_config};

fn composite_state(dir: &std::path::Path) -> Arc<AppState> {
    let mut config = test_config();
    config.stores.mode = StoreMode::Composite;
    config.stores.declarative_dir = Some(dir.to_path_buf());
    Arc::new(AppState::from_config(config).expect("composite state"))
}

fn write_schema(dir: &std::path::Path, file: &str, id: &str, name: &str) {
    std::fs::write(
        dir.join(file),
        format!("id: {id}\ndisplayName: {name}\nbody:\n  attributes: []\n"),
    )
    .unwrap();
}

#[tokio::test]
async fn test_declarative_schema_reads_and_rejects_writes() {
    let dir = tempfile::tempdir().unwrap();
    write_schema(dir.path(), "base.yaml", "schema-decl", "Declarative schema");

    let state = composite_state(dir.path());
    let token = mint_token(&state, "root-admin", &["system:userschema"], None);
    let base = spawn_server(state).await;
    let client = reqwest::Client::new();

    // Read resolves to the file copy
    let read = client
        .get(format!("{base}/user-schemas/schema-decl"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(read.status(), 200);
    let body: Value = read.json().await.unwrap();
    assert_eq!(body["displayName"], "Declarative schema");

    // Mutations of declarative ids are rejected
    let update = client
        .put(format!("{base}/user-schemas/schema-decl"))
        .bearer_auth(&token)
        .json(&json!({ "displayName": "Hijacked" }))
        .send()
        .await
        .unwrap();
    assert_eq!(update.status(), 400);
    let body: Value = update.json().await.unwrap();
    assert_eq!(body["code"], "cannot_mutate_declarative");

    let delete = client
        .delete(format!("{base}/user-schemas/schema-decl"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(delete.status(), 400);
}

#[tokio::test]
async fn test_create_goes_to_db_and_merged_list() {
    let dir = tempfile::tempdir().unwrap();
    write_schema(dir.path(), "base.yaml", "schema-decl", "Declarative schema");

    let state = composite_state(dir.path());
    let token = mint_token(&state, "root-admin", &["system:userschema"], None);
    let base = spawn_server(state).await;
    let client = reqwest::Client::new();

    let created = client
        .post(format!("{base}/user-schemas"))
        .bearer_auth(&token)
        .json(&json!({ "id": "schema-db", "displayName": "Mutable schema" }))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), 201);

    // The created row mutates normally
    let update = client
        .put(format!("{base}/user-schemas/schema-db"))
        .bearer_auth(&token)
        .json(&json!({ "displayName": "Mutable schema v2" }))
        .send()
        .await
        .unwrap();
    assert_eq!(update.status(), 200);

    let list: Value = client
        .get(format!("{base}/user-schemas"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let ids: Vec<&str> = list["resources"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["schema-db", "schema-decl"]);
}

#[tokio::test]
async fn test_file_precedence_when_id_shadowed() {
    let dir = tempfile::tempdir().unwrap();
    write_schema(dir.path(), "base.yaml", "schema-shared", "File version");

    let state = composite_state(dir.path());
    let token = mint_token(&state, "root-admin", &["system:userschema"], None);
    let base = spawn_server(state).await;
    let client = reqwest::Client::new();

    // A DB row behind the declarative id is allowed but shadowed
    let created = client
        .post(format!("{base}/user-schemas"))
        .bearer_auth(&token)
        .json(&json!({ "id": "schema-shared", "displayName": "DB version" }))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), 201);

    let read: Value = client
        .get(format!("{base}/user-schemas/schema-shared"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(read["displayName"], "File version");

    let list: Value = client
        .get(format!("{base}/user-schemas"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["count"], 1);
    assert_eq!(list["resources"][0]["displayName"], "File version");
}
