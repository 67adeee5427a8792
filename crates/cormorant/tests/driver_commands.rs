//! Command-service envelope tests: routing by type URL, typed responses,
//! collected log messages, and error-kind mapping.

mod common;

use axum::http::StatusCode;
use common::{test_server, ADMIN_KEY};

async fn execute(
    server: &common::TestServer,
    type_url: &str,
    payload: serde_json::Value,
) -> common::TestResponse {
    let mut command = serde_json::Map::new();
    command.insert("@type".to_string(), serde_json::json!(type_url));
    if let serde_json::Value::Object(fields) = payload {
        command.extend(fields);
    }
    server
        .request(
            "POST",
            "/driver/execute",
            None,
            Some(serde_json::json!({"command": command})),
        )
        .await
}

#[tokio::test]
async fn test_project_and_table_commands() {
    let server = test_server();

    let response = execute(
        &server,
        "type.googleapis.com/cormorant.CreateProjectCommand",
        serde_json::json!({"project_id": "p1"}),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);
    assert_eq!(response.body["commandResponse"]["id"], "p1");
    let messages = response.body["messages"].as_array().unwrap();
    assert!(messages
        .iter()
        .any(|m| m["message"].as_str().unwrap().contains("created")));

    let response = execute(
        &server,
        "cormorant.CreateBucketCommand",
        serde_json::json!({"project_id": "p1", "bucket_name": "in"}),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);

    let response = execute(
        &server,
        "cormorant.CreateTableCommand",
        serde_json::json!({
            "project_id": "p1",
            "bucket_name": "in",
            "table_name": "users",
            "columns": [
                {"name": "id", "type": "INTEGER", "nullable": false},
                {"name": "name", "type": "VARCHAR"},
            ],
            "primary_key": ["id"],
        }),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);
    assert_eq!(response.body["commandResponse"]["name"], "users");
    assert_eq!(response.body["commandResponse"]["primary_key"][0], "id");

    let response = execute(
        &server,
        "cormorant.PreviewTableCommand",
        serde_json::json!({
            "project_id": "p1",
            "bucket_name": "in",
            "table_name": "users",
            "limit": 5,
        }),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["commandResponse"]["total_row_count"], 0);

    // DropTable responds with no payload, only messages.
    let response = execute(
        &server,
        "cormorant.DropTableCommand",
        serde_json::json!({"project_id": "p1", "bucket_name": "in", "table_name": "users"}),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);
    assert!(response.body.get("commandResponse").is_none());
}

#[tokio::test]
async fn test_unknown_command_is_unimplemented() {
    let server = test_server();
    let response = execute(
        &server,
        "cormorant.FrobnicateCommand",
        serde_json::json!({}),
    )
    .await;
    assert_eq!(response.status, StatusCode::NOT_IMPLEMENTED);
    let messages = response.body["messages"].as_array().unwrap();
    assert!(messages
        .iter()
        .any(|m| m["message"].as_str().unwrap().contains("Unsupported command")));
}

#[tokio::test]
async fn test_error_kind_mapping() {
    let server = test_server();

    // Missing project -> not found.
    let response = execute(
        &server,
        "cormorant.DropProjectCommand",
        serde_json::json!({"project_id": "ghost"}),
    )
    .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    // Malformed payload -> invalid argument.
    let response = execute(
        &server,
        "cormorant.CreateProjectCommand",
        serde_json::json!({"name": 42}),
    )
    .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    // Duplicate create -> conflict.
    execute(
        &server,
        "cormorant.CreateProjectCommand",
        serde_json::json!({"project_id": "p1"}),
    )
    .await;
    let response = execute(
        &server,
        "cormorant.CreateProjectCommand",
        serde_json::json!({"project_id": "p1"}),
    )
    .await;
    assert_eq!(response.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_invalid_envelope_credentials_rejected() {
    let server = test_server();
    let response = server
        .request(
            "POST",
            "/driver/execute",
            None,
            Some(serde_json::json!({
                "command": {
                    "@type": "cormorant.CreateProjectCommand",
                    "project_id": "p1",
                },
                "credentials": {"host": "p1", "principal": "garbage-key"},
            })),
        )
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_remove_backend_is_noop() {
    let server = test_server();
    let response = execute(&server, "cormorant.RemoveBackendCommand", serde_json::json!({})).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["commandResponse"]["initialized"], true);
}

#[tokio::test]
async fn test_workspace_commands_back_the_wire_bridge() {
    let server = test_server();
    execute(
        &server,
        "cormorant.CreateProjectCommand",
        serde_json::json!({"project_id": "p1"}),
    )
    .await;

    let response = execute(
        &server,
        "cormorant.CreateWorkspaceCommand",
        serde_json::json!({"project_id": "p1", "username": "analyst"}),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);
    let password = response.body["commandResponse"]["password"]
        .as_str()
        .unwrap()
        .to_string();
    let workspace_id = response.body["commandResponse"]["workspace_id"]
        .as_str()
        .unwrap()
        .to_string();

    // The wire bridge authenticates against the created workspace.
    let response = server
        .request(
            "POST",
            "/internal/pgwire/auth",
            None,
            Some(serde_json::json!({"username": "analyst", "password": password})),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);
    assert_eq!(response.body["workspace_id"], workspace_id);
    assert_eq!(response.body["project_id"], "p1");

    // Wrong password is refused.
    let response = server
        .request(
            "POST",
            "/internal/pgwire/auth",
            None,
            Some(serde_json::json!({"username": "analyst", "password": "wrong"})),
        )
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);

    // Session lifecycle: create, activity, cleanup, close.
    let response = server
        .request(
            "POST",
            "/internal/pgwire/sessions",
            None,
            Some(serde_json::json!({
                "session_id": "s1",
                "workspace_id": workspace_id,
                "client_ip": "10.0.0.9",
            })),
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED);

    let response = server
        .request(
            "PATCH",
            "/internal/pgwire/sessions/s1/activity",
            None,
            Some(serde_json::json!({"increment_queries": true})),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["query_count"], 1);

    let response = server
        .request(
            "DELETE",
            "/internal/pgwire/sessions/s1?reason=user_disconnect",
            None,
            None,
        )
        .await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);

    let response = server
        .request(
            "GET",
            "/internal/pgwire/sessions?status=user_disconnect",
            None,
            None,
        )
        .await;
    assert_eq!(response.body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_http_and_driver_share_semantics() {
    let server = test_server();

    // Create over HTTP, inspect over the command service.
    let response = server
        .request(
            "POST",
            "/projects",
            Some(ADMIN_KEY),
            Some(serde_json::json!({"id": "p1"})),
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED);

    let response = execute(
        &server,
        "cormorant.ObjectInfoCommand",
        serde_json::json!({"project_id": "p1"}),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["commandResponse"]["id"], "p1");
}
