//! End-to-end scenarios over the HTTP facade.

mod common;

use axum::http::StatusCode;
use common::{setup_users_table, stage_file, test_server, ADMIN_KEY};

#[tokio::test]
async fn test_project_lifecycle() {
    let server = test_server();

    let response = server
        .request(
            "POST",
            "/projects",
            Some(ADMIN_KEY),
            Some(serde_json::json!({"id": "p1"})),
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.body["id"], "p1");
    assert!(response.body["api_key"]
        .as_str()
        .unwrap()
        .starts_with("proj_p1_admin_"));
    // Every response echoes a request id.
    assert!(response.headers.contains_key("x-request-id"));

    let response = server
        .request("GET", "/projects/p1", Some(ADMIN_KEY), None)
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["id"], "p1");

    let response = server
        .request("DELETE", "/projects/p1", Some(ADMIN_KEY), None)
        .await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);

    let response = server
        .request("GET", "/projects/p1", Some(ADMIN_KEY), None)
        .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.body["error"], "project_not_found");
}

#[tokio::test]
async fn test_auth_is_enforced() {
    let server = test_server();

    // No key at all.
    let response = server.request("GET", "/projects/p1", None, None).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);

    // Project creation needs the admin key, not just any key.
    let response = server
        .request(
            "POST",
            "/projects",
            Some("proj_p1_admin_00000000000000000000000000000000"),
            Some(serde_json::json!({"id": "p1"})),
        )
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);

    // Health and metrics are open.
    let response = server.request("GET", "/health", None, None).await;
    assert_eq!(response.status, StatusCode::OK);
    let response = server.request("GET", "/metrics", None, None).await;
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn test_csv_import_upsert_flow() {
    let server = test_server();
    let api_key = setup_users_table(&server, "p").await;

    let f1 = stage_file(
        &server,
        &api_key,
        "p",
        "f1.csv",
        "id,name,email\n1,A,a@x\n2,B,b@x",
    )
    .await;
    let f2 = stage_file(
        &server,
        &api_key,
        "p",
        "f2.csv",
        "id,name,email\n2,B2,b2@x\n3,C,c@x",
    )
    .await;

    // Full load.
    let response = server
        .request(
            "POST",
            "/projects/p/branches/default/buckets/in/tables/users/import/file",
            Some(&api_key),
            Some(serde_json::json!({
                "file_id": f1,
                "format": "csv",
                "import_options": {"incremental": false},
            })),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);
    assert_eq!(response.body["imported_rows"], 2);
    assert_eq!(response.body["table_rows_after"], 2);

    // Incremental upsert.
    let response = server
        .request(
            "POST",
            "/projects/p/branches/default/buckets/in/tables/users/import/file",
            Some(&api_key),
            Some(serde_json::json!({
                "file_id": f2,
                "format": "csv",
                "import_options": {"incremental": true, "dedup_mode": "update_duplicates"},
            })),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);
    assert_eq!(response.body["table_rows_after"], 3);

    // Row id=2 was updated in place.
    let response = server
        .request(
            "GET",
            "/projects/p/branches/default/buckets/in/tables/users/preview?limit=10",
            Some(&api_key),
            None,
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["total_row_count"], 3);
    let rows = response.body["rows"].as_array().unwrap();
    let row2 = rows
        .iter()
        .find(|row| row[0] == serde_json::json!(2))
        .expect("row with id=2");
    assert_eq!(row2[1], "B2");
    assert_eq!(row2[2], "b2@x");
}

#[tokio::test]
async fn test_snapshot_and_restore_flow() {
    let server = test_server();
    let api_key = setup_users_table(&server, "p").await;
    let f1 = stage_file(
        &server,
        &api_key,
        "p",
        "f1.csv",
        "id,name,email\n1,A,a@x\n2,B,b@x\n3,C,c@x",
    )
    .await;
    server
        .request(
            "POST",
            "/projects/p/branches/default/buckets/in/tables/users/import/file",
            Some(&api_key),
            Some(serde_json::json!({"file_id": f1, "format": "csv"})),
        )
        .await;

    // Manual snapshot.
    let response = server
        .request(
            "POST",
            "/projects/p/branches/default/snapshots",
            Some(&api_key),
            Some(serde_json::json!({"bucket": "in", "table": "users"})),
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.body);
    let snapshot_id = response.body["id"].as_str().unwrap().to_string();
    assert!(snapshot_id.starts_with("snap_users_"));
    assert_eq!(response.body["row_count"], 3);

    // Dropping the table takes an auto_predrop snapshot first.
    let response = server
        .request(
            "DELETE",
            "/projects/p/branches/default/buckets/in/tables/users",
            Some(&api_key),
            None,
        )
        .await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);

    let response = server
        .request(
            "GET",
            "/projects/p/branches/default/snapshots?type=auto_predrop",
            Some(&api_key),
            None,
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["total"], 1);

    // Restore the manual snapshot.
    let response = server
        .request(
            "POST",
            &format!("/projects/p/branches/default/snapshots/{snapshot_id}/restore"),
            Some(&api_key),
            Some(serde_json::json!({})),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);
    assert_eq!(response.body["row_count"], 3);

    let response = server
        .request(
            "GET",
            "/projects/p/branches/default/buckets/in/tables/users/preview?limit=10",
            Some(&api_key),
            None,
        )
        .await;
    assert_eq!(response.body["total_row_count"], 3);
}

#[tokio::test]
async fn test_idempotency_replay_and_conflict() {
    let server = test_server();
    let key_headers: [(&str, &str); 1] = [("x-idempotency-key", "k1")];

    let first = server
        .request_with_headers(
            "POST",
            "/projects",
            Some(ADMIN_KEY),
            Some(serde_json::json!({"id": "p_i"})),
            &key_headers,
        )
        .await;
    assert_eq!(first.status, StatusCode::CREATED);
    assert!(!first.headers.contains_key("x-idempotency-replay"));

    // Same key, same body: byte-identical replay.
    let replay = server
        .request_with_headers(
            "POST",
            "/projects",
            Some(ADMIN_KEY),
            Some(serde_json::json!({"id": "p_i"})),
            &key_headers,
        )
        .await;
    assert_eq!(replay.status, StatusCode::CREATED);
    assert_eq!(replay.headers.get("x-idempotency-replay").unwrap(), "true");
    assert_eq!(replay.raw_body, first.raw_body);

    // Same key, different body: conflict, operation not executed.
    let conflict = server
        .request_with_headers(
            "POST",
            "/projects",
            Some(ADMIN_KEY),
            Some(serde_json::json!({"id": "p_i", "name": "X"})),
            &key_headers,
        )
        .await;
    assert_eq!(conflict.status, StatusCode::CONFLICT);
    assert_eq!(conflict.body["error"], "idempotency_conflict");

    // Same key, different endpoint: also a conflict.
    let conflict = server
        .request_with_headers(
            "DELETE",
            "/projects/p_i",
            Some(ADMIN_KEY),
            None,
            &key_headers,
        )
        .await;
    assert_eq!(conflict.status, StatusCode::CONFLICT);

    // The project still exists exactly once.
    let response = server
        .request("GET", "/projects/p_i", Some(ADMIN_KEY), None)
        .await;
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn test_branch_live_view_cow_and_pull() {
    let server = test_server();
    let api_key = setup_users_table(&server, "p").await;
    let f1 = stage_file(
        &server,
        &api_key,
        "p",
        "f1.csv",
        "id,name,email\n1,A,a@x\n2,B,b@x\n3,C,c@x",
    )
    .await;
    server
        .request(
            "POST",
            "/projects/p/branches/default/buckets/in/tables/users/import/file",
            Some(&api_key),
            Some(serde_json::json!({"file_id": f1, "format": "csv"})),
        )
        .await;

    // Create a dev branch.
    let response = server
        .request(
            "POST",
            "/projects/p/branches",
            Some(&api_key),
            Some(serde_json::json!({"name": "dev1"})),
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.body);
    let branch_id = response.body["id"].as_str().unwrap().to_string();

    // Live view: branch reads main's three rows.
    let response = server
        .request(
            "GET",
            &format!("/projects/p/branches/{branch_id}/buckets/in/tables/users/preview?limit=10"),
            Some(&api_key),
            None,
        )
        .await;
    assert_eq!(response.body["total_row_count"], 3);
    let response = server
        .request(
            "GET",
            &format!("/projects/p/branches/{branch_id}/buckets/in/tables/users"),
            Some(&api_key),
            None,
        )
        .await;
    assert_eq!(response.body["source"], "main");

    // Delete one row on the branch: copy-on-write.
    let response = server
        .request(
            "POST",
            &format!(
                "/projects/p/branches/{branch_id}/buckets/in/tables/users/rows/delete"
            ),
            Some(&api_key),
            Some(serde_json::json!({"where_filter": "id = 1"})),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);
    assert_eq!(response.body["deleted_rows"], 1);

    // Branch sees two rows; main still sees three.
    let response = server
        .request(
            "GET",
            &format!("/projects/p/branches/{branch_id}/buckets/in/tables/users/preview?limit=10"),
            Some(&api_key),
            None,
        )
        .await;
    assert_eq!(response.body["total_row_count"], 2);
    let response = server
        .request(
            "GET",
            "/projects/p/branches/default/buckets/in/tables/users/preview?limit=10",
            Some(&api_key),
            None,
        )
        .await;
    assert_eq!(response.body["total_row_count"], 3);

    // Pull restores the live view.
    let response = server
        .request(
            "POST",
            &format!("/projects/p/branches/{branch_id}/tables/in/users/pull"),
            Some(&api_key),
            None,
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["was_local"], true);

    let response = server
        .request(
            "GET",
            &format!("/projects/p/branches/{branch_id}/buckets/in/tables/users/preview?limit=10"),
            Some(&api_key),
            None,
        )
        .await;
    assert_eq!(response.body["total_row_count"], 3);

    // Pull again: idempotent.
    let response = server
        .request(
            "POST",
            &format!("/projects/p/branches/{branch_id}/tables/in/users/pull"),
            Some(&api_key),
            None,
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["was_local"], false);
}

#[tokio::test]
async fn test_concurrent_incremental_imports() {
    let server = test_server();
    let api_key = setup_users_table(&server, "p").await;

    // One staged file per distinct primary-key row.
    let mut file_ids = Vec::new();
    for i in 1..=5 {
        let content = format!("id,name,email\n{i},U{i},u{i}@x");
        file_ids.push(stage_file(&server, &api_key, "p", &format!("f{i}.csv"), &content).await);
    }

    let mut handles = Vec::new();
    for file_id in file_ids {
        let server_router = server.router.clone();
        let api_key = api_key.clone();
        handles.push(tokio::spawn(async move {
            use tower::util::ServiceExt;
            let body = serde_json::json!({
                "file_id": file_id,
                "format": "csv",
                "import_options": {"incremental": true, "dedup_mode": "update_duplicates"},
            });
            let request = axum::http::Request::builder()
                .method("POST")
                .uri("/projects/p/branches/default/buckets/in/tables/users/import/file")
                .header("authorization", format!("Bearer {api_key}"))
                .header("content-type", "application/json")
                .body(axum::body::Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap();
            let response = server_router.oneshot(request).await.unwrap();
            response.status()
        }));
    }
    for handle in handles {
        let status = handle.await.unwrap();
        assert_eq!(status, StatusCode::OK);
    }

    let response = server
        .request(
            "GET",
            "/projects/p/branches/default/buckets/in/tables/users/preview?limit=10",
            Some(&api_key),
            None,
        )
        .await;
    assert_eq!(response.body["total_row_count"], 5);
    // All writers have drained; nothing may still hold a table lock.
    assert_eq!(server.app.storage.locks().active_locks_count(), 0);
}

#[tokio::test]
async fn test_export_with_filter_and_denylist() {
    let server = test_server();
    let api_key = setup_users_table(&server, "p").await;
    let f1 = stage_file(
        &server,
        &api_key,
        "p",
        "f1.csv",
        "id,name,email\n1,A,a@x\n2,B,b@x\n3,C,c@x",
    )
    .await;
    server
        .request(
            "POST",
            "/projects/p/branches/default/buckets/in/tables/users/import/file",
            Some(&api_key),
            Some(serde_json::json!({"file_id": f1, "format": "csv"})),
        )
        .await;

    let response = server
        .request(
            "POST",
            "/projects/p/branches/default/buckets/in/tables/users/export",
            Some(&api_key),
            Some(serde_json::json!({
                "format": "csv",
                "columns": ["id", "name"],
                "where_filter": "id > 1",
            })),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);
    assert_eq!(response.body["rows_exported"], 2);
    let file_id = response.body["file_id"].as_str().unwrap().to_string();

    // Export is registered as a permanent, downloadable file.
    let response = server
        .request(
            "GET",
            &format!("/projects/p/files/{file_id}/download"),
            Some(&api_key),
            None,
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    let content = String::from_utf8(response.raw_body).unwrap();
    assert!(content.starts_with("id,name"));
    assert!(!content.contains("email"));

    // Unsafe filters are rejected with invalid-argument.
    let response = server
        .request(
            "POST",
            "/projects/p/branches/default/buckets/in/tables/users/export",
            Some(&api_key),
            Some(serde_json::json!({
                "format": "csv",
                "where_filter": "id = 1; drop table data",
            })),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_snapshot_settings_hierarchy() {
    let server = test_server();
    let api_key = setup_users_table(&server, "p").await;

    // Project layer turns truncate trigger on.
    let response = server
        .request(
            "PUT",
            "/projects/p/settings/snapshots",
            Some(&api_key),
            Some(serde_json::json!({"auto_snapshot_triggers": {"truncate_table": true}})),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);
    assert_eq!(
        response.body["effective"]["auto_snapshot_triggers"]["truncate_table"],
        true
    );
    assert_eq!(
        response.body["sources"]["auto_snapshot_triggers.truncate_table"],
        "project"
    );
    // Untouched leaves still come from the system layer.
    assert_eq!(response.body["sources"]["retention.manual_days"], "system");

    // Table layer overrides retention; the table scope reports all three
    // source layers accurately.
    let response = server
        .request(
            "PUT",
            "/projects/p/buckets/in/tables/users/settings/snapshots",
            Some(&api_key),
            Some(serde_json::json!({"retention": {"auto_days": 14}})),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["effective"]["retention"]["auto_days"], 14);
    assert_eq!(response.body["sources"]["retention.auto_days"], "table");
    assert_eq!(
        response.body["sources"]["auto_snapshot_triggers.truncate_table"],
        "project"
    );

    // Out-of-range retention is rejected.
    let response = server
        .request(
            "PUT",
            "/projects/p/settings/snapshots",
            Some(&api_key),
            Some(serde_json::json!({"retention": {"manual_days": 4000}})),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    // Unknown keys are rejected at the boundary.
    let response = server
        .request(
            "PUT",
            "/projects/p/settings/snapshots",
            Some(&api_key),
            Some(serde_json::json!({"retention": {"weeks": 2}})),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_api_key_rotation_and_lockout_prevention() {
    let server = test_server();
    let api_key = setup_users_table(&server, "p").await;

    // The initial admin key is listed.
    let response = server
        .request("GET", "/projects/p/api-keys", Some(&api_key), None)
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["total"], 1);
    let key_id = response.body["api_keys"][0]["id"].as_str().unwrap().to_string();

    // Revoking the last admin key is refused.
    let response = server
        .request(
            "DELETE",
            &format!("/projects/p/api-keys/{key_id}"),
            Some(&api_key),
            None,
        )
        .await;
    assert_eq!(response.status, StatusCode::CONFLICT);

    // Rotation replaces it and revokes the original.
    let response = server
        .request(
            "POST",
            &format!("/projects/p/api-keys/{key_id}/rotate"),
            Some(&api_key),
            None,
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.body);
    let new_key = response.body["api_key"].as_str().unwrap().to_string();
    assert!(new_key.starts_with("proj_p_admin_"));
    assert!(response.body["description"]
        .as_str()
        .unwrap()
        .ends_with("(rotated)"));

    // The old key no longer authenticates; the new one does.
    let response = server.request("GET", "/projects/p", Some(&api_key), None).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    let response = server.request("GET", "/projects/p", Some(&new_key), None).await;
    assert_eq!(response.status, StatusCode::OK);
}
