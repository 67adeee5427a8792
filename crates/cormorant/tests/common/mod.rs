//! Shared harness for end-to-end tests: a full application over temp
//! directories, driven through the router without a socket.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use tempfile::TempDir;
use tower::util::ServiceExt;

use cormorant::config::Config;
use cormorant::http;
use cormorant::state::App;

pub const ADMIN_KEY: &str = "test-admin-key";

pub struct TestServer {
    pub router: Router,
    pub app: Arc<App>,
    _dir: TempDir,
}

pub fn test_server() -> TestServer {
    let dir = TempDir::new().unwrap();
    let config = Config {
        data_dir: dir.path().join("data"),
        snapshots_dir: dir.path().join("snapshots"),
        files_dir: dir.path().join("files"),
        admin_key: ADMIN_KEY.to_string(),
        engine_threads: None,
        engine_memory_limit: None,
        ..Config::default()
    };
    let app = App::new(config).unwrap();
    TestServer {
        router: http::router(app.clone()),
        app,
        _dir: dir,
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: serde_json::Value,
    pub raw_body: Vec<u8>,
}

impl TestServer {
    pub async fn request(
        &self,
        method: &str,
        path: &str,
        api_key: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> TestResponse {
        self.request_with_headers(method, path, api_key, body, &[]).await
    }

    pub async fn request_with_headers(
        &self,
        method: &str,
        path: &str,
        api_key: Option<&str>,
        body: Option<serde_json::Value>,
        extra_headers: &[(&str, &str)],
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(key) = api_key {
            builder = builder.header("authorization", format!("Bearer {key}"));
        }
        for (name, value) in extra_headers {
            builder = builder.header(*name, *value);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let raw_body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec();
        let body = serde_json::from_slice(&raw_body).unwrap_or(serde_json::Value::Null);
        TestResponse {
            status,
            headers,
            body,
            raw_body,
        }
    }

    /// Multipart upload of one file field.
    pub async fn upload(
        &self,
        path: &str,
        api_key: &str,
        filename: &str,
        content: &str,
    ) -> TestResponse {
        let boundary = "cormorant-test-boundary";
        let body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
             Content-Type: text/csv\r\n\r\n\
             {content}\r\n\
             --{boundary}--\r\n"
        );
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("authorization", format!("Bearer {api_key}"))
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let raw_body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec();
        let body = serde_json::from_slice(&raw_body).unwrap_or(serde_json::Value::Null);
        TestResponse {
            status,
            headers,
            body,
            raw_body,
        }
    }
}

/// Create project `p` + bucket `in` + table `users(id PK, name, email)`,
/// returning the project's admin API key.
pub async fn setup_users_table(server: &TestServer, project_id: &str) -> String {
    let response = server
        .request(
            "POST",
            "/projects",
            Some(ADMIN_KEY),
            Some(serde_json::json!({"id": project_id})),
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.body);
    let api_key = response.body["api_key"].as_str().unwrap().to_string();

    let response = server
        .request(
            "POST",
            &format!("/projects/{project_id}/branches/default/buckets"),
            Some(&api_key),
            Some(serde_json::json!({"name": "in"})),
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.body);

    let response = server
        .request(
            "POST",
            &format!("/projects/{project_id}/branches/default/buckets/in/tables"),
            Some(&api_key),
            Some(serde_json::json!({
                "name": "users",
                "columns": [
                    {"name": "id", "type": "INTEGER", "nullable": false},
                    {"name": "name", "type": "VARCHAR"},
                    {"name": "email", "type": "VARCHAR"},
                ],
                "primary_key": ["id"],
            })),
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.body);
    api_key
}

/// Upload a staged file and register it; returns the file id usable for
/// import.
pub async fn stage_file(
    server: &TestServer,
    api_key: &str,
    project_id: &str,
    filename: &str,
    content: &str,
) -> String {
    let response = server
        .request(
            "POST",
            &format!("/projects/{project_id}/files/prepare"),
            Some(api_key),
            Some(serde_json::json!({"filename": filename, "content_type": "text/csv"})),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);
    let upload_key = response.body["upload_key"].as_str().unwrap().to_string();

    let response = server
        .upload(
            &format!("/projects/{project_id}/files/upload/{upload_key}"),
            api_key,
            filename,
            content,
        )
        .await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);

    let response = server
        .request(
            "POST",
            &format!("/projects/{project_id}/files"),
            Some(api_key),
            Some(serde_json::json!({"upload_key": upload_key})),
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.body);
    response.body["id"].as_str().unwrap().to_string()
}
