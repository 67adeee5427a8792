//! File staging and access endpoints.
//!
//! Uploads stream multipart bytes to the staging directory without
//! buffering the whole body; downloads stream from disk.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use cormorant_protocol::http_types::{FilePrepareRequest, FileRegisterRequest};
use cormorant_protocol::ApiError;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use crate::auth;
use crate::error::{AppError, HttpResult};
use crate::ops;
use crate::state::{blocking, App};

pub async fn prepare_upload(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
    Json(request): Json<FilePrepareRequest>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, None, true)?;
    let response = blocking(move || ops::files::prepare_upload(&app, &project_id, &request)).await?;
    Ok(Json(response))
}

pub async fn upload_file(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((project_id, upload_key)): Path<(String, String)>,
    mut multipart: Multipart,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, None, true)?;

    let (_, staged_path) = {
        let app = app.clone();
        let project_id = project_id.clone();
        let upload_key = upload_key.clone();
        blocking(move || ops::files::staging_target(&app, &project_id, &upload_key)).await?
    };

    // Stream the multipart field to disk, hashing as it goes.
    let mut field_found = false;
    let mut size_bytes: i64 = 0;
    let mut hasher = Sha256::new();
    while let Some(mut field) = multipart.next_field().await.map_err(|err| {
        AppError(ApiError::invalid_argument(
            "invalid_multipart",
            format!("Malformed multipart body: {err}"),
        ))
    })? {
        if field.name() != Some("file") {
            continue;
        }
        field_found = true;
        let mut file = tokio::fs::File::create(&staged_path).await.map_err(|err| {
            AppError(ApiError::internal(format!("Failed to create staged file: {err}")))
        })?;
        while let Some(chunk) = field.chunk().await.map_err(|err| {
            AppError(ApiError::invalid_argument(
                "invalid_multipart",
                format!("Failed to read upload stream: {err}"),
            ))
        })? {
            size_bytes += chunk.len() as i64;
            if size_bytes > app.config.max_file_size_bytes {
                drop(file);
                let _ = tokio::fs::remove_file(&staged_path).await;
                return Err(AppError(ApiError::new(
                    cormorant_protocol::ErrorKind::PayloadTooLarge,
                    "file_too_large",
                    format!(
                        "File size exceeds maximum of {} bytes",
                        app.config.max_file_size_bytes
                    ),
                )));
            }
            hasher.update(&chunk);
            file.write_all(&chunk).await.map_err(|err| {
                AppError(ApiError::internal(format!("Failed to write staged file: {err}")))
            })?;
        }
        file.flush().await.map_err(|err| {
            AppError(ApiError::internal(format!("Failed to flush staged file: {err}")))
        })?;
        break;
    }
    if !field_found {
        return Err(AppError(ApiError::invalid_argument(
            "missing_file_field",
            "Multipart body must contain a 'file' field",
        )));
    }

    let checksum = hex::encode(hasher.finalize());
    let response = blocking(move || {
        ops::files::complete_upload(
            &app,
            &project_id,
            &upload_key,
            &staged_path,
            size_bytes,
            &checksum,
        )
    })
    .await?;
    Ok(Json(response))
}

pub async fn register_file(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
    Json(request): Json<FileRegisterRequest>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, None, true)?;
    let response = blocking(move || ops::files::register_file(&app, &project_id, &request)).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListFilesQuery {
    #[serde(default)]
    pub is_staged: Option<bool>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    100
}

pub async fn list_files(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
    Query(query): Query<ListFilesQuery>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, None, false)?;
    let response = blocking(move || {
        ops::files::list_files(&app, &project_id, query.is_staged, query.limit, query.offset)
    })
    .await?;
    Ok(Json(response))
}

pub async fn get_file(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((project_id, file_id)): Path<(String, String)>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, None, false)?;
    let response = blocking(move || ops::files::get_file(&app, &project_id, &file_id)).await?;
    Ok(Json(response))
}

pub async fn delete_file(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((project_id, file_id)): Path<(String, String)>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, None, true)?;
    blocking(move || ops::files::delete_file(&app, &project_id, &file_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Stream a file from disk without buffering the whole body.
pub async fn download_file(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((project_id, file_id)): Path<(String, String)>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, None, false)?;
    let (record, path) = {
        let app = app.clone();
        blocking(move || ops::files::download_path(&app, &project_id, &file_id)).await?
    };

    let file = tokio::fs::File::open(&path).await.map_err(|err| {
        AppError(ApiError::not_found(
            "file_content_not_found",
            format!("File content not found on disk: {err}"),
        ))
    })?;
    let stream = ReaderStream::new(file);
    let content_type = record
        .content_type
        .unwrap_or_else(|| "application/octet-stream".to_string());

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", record.name),
            ),
        ],
        Body::from_stream(stream),
    ))
}
