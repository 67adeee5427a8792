//! File staging and storage: the three-stage upload workflow plus the
//! file access surface.
//!
//! 1. PREPARE: mint an upload key and an in-memory session.
//! 2. UPLOAD: stream the bytes into the project's staging directory.
//! 3. REGISTER: move staging -> date-organized permanent storage and
//!    persist the catalog row.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{Duration, Utc};
use cormorant_catalog::{format_rfc3339, now_rfc3339, FileRecord, OperationEntry};
use cormorant_protocol::http_types::{
    FileInfoResponse, FileListResponse, FilePrepareRequest, FilePrepareResponse,
    FileRegisterRequest, FileUploadResponse,
};
use cormorant_protocol::{ApiError, ErrorKind};
use cormorant_storage::StorageError;
use uuid::Uuid;

use crate::error::{AppError, HttpResult};
use crate::ops::log_operation;
use crate::ops::projects::get_project_record;
use crate::state::{App, UploadSession};

pub(crate) fn record_to_response(record: &FileRecord) -> FileInfoResponse {
    FileInfoResponse {
        id: record.id.clone(),
        project_id: record.project_id.clone(),
        name: record.name.clone(),
        path: record.path.clone(),
        size_bytes: record.size_bytes,
        checksum_sha256: record.checksum_sha256.clone(),
        content_type: record.content_type.clone(),
        is_staged: record.is_staged,
        created_at: record.created_at.clone(),
        expires_at: record.expires_at.clone(),
        tags: record.tags.clone(),
    }
}

pub fn get_file_record(app: &App, project_id: &str, file_id: &str) -> HttpResult<FileRecord> {
    app.catalog().get_file(project_id, file_id)?.ok_or_else(|| {
        AppError(ApiError::not_found(
            "file_not_found",
            format!("File {file_id} not found in project {project_id}"),
        ))
    })
}

/// Stage 1: mint an upload session.
pub fn prepare_upload(
    app: &App,
    project_id: &str,
    request: &FilePrepareRequest,
) -> HttpResult<FilePrepareResponse> {
    get_project_record(app, project_id)?;
    if let Some(size) = request.size_bytes {
        if size > app.config.max_file_size_bytes {
            return Err(AppError(
                ApiError::new(
                    ErrorKind::PayloadTooLarge,
                    "file_too_large",
                    format!(
                        "File size exceeds maximum of {} bytes",
                        app.config.max_file_size_bytes
                    ),
                )
                .with_details(serde_json::json!({
                    "max_size_bytes": app.config.max_file_size_bytes,
                    "requested_size_bytes": size,
                })),
            ));
        }
    }

    let upload_key = Uuid::new_v4().to_string();
    let now = Utc::now();
    let expires_at = now + Duration::hours(app.config.staging_ttl_hours);
    let session = UploadSession {
        project_id: project_id.to_string(),
        filename: request.filename.clone(),
        content_type: request.content_type.clone(),
        expected_size: request.size_bytes,
        tags: request.tags.clone().unwrap_or_default(),
        created_at: now,
        expires_at,
        staged_path: None,
        staged_size: None,
        staged_checksum: None,
    };
    app.uploads.lock().insert(upload_key.clone(), session);

    Ok(FilePrepareResponse {
        upload_url: format!("/projects/{project_id}/files/upload/{upload_key}"),
        upload_key,
        expires_at: format_rfc3339(expires_at),
    })
}

/// Validate the session for stage 2 and return the staging path the bytes
/// go to. The handler streams the body there.
pub fn staging_target(
    app: &App,
    project_id: &str,
    upload_key: &str,
) -> HttpResult<(UploadSession, PathBuf)> {
    let session = app
        .upload_session_if_valid(upload_key)
        .ok_or_else(|| {
            AppError(ApiError::gone(
                "upload_session_expired",
                "Upload session not found or expired",
            ))
        })?;
    if session.project_id != project_id {
        return Err(AppError(ApiError::forbidden(
            "upload_session_mismatch",
            "Upload session does not belong to this project",
        )));
    }
    let staging_dir = app.storage.layout().staging_dir(project_id);
    std::fs::create_dir_all(&staging_dir).map_err(StorageError::from)?;
    let path = staging_dir.join(format!("{upload_key}_{}", sanitize_filename(&session.filename)));
    Ok((session, path))
}

fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Stage 2 bookkeeping after the bytes landed: record the staged file in
/// the session and as a staged catalog row.
pub fn complete_upload(
    app: &App,
    project_id: &str,
    upload_key: &str,
    staged_path: &std::path::Path,
    size_bytes: i64,
    checksum_sha256: &str,
) -> HttpResult<FileUploadResponse> {
    if size_bytes > app.config.max_file_size_bytes {
        let _ = std::fs::remove_file(staged_path);
        app.uploads.lock().remove(upload_key);
        return Err(AppError(ApiError::new(
            ErrorKind::PayloadTooLarge,
            "file_too_large",
            format!(
                "File size exceeds maximum of {} bytes",
                app.config.max_file_size_bytes
            ),
        )));
    }

    let session = {
        let mut uploads = app.uploads.lock();
        let Some(session) = uploads.get_mut(upload_key) else {
            let _ = std::fs::remove_file(staged_path);
            return Err(AppError(ApiError::gone(
                "upload_session_expired",
                "Upload session not found or expired",
            )));
        };
        session.staged_path = Some(staged_path.to_path_buf());
        session.staged_size = Some(size_bytes);
        session.staged_checksum = Some(checksum_sha256.to_string());
        session.clone()
    };

    let relative = staged_path
        .strip_prefix(app.storage.layout().files_root())
        .map_err(|_| AppError(ApiError::internal("staged file escaped the files root")))?
        .to_string_lossy()
        .to_string();
    app.catalog().create_file_record(&FileRecord {
        id: upload_key.to_string(),
        project_id: project_id.to_string(),
        name: session.filename.clone(),
        path: relative,
        size_bytes,
        checksum_sha256: Some(checksum_sha256.to_string()),
        content_type: session.content_type.clone(),
        is_staged: true,
        created_at: now_rfc3339(),
        expires_at: Some(format_rfc3339(session.expires_at)),
        tags: session.tags.clone(),
    })?;

    Ok(FileUploadResponse {
        upload_key: upload_key.to_string(),
        size_bytes,
        checksum_sha256: checksum_sha256.to_string(),
    })
}

/// Stage 3: move the staged file into date-organized permanent storage
/// and finalize its catalog row.
pub fn register_file(
    app: &App,
    project_id: &str,
    request: &FileRegisterRequest,
) -> HttpResult<FileInfoResponse> {
    get_project_record(app, project_id)?;
    let session = app
        .upload_session_if_valid(&request.upload_key)
        .ok_or_else(|| {
            AppError(ApiError::gone(
                "upload_session_expired",
                "Upload session not found or expired",
            ))
        })?;
    let staged_path = session.staged_path.clone().ok_or_else(|| {
        AppError(ApiError::invalid_argument(
            "upload_incomplete",
            "No file has been uploaded for this session",
        ))
    })?;

    let now = Utc::now();
    let permanent_dir = app.storage.layout().permanent_dir(project_id, now);
    std::fs::create_dir_all(&permanent_dir).map_err(StorageError::from)?;
    let file_name = sanitize_filename(&session.filename);
    let permanent_path = permanent_dir.join(format!("{}_{file_name}", request.upload_key));
    std::fs::rename(&staged_path, &permanent_path).map_err(StorageError::from)?;

    let relative = permanent_path
        .strip_prefix(app.storage.layout().files_root())
        .map_err(|_| AppError(ApiError::internal("permanent file escaped the files root")))?
        .to_string_lossy()
        .to_string();

    let mut tags = session.tags.clone();
    if let Some(extra) = &request.tags {
        tags.extend(extra.clone());
    }
    app.catalog()
        .finalize_file(&request.upload_key, &relative, &tags)?;
    app.uploads.lock().remove(&request.upload_key);

    log_operation(
        app,
        OperationEntry::new("register_file", "success")
            .project(project_id)
            .resource("file", &request.upload_key),
    );
    let record = get_file_record(app, project_id, &request.upload_key)?;
    Ok(record_to_response(&record))
}

pub fn list_files(
    app: &App,
    project_id: &str,
    is_staged: Option<bool>,
    limit: i64,
    offset: i64,
) -> HttpResult<FileListResponse> {
    get_project_record(app, project_id)?;
    let records = app.catalog().list_files(project_id, is_staged, limit, offset)?;
    let total = app.catalog().count_files(project_id)?;
    Ok(FileListResponse {
        files: records.iter().map(record_to_response).collect(),
        total,
    })
}

pub fn get_file(app: &App, project_id: &str, file_id: &str) -> HttpResult<FileInfoResponse> {
    let record = get_file_record(app, project_id, file_id)?;
    Ok(record_to_response(&record))
}

/// Absolute path for a download; the handler streams it from disk.
pub fn download_path(app: &App, project_id: &str, file_id: &str) -> HttpResult<(FileRecord, PathBuf)> {
    let record = get_file_record(app, project_id, file_id)?;
    let path = app.storage.layout().files_root().join(&record.path);
    if !path.is_file() {
        return Err(AppError(ApiError::not_found(
            "file_content_not_found",
            "File content not found on disk",
        )));
    }
    Ok((record, path))
}

pub fn delete_file(app: &App, project_id: &str, file_id: &str) -> HttpResult<()> {
    let record = get_file_record(app, project_id, file_id)?;
    let path = app.storage.layout().files_root().join(&record.path);
    if path.is_file() {
        std::fs::remove_file(&path).map_err(StorageError::from)?;
    }
    app.catalog().delete_file(file_id)?;
    log_operation(
        app,
        OperationEntry::new("delete_file", "success")
            .project(project_id)
            .resource("file", file_id),
    );
    Ok(())
}

// ============================================================================
// S3 surface helpers (bucket = project)
// ============================================================================

/// Resolve an S3 object key to a file record + path. Keys are relative
/// paths under the project's files directory.
pub fn s3_object_path(app: &App, project_id: &str, key: &str) -> HttpResult<PathBuf> {
    if key.contains("..") {
        return Err(AppError(ApiError::invalid_argument(
            "invalid_key",
            "Object keys may not contain '..'",
        )));
    }
    Ok(app.storage.layout().project_files_dir(project_id).join(key))
}

/// List objects under a project's files directory for ListObjectsV2.
pub fn s3_list_objects(
    app: &App,
    project_id: &str,
    prefix: &str,
) -> HttpResult<Vec<(String, i64, std::time::SystemTime)>> {
    let root = app.storage.layout().project_files_dir(project_id);
    let mut objects = Vec::new();
    if !root.is_dir() {
        return Ok(objects);
    }
    let mut stack = vec![root.clone()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir).map_err(StorageError::from)? {
            let entry = entry.map_err(StorageError::from)?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            let key = path
                .strip_prefix(&root)
                .map_err(|_| AppError(ApiError::internal("object escaped the project root")))?
                .to_string_lossy()
                .replace('\\', "/");
            if !key.starts_with(prefix) {
                continue;
            }
            let meta = entry.metadata().map_err(StorageError::from)?;
            let modified = meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            objects.push((key, meta.len() as i64, modified));
        }
    }
    objects.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(objects)
}

/// Register (or update) the catalog row for an object PUT through the S3
/// surface.
pub fn s3_register_object(
    app: &App,
    project_id: &str,
    key: &str,
    size_bytes: i64,
    _checksum_md5: &str,
) -> HttpResult<()> {
    let relative = format!("project_{project_id}/{key}");
    let name = key.rsplit('/').next().unwrap_or(key).to_string();
    if let Some(existing) = app.catalog().find_file_by_path(project_id, &relative)? {
        app.catalog().delete_file(&existing.id)?;
    }
    app.catalog().create_file_record(&FileRecord {
        id: Uuid::new_v4().to_string(),
        project_id: project_id.to_string(),
        name,
        path: relative,
        size_bytes,
        checksum_sha256: None,
        content_type: None,
        is_staged: key.starts_with("staging/"),
        created_at: now_rfc3339(),
        expires_at: None,
        tags: HashMap::from([("source".to_string(), "s3".to_string())]),
    })?;
    Ok(())
}
