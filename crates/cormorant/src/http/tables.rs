//! Table endpoints: lifecycle, preview, schema evolution, import/export.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use cormorant_protocol::http_types::{
    ColumnInfo, ExportRequest, ImportFromFileRequest, TableCreateRequest,
};
use serde::Deserialize;

use crate::auth;
use crate::error::HttpResult;
use crate::http::buckets::branch_for_auth;
use crate::ops;
use crate::state::{blocking, App};

type TablePath = Path<(String, String, String, String)>;

pub async fn create_table(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((project_id, branch_id, bucket_name)): Path<(String, String, String)>,
    Json(request): Json<TableCreateRequest>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, branch_for_auth(&branch_id), true)?;
    let response = blocking(move || {
        let ctx = app.storage.resolve_branch(&project_id, &branch_id)?;
        ops::tables::create_table(&app, &ctx, &bucket_name, &request)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn list_tables(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((project_id, branch_id, bucket_name)): Path<(String, String, String)>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, branch_for_auth(&branch_id), false)?;
    let response = blocking(move || {
        let ctx = app.storage.resolve_branch(&project_id, &branch_id)?;
        ops::tables::list_tables(&app, &ctx, &bucket_name)
    })
    .await?;
    Ok(Json(response))
}

pub async fn get_table(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((project_id, branch_id, bucket_name, table_name)): TablePath,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, branch_for_auth(&branch_id), false)?;
    let response = blocking(move || {
        let ctx = app.storage.resolve_branch(&project_id, &branch_id)?;
        ops::tables::get_table(&app, &ctx, &bucket_name, &table_name)
    })
    .await?;
    Ok(Json(response))
}

pub async fn delete_table(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((project_id, branch_id, bucket_name, table_name)): TablePath,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, branch_for_auth(&branch_id), true)?;
    blocking(move || {
        let ctx = app.storage.resolve_branch(&project_id, &branch_id)?;
        ops::tables::delete_table(&app, &ctx, &bucket_name, &table_name)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
    #[serde(default = "default_preview_limit")]
    pub limit: i64,
}

fn default_preview_limit() -> i64 {
    1000
}

pub async fn preview_table(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((project_id, branch_id, bucket_name, table_name)): TablePath,
    Query(query): Query<PreviewQuery>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, branch_for_auth(&branch_id), false)?;
    let response = blocking(move || {
        let ctx = app.storage.resolve_branch(&project_id, &branch_id)?;
        ops::tables::preview_table(&app, &ctx, &bucket_name, &table_name, query.limit)
    })
    .await?;
    Ok(Json(response))
}

// ============================================================================
// Schema evolution
// ============================================================================

pub async fn add_column(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((project_id, branch_id, bucket_name, table_name)): TablePath,
    Json(column): Json<ColumnInfo>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, branch_for_auth(&branch_id), true)?;
    let response = blocking(move || {
        let ctx = app.storage.resolve_branch(&project_id, &branch_id)?;
        ops::tables::add_column(&app, &ctx, &bucket_name, &table_name, &column)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(response)))
}

#[derive(Debug, Deserialize)]
pub struct AlterColumnRequest {
    pub new_type: String,
}

pub async fn alter_column(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((project_id, branch_id, bucket_name, table_name, column_name)): Path<(
        String,
        String,
        String,
        String,
        String,
    )>,
    Json(request): Json<AlterColumnRequest>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, branch_for_auth(&branch_id), true)?;
    let response = blocking(move || {
        let ctx = app.storage.resolve_branch(&project_id, &branch_id)?;
        ops::tables::alter_column(
            &app,
            &ctx,
            &bucket_name,
            &table_name,
            &column_name,
            &request.new_type,
        )
    })
    .await?;
    Ok(Json(response))
}

pub async fn drop_column(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((project_id, branch_id, bucket_name, table_name, column_name)): Path<(
        String,
        String,
        String,
        String,
        String,
    )>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, branch_for_auth(&branch_id), true)?;
    let response = blocking(move || {
        let ctx = app.storage.resolve_branch(&project_id, &branch_id)?;
        ops::tables::drop_column(&app, &ctx, &bucket_name, &table_name, &column_name)
    })
    .await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct PrimaryKeyRequest {
    pub columns: Vec<String>,
}

pub async fn add_primary_key(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((project_id, branch_id, bucket_name, table_name)): TablePath,
    Json(request): Json<PrimaryKeyRequest>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, branch_for_auth(&branch_id), true)?;
    let response = blocking(move || {
        let ctx = app.storage.resolve_branch(&project_id, &branch_id)?;
        ops::tables::add_primary_key(&app, &ctx, &bucket_name, &table_name, &request.columns)
    })
    .await?;
    Ok(Json(response))
}

pub async fn drop_primary_key(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((project_id, branch_id, bucket_name, table_name)): TablePath,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, branch_for_auth(&branch_id), true)?;
    let response = blocking(move || {
        let ctx = app.storage.resolve_branch(&project_id, &branch_id)?;
        ops::tables::drop_primary_key(&app, &ctx, &bucket_name, &table_name)
    })
    .await?;
    Ok(Json(response))
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteRowsRequest {
    #[serde(default)]
    pub where_filter: Option<String>,
}

pub async fn delete_rows(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((project_id, branch_id, bucket_name, table_name)): TablePath,
    Json(request): Json<DeleteRowsRequest>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, branch_for_auth(&branch_id), true)?;
    let response = blocking(move || {
        let ctx = app.storage.resolve_branch(&project_id, &branch_id)?;
        ops::tables::delete_rows(
            &app,
            &ctx,
            &bucket_name,
            &table_name,
            request.where_filter.as_deref(),
        )
    })
    .await?;
    Ok(Json(response))
}

pub async fn truncate_table(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((project_id, branch_id, bucket_name, table_name)): TablePath,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, branch_for_auth(&branch_id), true)?;
    let response = blocking(move || {
        let ctx = app.storage.resolve_branch(&project_id, &branch_id)?;
        ops::tables::truncate_table(&app, &ctx, &bucket_name, &table_name)
    })
    .await?;
    Ok(Json(response))
}

// ============================================================================
// Import / export
// ============================================================================

pub async fn import_from_file(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((project_id, branch_id, bucket_name, table_name)): TablePath,
    Json(request): Json<ImportFromFileRequest>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, branch_for_auth(&branch_id), true)?;
    let response = blocking(move || {
        let ctx = app.storage.resolve_branch(&project_id, &branch_id)?;
        ops::tables::import_from_file(&app, &ctx, &bucket_name, &table_name, &request)
    })
    .await?;
    Ok(Json(response))
}

pub async fn export_to_file(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((project_id, branch_id, bucket_name, table_name)): TablePath,
    Json(request): Json<ExportRequest>,
) -> HttpResult<impl IntoResponse> {
    // Export is a read; read-only keys may run it.
    auth::require_project_access(&app, &headers, &project_id, branch_for_auth(&branch_id), false)?;
    let response = blocking(move || {
        let ctx = app.storage.resolve_branch(&project_id, &branch_id)?;
        ops::tables::export_to_file(&app, &ctx, &bucket_name, &table_name, &request)
    })
    .await?;
    Ok(Json(response))
}
