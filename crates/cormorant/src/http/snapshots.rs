//! Snapshot endpoints (default branch only).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use cormorant_protocol::http_types::{SnapshotCreateRequest, SnapshotRestoreRequest};
use serde::Deserialize;

use crate::auth;
use crate::error::HttpResult;
use crate::http::buckets::branch_for_auth;
use crate::ops;
use crate::state::{blocking, App};

pub async fn create_snapshot(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((project_id, branch_id)): Path<(String, String)>,
    Json(request): Json<SnapshotCreateRequest>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, branch_for_auth(&branch_id), true)?;
    let response = blocking(move || {
        let ctx = app.storage.resolve_branch(&project_id, &branch_id)?;
        ops::snapshots::create_snapshot(&app, &ctx, &request)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(response)))
}

#[derive(Debug, Deserialize)]
pub struct SnapshotListQuery {
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default, rename = "type")]
    pub snapshot_type: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    100
}

pub async fn list_snapshots(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((project_id, branch_id)): Path<(String, String)>,
    Query(query): Query<SnapshotListQuery>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, branch_for_auth(&branch_id), false)?;
    let response = blocking(move || {
        let ctx = app.storage.resolve_branch(&project_id, &branch_id)?;
        ops::snapshots::list_snapshots(
            &app,
            &ctx,
            query.bucket,
            query.table,
            query.snapshot_type,
            query.limit,
            query.offset,
        )
    })
    .await?;
    Ok(Json(response))
}

pub async fn get_snapshot(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((project_id, branch_id, snapshot_id)): Path<(String, String, String)>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, branch_for_auth(&branch_id), false)?;
    let response = blocking(move || {
        let ctx = app.storage.resolve_branch(&project_id, &branch_id)?;
        ops::snapshots::get_snapshot(&app, &ctx, &snapshot_id)
    })
    .await?;
    Ok(Json(response))
}

pub async fn delete_snapshot(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((project_id, branch_id, snapshot_id)): Path<(String, String, String)>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, branch_for_auth(&branch_id), true)?;
    blocking(move || {
        let ctx = app.storage.resolve_branch(&project_id, &branch_id)?;
        ops::snapshots::delete_snapshot(&app, &ctx, &snapshot_id)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn restore_snapshot(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((project_id, branch_id, snapshot_id)): Path<(String, String, String)>,
    request: Option<Json<SnapshotRestoreRequest>>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, branch_for_auth(&branch_id), true)?;
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let response = blocking(move || {
        let ctx = app.storage.resolve_branch(&project_id, &branch_id)?;
        ops::snapshots::restore_snapshot(&app, &ctx, &snapshot_id, &request)
    })
    .await?;
    Ok(Json(response))
}
