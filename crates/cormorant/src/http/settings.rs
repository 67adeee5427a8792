//! Snapshot settings endpoints at project, bucket, and table scope.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use cormorant_protocol::SnapshotConfigPatch;

use crate::auth;
use crate::error::HttpResult;
use crate::ops;
use crate::state::{blocking, App};

pub async fn get_project_settings(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, None, false)?;
    let response =
        blocking(move || ops::snapshots::get_snapshot_settings(&app, &project_id, None, None))
            .await?;
    Ok(Json(response))
}

pub async fn put_project_settings(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
    Json(patch): Json<SnapshotConfigPatch>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, None, true)?;
    let response = blocking(move || {
        ops::snapshots::put_snapshot_settings(&app, &project_id, None, None, &patch)
    })
    .await?;
    Ok(Json(response))
}

pub async fn delete_project_settings(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, None, true)?;
    let response =
        blocking(move || ops::snapshots::delete_snapshot_settings(&app, &project_id, None, None))
            .await?;
    Ok(Json(response))
}

pub async fn get_bucket_settings(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((project_id, bucket_name)): Path<(String, String)>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, None, false)?;
    let response = blocking(move || {
        ops::snapshots::get_snapshot_settings(&app, &project_id, Some(&bucket_name), None)
    })
    .await?;
    Ok(Json(response))
}

pub async fn put_bucket_settings(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((project_id, bucket_name)): Path<(String, String)>,
    Json(patch): Json<SnapshotConfigPatch>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, None, true)?;
    let response = blocking(move || {
        ops::snapshots::put_snapshot_settings(&app, &project_id, Some(&bucket_name), None, &patch)
    })
    .await?;
    Ok(Json(response))
}

pub async fn delete_bucket_settings(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((project_id, bucket_name)): Path<(String, String)>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, None, true)?;
    let response = blocking(move || {
        ops::snapshots::delete_snapshot_settings(&app, &project_id, Some(&bucket_name), None)
    })
    .await?;
    Ok(Json(response))
}

pub async fn get_table_settings(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((project_id, bucket_name, table_name)): Path<(String, String, String)>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, None, false)?;
    let response = blocking(move || {
        ops::snapshots::get_snapshot_settings(
            &app,
            &project_id,
            Some(&bucket_name),
            Some(&table_name),
        )
    })
    .await?;
    Ok(Json(response))
}

pub async fn put_table_settings(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((project_id, bucket_name, table_name)): Path<(String, String, String)>,
    Json(patch): Json<SnapshotConfigPatch>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, None, true)?;
    let response = blocking(move || {
        ops::snapshots::put_snapshot_settings(
            &app,
            &project_id,
            Some(&bucket_name),
            Some(&table_name),
            &patch,
        )
    })
    .await?;
    Ok(Json(response))
}

pub async fn delete_table_settings(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((project_id, bucket_name, table_name)): Path<(String, String, String)>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, None, true)?;
    let response = blocking(move || {
        ops::snapshots::delete_snapshot_settings(
            &app,
            &project_id,
            Some(&bucket_name),
            Some(&table_name),
        )
    })
    .await?;
    Ok(Json(response))
}
