//! Dev branch endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use cormorant_protocol::http_types::BranchCreateRequest;

use crate::auth;
use crate::error::HttpResult;
use crate::http::backend::PageQuery;
use crate::ops;
use crate::state::{blocking, App};

pub async fn create_branch(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
    Json(request): Json<BranchCreateRequest>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, None, true)?;
    let response = blocking(move || ops::branches::create_branch(&app, &project_id, &request)).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn list_branches(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
    Query(page): Query<PageQuery>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, None, false)?;
    let response =
        blocking(move || ops::branches::list_branches(&app, &project_id, page.limit, page.offset))
            .await?;
    Ok(Json(response))
}

pub async fn get_branch(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((project_id, branch_id)): Path<(String, String)>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, Some(&branch_id), false)?;
    let response = blocking(move || ops::branches::get_branch(&app, &project_id, &branch_id)).await?;
    Ok(Json(response))
}

pub async fn delete_branch(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((project_id, branch_id)): Path<(String, String)>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, Some(&branch_id), true)?;
    blocking(move || ops::branches::delete_branch(&app, &project_id, &branch_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn pull_table(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((project_id, branch_id, bucket_name, table_name)): Path<(String, String, String, String)>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, Some(&branch_id), true)?;
    let response = blocking(move || {
        ops::branches::pull_table(&app, &project_id, &branch_id, &bucket_name, &table_name)
    })
    .await?;
    Ok(Json(response))
}
