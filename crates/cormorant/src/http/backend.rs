//! Backend administration and project endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use cormorant_protocol::http_types::{BackendInitResponse, ProjectCreateRequest, ProjectUpdateRequest};
use serde::Deserialize;

use crate::auth;
use crate::error::HttpResult;
use crate::ops;
use crate::state::{blocking, App};

pub async fn init_backend(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
) -> HttpResult<impl IntoResponse> {
    auth::require_admin(&app, &headers)?;
    blocking(move || {
        app.storage.init_backend()?;
        Ok(())
    })
    .await?;
    Ok(Json(BackendInitResponse {
        initialized: true,
        message: "Backend initialized".to_string(),
    }))
}

/// Declared a no-op.
pub async fn remove_backend(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
) -> HttpResult<impl IntoResponse> {
    auth::require_admin(&app, &headers)?;
    Ok(Json(BackendInitResponse {
        initialized: true,
        message: "Backend removal is a no-op".to_string(),
    }))
}

pub async fn create_project(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Json(request): Json<ProjectCreateRequest>,
) -> HttpResult<impl IntoResponse> {
    auth::require_admin(&app, &headers)?;
    let response = blocking(move || {
        ops::projects::create_project(&app, &request.id, request.name.as_deref())
    })
    .await?;
    Ok((StatusCode::CREATED, Json(response)))
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    100
}

pub async fn list_projects(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Query(page): Query<PageQuery>,
) -> HttpResult<impl IntoResponse> {
    auth::require_admin(&app, &headers)?;
    let response = blocking(move || ops::projects::list_projects(&app, page.limit, page.offset)).await?;
    Ok(Json(response))
}

pub async fn get_project(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, None, false)?;
    let response = blocking(move || ops::projects::get_project(&app, &project_id)).await?;
    Ok(Json(response))
}

pub async fn update_project(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
    Json(request): Json<ProjectUpdateRequest>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, None, true)?;
    let response =
        blocking(move || ops::projects::update_project(&app, &project_id, &request)).await?;
    Ok(Json(response))
}

pub async fn delete_project(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, None, true)?;
    blocking(move || ops::projects::delete_project(&app, &project_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn project_stats(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, None, false)?;
    let response = blocking(move || ops::projects::project_stats(&app, &project_id)).await?;
    Ok(Json(response))
}
