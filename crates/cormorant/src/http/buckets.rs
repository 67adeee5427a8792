//! Bucket endpoints. Buckets are shared across branches; creation and
//! deletion are restricted to the default branch.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use cormorant_protocol::http_types::BucketCreateRequest;
use serde::Deserialize;

use crate::auth;
use crate::error::HttpResult;
use crate::ops;
use crate::state::{blocking, App};

pub(crate) fn branch_for_auth(branch_id: &str) -> Option<&str> {
    // `default` is main: project-level keys apply, branch keys do not.
    if branch_id == cormorant_storage::DEFAULT_BRANCH_ID {
        None
    } else {
        Some(branch_id)
    }
}

pub async fn create_bucket(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((project_id, branch_id)): Path<(String, String)>,
    Json(request): Json<BucketCreateRequest>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, branch_for_auth(&branch_id), true)?;
    let response = blocking(move || {
        let ctx = app.storage.resolve_branch(&project_id, &branch_id)?;
        ops::projects::create_bucket(&app, &ctx, &request.name)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn list_buckets(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((project_id, branch_id)): Path<(String, String)>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, branch_for_auth(&branch_id), false)?;
    let response = blocking(move || {
        let ctx = app.storage.resolve_branch(&project_id, &branch_id)?;
        ops::projects::list_buckets(&app, &ctx)
    })
    .await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct DeleteBucketQuery {
    #[serde(default = "default_cascade")]
    pub cascade: bool,
}

fn default_cascade() -> bool {
    true
}

pub async fn delete_bucket(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((project_id, branch_id, bucket_name)): Path<(String, String, String)>,
    Query(query): Query<DeleteBucketQuery>,
) -> HttpResult<impl IntoResponse> {
    auth::require_project_access(&app, &headers, &project_id, branch_for_auth(&branch_id), true)?;
    blocking(move || {
        let ctx = app.storage.resolve_branch(&project_id, &branch_id)?;
        ops::projects::delete_bucket(&app, &ctx, &bucket_name, query.cascade)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}
