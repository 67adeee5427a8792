//! API key endpoints (project_admin scope).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use cormorant_protocol::http_types::{ApiKeyCreateRequest, KeyScope};
use cormorant_protocol::ApiError;
use serde::Deserialize;

use crate::auth::{self, Principal};
use crate::error::{AppError, HttpResult};
use crate::ops;
use crate::state::{blocking, App};

/// Key management requires the admin key or a project_admin key.
fn require_key_admin(app: &App, headers: &HeaderMap, project_id: &str) -> Result<(), AppError> {
    let principal = auth::require_project_access(app, headers, project_id, None, true)?;
    match principal {
        Principal::Admin => Ok(()),
        Principal::ApiKey { scope, .. } if scope == KeyScope::ProjectAdmin => Ok(()),
        Principal::ApiKey { .. } => Err(AppError(ApiError::forbidden(
            "project_admin_required",
            "API key management requires a project_admin key",
        ))),
    }
}

pub async fn create_api_key(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
    Json(request): Json<ApiKeyCreateRequest>,
) -> HttpResult<impl IntoResponse> {
    require_key_admin(&app, &headers, &project_id)?;
    let response =
        blocking(move || ops::api_keys::create_api_key(&app, &project_id, &request)).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListKeysQuery {
    #[serde(default)]
    pub include_revoked: bool,
}

pub async fn list_api_keys(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
    Query(query): Query<ListKeysQuery>,
) -> HttpResult<impl IntoResponse> {
    require_key_admin(&app, &headers, &project_id)?;
    let response = blocking(move || {
        ops::api_keys::list_api_keys(&app, &project_id, query.include_revoked)
    })
    .await?;
    Ok(Json(response))
}

pub async fn get_api_key(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((project_id, key_id)): Path<(String, String)>,
) -> HttpResult<impl IntoResponse> {
    require_key_admin(&app, &headers, &project_id)?;
    let response = blocking(move || ops::api_keys::get_api_key(&app, &project_id, &key_id)).await?;
    Ok(Json(response))
}

pub async fn revoke_api_key(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((project_id, key_id)): Path<(String, String)>,
) -> HttpResult<impl IntoResponse> {
    require_key_admin(&app, &headers, &project_id)?;
    let response =
        blocking(move || ops::api_keys::revoke_api_key(&app, &project_id, &key_id)).await?;
    Ok(Json(response))
}

pub async fn rotate_api_key(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((project_id, key_id)): Path<(String, String)>,
) -> HttpResult<impl IntoResponse> {
    require_key_admin(&app, &headers, &project_id)?;
    let response =
        blocking(move || ops::api_keys::rotate_api_key(&app, &project_id, &key_id)).await?;
    Ok((StatusCode::CREATED, Json(response)))
}
