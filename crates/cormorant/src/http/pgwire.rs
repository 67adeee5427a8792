//! Wire-session bridge endpoints.
//!
//! Called by the co-resident wire-protocol server, not by tenants; the
//! surface lives under `/internal/` and is not protected by tenant API
//! keys.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use cormorant_protocol::http_types::{
    PgWireAuthRequest, PgWireSessionCreateRequest, PgWireSessionUpdateRequest,
};
use serde::Deserialize;

use crate::error::HttpResult;
use crate::ops;
use crate::state::{blocking, App};

pub async fn authenticate(
    State(app): State<Arc<App>>,
    Json(request): Json<PgWireAuthRequest>,
) -> HttpResult<impl IntoResponse> {
    let response = blocking(move || ops::workspaces::pgwire_authenticate(&app, &request)).await?;
    Ok(Json(response))
}

pub async fn create_session(
    State(app): State<Arc<App>>,
    Json(request): Json<PgWireSessionCreateRequest>,
) -> HttpResult<impl IntoResponse> {
    let response =
        blocking(move || ops::workspaces::pgwire_create_session(&app, &request)).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn get_session(
    State(app): State<Arc<App>>,
    Path(session_id): Path<String>,
) -> HttpResult<impl IntoResponse> {
    let response = blocking(move || ops::workspaces::pgwire_get_session(&app, &session_id)).await?;
    Ok(Json(response))
}

pub async fn update_activity(
    State(app): State<Arc<App>>,
    Path(session_id): Path<String>,
    Json(request): Json<PgWireSessionUpdateRequest>,
) -> HttpResult<impl IntoResponse> {
    let response = blocking(move || {
        ops::workspaces::pgwire_update_activity(&app, &session_id, request.increment_queries)
    })
    .await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct CloseQuery {
    #[serde(default = "default_reason")]
    pub reason: String,
}

fn default_reason() -> String {
    "disconnected".to_string()
}

pub async fn close_session(
    State(app): State<Arc<App>>,
    Path(session_id): Path<String>,
    Query(query): Query<CloseQuery>,
) -> HttpResult<impl IntoResponse> {
    blocking(move || ops::workspaces::pgwire_close_session(&app, &session_id, &query.reason))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

pub async fn list_sessions(
    State(app): State<Arc<App>>,
    Query(query): Query<ListQuery>,
) -> HttpResult<impl IntoResponse> {
    let response = blocking(move || {
        ops::workspaces::pgwire_list_sessions(
            &app,
            query.workspace_id.as_deref(),
            query.status.as_deref(),
        )
    })
    .await?;
    Ok(Json(response))
}

#[derive(Debug, Default, Deserialize)]
pub struct CleanupQuery {
    #[serde(default)]
    pub idle_timeout_seconds: Option<i64>,
}

pub async fn cleanup_stale(
    State(app): State<Arc<App>>,
    Query(query): Query<CleanupQuery>,
) -> HttpResult<impl IntoResponse> {
    let response =
        blocking(move || ops::workspaces::pgwire_cleanup_stale(&app, query.idle_timeout_seconds))
            .await?;
    Ok(Json(response))
}
