//! Command service endpoint: one envelope in, one envelope out.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use cormorant_protocol::DriverRequest;

use crate::error::HttpResult;
use crate::state::{blocking, App};

pub async fn execute(
    State(app): State<Arc<App>>,
    Json(request): Json<DriverRequest>,
) -> HttpResult<impl IntoResponse> {
    let (kind, response) = blocking(move || Ok(app.dispatcher.execute(&app, request))).await?;

    let status = kind
        .map(|kind| {
            StatusCode::from_u16(kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
        })
        .unwrap_or(StatusCode::OK);
    Ok((status, Json(response)))
}
