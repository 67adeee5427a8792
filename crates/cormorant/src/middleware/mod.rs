//! HTTP middleware: request ids, metrics, operation timeout, and
//! idempotent replay.

pub mod idempotency;
pub mod request_id;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{MatchedPath, Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::error::AppError;
use crate::metrics;
use crate::state::App;
use cormorant_protocol::ApiError;

/// Overall timeout for mutating operations. On expiry the handler
/// returns an internal error; the table lock is released when the
/// underlying blocking step reaches its next I/O boundary.
pub async fn operation_timeout(
    State(app): State<Arc<App>>,
    req: Request,
    next: Next,
) -> Response {
    let mutating = matches!(*req.method(), Method::POST | Method::PUT | Method::DELETE);
    if !mutating {
        return next.run(req).await;
    }
    let limit = Duration::from_secs(app.config.operation_timeout_seconds);
    let path = req.uri().path().to_string();
    match tokio::time::timeout(limit, next.run(req)).await {
        Ok(response) => response,
        Err(_) => {
            warn!(%path, timeout_seconds = limit.as_secs(), "operation timed out");
            AppError(ApiError::internal(format!(
                "Operation exceeded the {}s timeout",
                limit.as_secs()
            )))
            .into_response()
        }
    }
}

/// Record per-request counters, duration, and the in-flight gauge.
pub async fn http_metrics(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    // The matched route template keeps label cardinality bounded.
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    metrics::HTTP_IN_FLIGHT.inc();
    let start = Instant::now();
    let response = next.run(req).await;
    metrics::HTTP_IN_FLIGHT.dec();

    let status = response.status().as_u16().to_string();
    metrics::HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();
    metrics::HTTP_REQUEST_DURATION
        .with_label_values(&[&method, &path])
        .observe(start.elapsed().as_secs_f64());
    response
}
