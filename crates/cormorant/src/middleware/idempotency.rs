//! Idempotent request replay.
//!
//! Applies to mutating methods (POST, PUT, DELETE) carrying an
//! `X-Idempotency-Key` header. A hit replays the cached status and body
//! with `X-Idempotency-Replay: true`; reuse of a key with a different
//! method, endpoint, or body is a 409. Cache-write failures are logged
//! and never fail the request.
//!
//! Replays never re-enter the handler, so they never contend for table
//! locks.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use cormorant_protocol::ApiError;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::AppError;
use crate::metrics;
use crate::state::{blocking, App};

pub const IDEMPOTENCY_HEADER: &str = "x-idempotency-key";
pub const IDEMPOTENCY_REPLAY_HEADER: &str = "x-idempotency-replay";

fn is_mutating(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::DELETE)
}

fn body_hash(body: &[u8]) -> Option<String> {
    if body.is_empty() {
        return None;
    }
    let mut hasher = Sha256::new();
    hasher.update(body);
    Some(hex::encode(hasher.finalize()))
}

fn conflict_response(message: &str) -> Response {
    metrics::IDEMPOTENCY_CACHE_CONFLICTS.inc();
    AppError(ApiError::conflict("idempotency_conflict", message)).into_response()
}

fn replay_response(key: &str, status: i64, body: Option<String>) -> Response {
    metrics::IDEMPOTENCY_CACHE_HITS.inc();
    let status =
        StatusCode::from_u16(status as u16).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = match body {
        Some(body) if !body.is_empty() => {
            let mut response = Response::new(Body::from(body));
            response.headers_mut().insert(
                axum::http::header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            response
        }
        _ => Response::new(Body::empty()),
    };
    *response.status_mut() = status;
    if let Ok(value) = HeaderValue::from_str(key) {
        response
            .headers_mut()
            .insert(IDEMPOTENCY_HEADER, value);
    }
    response
        .headers_mut()
        .insert(IDEMPOTENCY_REPLAY_HEADER, HeaderValue::from_static("true"));
    response
}

pub async fn idempotency(
    State(app): State<Arc<App>>,
    req: Request,
    next: Next,
) -> Response {
    if !is_mutating(req.method()) {
        return next.run(req).await;
    }
    let Some(key) = req
        .headers()
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
    else {
        return next.run(req).await;
    };

    let method = req.method().to_string();
    let endpoint = req.uri().path().to_string();

    // Buffer the request body for hashing; it is restored below.
    let (parts, body) = req.into_parts();
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return AppError(ApiError::invalid_argument(
                "invalid_body",
                format!("Failed to read request body: {err}"),
            ))
            .into_response()
        }
    };
    let request_hash = body_hash(&bytes);

    let lookup = {
        let app = app.clone();
        let key = key.clone();
        blocking(move || Ok(app.catalog().get_idempotency_entry(&key)?)).await
    };
    let cached = match lookup {
        Ok(cached) => cached,
        Err(err) => return err.into_response(),
    };

    if let Some(cached) = cached {
        if cached.method != method {
            warn!(key = %key, cached = %cached.method, got = %method, "idempotency method mismatch");
            return conflict_response(&format!(
                "Idempotency key was used with {}, not {}",
                cached.method, method
            ));
        }
        if cached.endpoint != endpoint {
            warn!(key = %key, cached = %cached.endpoint, got = %endpoint, "idempotency endpoint mismatch");
            return conflict_response("Idempotency key was used with a different endpoint");
        }
        if let (Some(cached_hash), Some(current_hash)) = (&cached.request_hash, &request_hash) {
            if cached_hash != current_hash {
                warn!(key = %key, "idempotency body mismatch");
                return conflict_response("Idempotency key was used with a different request body");
            }
        }
        info!(key = %key, endpoint = %endpoint, "idempotency cache hit");
        return replay_response(&key, cached.response_status, cached.response_body);
    }

    metrics::IDEMPOTENCY_CACHE_MISSES.inc();
    let req = Request::from_parts(parts, Body::from(bytes));
    let response = next.run(req).await;

    // Buffer the response so it can be cached and returned.
    let (parts, body) = response.into_parts();
    let response_bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(key = %key, error = %err, "failed to buffer response for idempotency cache");
            return AppError(ApiError::internal("Failed to buffer response")).into_response();
        }
    };

    let status = parts.status.as_u16() as i64;
    let response_body = if response_bytes.is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(&response_bytes).to_string())
    };
    let store = {
        let app = app.clone();
        let key = key.clone();
        let method = method.clone();
        let endpoint = endpoint.clone();
        let request_hash = request_hash.clone();
        let response_body = response_body.clone();
        let ttl = app.config.idempotency_ttl_seconds;
        blocking(move || {
            Ok(app.catalog().store_idempotency_entry(
                &key,
                &method,
                &endpoint,
                request_hash.as_deref(),
                status,
                response_body.as_deref(),
                ttl,
            )?)
        })
        .await
    };
    if let Err(err) = store {
        // Caching is best-effort; the response still goes out.
        warn!(key = %key, error = ?err.0, "failed to store idempotency entry");
    }

    Response::from_parts(parts, Body::from(response_bytes))
}
