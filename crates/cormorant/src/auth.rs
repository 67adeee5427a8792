//! Request authentication and authorization.
//!
//! Keys arrive as `Authorization: Bearer <key>` or `X-API-Key: <key>`.
//! The process-wide admin key passes everywhere and is the only
//! credential allowed to create projects. Branch-scoped keys operate only
//! within their declared branch; read-only keys only on read paths.

use axum::http::HeaderMap;
use cormorant_catalog::now_rfc3339;
use cormorant_protocol::http_types::KeyScope;
use cormorant_protocol::ApiError;
use cormorant_security::{hash_key, parse_key};

use crate::state::App;

/// What the caller is allowed to do, as resolved from its credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// The process-wide admin secret.
    Admin,
    /// A stored API key.
    ApiKey {
        project_id: String,
        scope: KeyScope,
        branch_id: Option<String>,
        key_id: String,
    },
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin)
    }
}

/// Pull the presented key out of the request headers.
pub fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        if let Some(token) = value.strip_prefix("Bearer ") {
            return Some(token.trim().to_string());
        }
    }
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Authenticate a presented key against the admin secret and the key
/// store.
pub fn authenticate(app: &App, presented: &str) -> Result<Principal, ApiError> {
    if constant_time_eq(presented, &app.config.admin_key) {
        return Ok(Principal::Admin);
    }

    // Reject garbled keys before touching the catalog.
    if parse_key(presented).is_none() {
        return Err(ApiError::unauthenticated("Invalid API key"));
    }

    let record = app
        .catalog()
        .find_api_key_by_hash(&hash_key(presented))
        .map_err(|err| ApiError::internal(err.to_string()))?
        .ok_or_else(|| ApiError::unauthenticated("Invalid API key"))?;

    if !record.is_active(&now_rfc3339()) {
        return Err(ApiError::unauthenticated("API key is revoked or expired"));
    }

    Ok(Principal::ApiKey {
        project_id: record.project_id,
        scope: record.scope,
        branch_id: record.branch_id,
        key_id: record.id,
    })
}

/// Authenticate from headers.
pub fn authenticate_headers(app: &App, headers: &HeaderMap) -> Result<Principal, ApiError> {
    let key = extract_api_key(headers)
        .ok_or_else(|| ApiError::unauthenticated("Missing API key"))?;
    authenticate(app, &key)
}

/// Require the process-wide admin key.
pub fn require_admin(app: &App, headers: &HeaderMap) -> Result<(), ApiError> {
    match authenticate_headers(app, headers)? {
        Principal::Admin => Ok(()),
        Principal::ApiKey { .. } => Err(ApiError::forbidden(
            "admin_required",
            "This operation requires the admin API key",
        )),
    }
}

/// Require access to a project, optionally within a branch, optionally
/// for a write.
///
/// Rules:
/// - the admin key passes everywhere;
/// - a key must belong to the path project;
/// - a branch-scoped key only operates within its declared branch, and is
///   rejected outright on endpoints that do not take a branch;
/// - a read-only key is rejected on write paths.
pub fn require_project_access(
    app: &App,
    headers: &HeaderMap,
    project_id: &str,
    branch_id: Option<&str>,
    write: bool,
) -> Result<Principal, ApiError> {
    let principal = authenticate_headers(app, headers)?;
    let Principal::ApiKey {
        project_id: key_project,
        scope,
        branch_id: key_branch,
        ..
    } = &principal
    else {
        return Ok(principal);
    };

    if key_project != project_id {
        return Err(ApiError::forbidden(
            "project_mismatch",
            format!("API key does not grant access to project {project_id}"),
        ));
    }

    match scope {
        KeyScope::ProjectAdmin => {}
        KeyScope::BranchAdmin | KeyScope::BranchRead => {
            let Some(request_branch) = branch_id else {
                return Err(ApiError::forbidden(
                    "branch_key_not_allowed",
                    "Branch-scoped keys cannot access project-level endpoints",
                ));
            };
            if key_branch.as_deref() != Some(request_branch) {
                return Err(ApiError::forbidden(
                    "branch_mismatch",
                    format!("API key does not grant access to branch {request_branch}"),
                ));
            }
            if *scope == KeyScope::BranchRead && write {
                return Err(ApiError::forbidden(
                    "read_only_key",
                    "Read-only keys cannot execute write operations",
                ));
            }
        }
    }
    Ok(principal)
}
