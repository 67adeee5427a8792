//! API key lifecycle: create, list, get, revoke, rotate.

use chrono::{Duration, Utc};
use cormorant_catalog::{format_rfc3339, ApiKeyRecord, OperationEntry};
use cormorant_protocol::http_types::{
    ApiKeyCreateRequest, ApiKeyCreatedResponse, ApiKeyListResponse, ApiKeyResponse, KeyScope,
};
use cormorant_protocol::ApiError;
use cormorant_security::{generate_branch_key, generate_project_key, hash_key, key_prefix, BranchKeyScope};
use uuid::Uuid;

use crate::error::{AppError, HttpResult};
use crate::ops::log_operation;
use crate::ops::projects::get_project_record;
use crate::state::App;

fn record_to_response(record: &ApiKeyRecord) -> ApiKeyResponse {
    ApiKeyResponse {
        id: record.id.clone(),
        project_id: record.project_id.clone(),
        scope: record.scope,
        branch_id: record.branch_id.clone(),
        key_prefix: record.key_prefix.clone(),
        description: record.description.clone(),
        created_at: record.created_at.clone(),
        expires_at: record.expires_at.clone(),
        revoked: record.revoked,
    }
}

fn get_key_record(app: &App, project_id: &str, key_id: &str) -> HttpResult<ApiKeyRecord> {
    app.catalog()
        .get_api_key(project_id, key_id)?
        .ok_or_else(|| {
            AppError(ApiError::not_found(
                "api_key_not_found",
                format!("API key {key_id} not found"),
            ))
        })
}

fn mint_key(project_id: &str, scope: KeyScope, branch_id: Option<&str>) -> HttpResult<String> {
    Ok(match scope {
        KeyScope::ProjectAdmin => generate_project_key(project_id),
        KeyScope::BranchAdmin | KeyScope::BranchRead => {
            let branch_id = branch_id.ok_or_else(|| {
                AppError(ApiError::invalid_argument(
                    "branch_required",
                    "Branch-scoped keys require a branch_id",
                ))
            })?;
            let branch_scope = if scope == KeyScope::BranchAdmin {
                BranchKeyScope::Admin
            } else {
                BranchKeyScope::Read
            };
            generate_branch_key(project_id, branch_id, branch_scope)
        }
    })
}

pub fn create_api_key(
    app: &App,
    project_id: &str,
    request: &ApiKeyCreateRequest,
) -> HttpResult<ApiKeyCreatedResponse> {
    get_project_record(app, project_id)?;

    if matches!(request.scope, KeyScope::BranchAdmin | KeyScope::BranchRead) {
        let branch_id = request.branch_id.as_deref().ok_or_else(|| {
            AppError(ApiError::invalid_argument(
                "branch_required",
                "Branch-scoped keys require a branch_id",
            ))
        })?;
        if app.catalog().get_branch(project_id, branch_id)?.is_none() {
            return Err(AppError(ApiError::not_found(
                "branch_not_found",
                format!("Branch {branch_id} not found in project {project_id}"),
            )));
        }
    }

    let expires_at = match request.expires_in_days {
        None => None,
        Some(days) if days > 0 => Some(format_rfc3339(Utc::now() + Duration::days(days))),
        Some(days) => {
            return Err(AppError(ApiError::invalid_argument(
                "invalid_expiry",
                format!("expires_in_days must be positive, got {days}"),
            )))
        }
    };

    let api_key = mint_key(project_id, request.scope, request.branch_id.as_deref())?;
    let key_id = format!("key_{}", Uuid::new_v4().simple());
    let record = app.catalog().create_api_key(
        &key_id,
        project_id,
        request.scope,
        request.branch_id.as_deref(),
        &hash_key(&api_key),
        &key_prefix(&api_key),
        request.description.as_deref(),
        expires_at.as_deref(),
    )?;

    log_operation(
        app,
        OperationEntry::new("create_api_key", "success")
            .project(project_id)
            .resource("api_key", &key_id)
            .details(serde_json::json!({"scope": request.scope.as_str()})),
    );
    Ok(ApiKeyCreatedResponse {
        info: record_to_response(&record),
        api_key,
    })
}

pub fn list_api_keys(
    app: &App,
    project_id: &str,
    include_revoked: bool,
) -> HttpResult<ApiKeyListResponse> {
    get_project_record(app, project_id)?;
    let records = app.catalog().list_api_keys(project_id, include_revoked)?;
    let total = records.len() as i64;
    Ok(ApiKeyListResponse {
        api_keys: records.iter().map(record_to_response).collect(),
        total,
    })
}

pub fn get_api_key(app: &App, project_id: &str, key_id: &str) -> HttpResult<ApiKeyResponse> {
    let record = get_key_record(app, project_id, key_id)?;
    Ok(record_to_response(&record))
}

/// Soft-revoke. The catalog refuses to revoke the last active
/// project-admin key.
pub fn revoke_api_key(app: &App, project_id: &str, key_id: &str) -> HttpResult<ApiKeyResponse> {
    get_key_record(app, project_id, key_id)?;
    let record = app.catalog().revoke_api_key(project_id, key_id)?;
    log_operation(
        app,
        OperationEntry::new("revoke_api_key", "success")
            .project(project_id)
            .resource("api_key", key_id),
    );
    Ok(record_to_response(&record))
}

/// Rotate: create a replacement with the same scope and branch, the
/// description suffixed " (rotated)", and the remaining TTL inherited;
/// then revoke the original.
pub fn rotate_api_key(
    app: &App,
    project_id: &str,
    key_id: &str,
) -> HttpResult<ApiKeyCreatedResponse> {
    let record = get_key_record(app, project_id, key_id)?;
    if record.revoked {
        return Err(AppError(ApiError::conflict(
            "key_revoked",
            "Cannot rotate a revoked key",
        )));
    }

    let expires_at = match cormorant_catalog::Catalog::key_remaining_ttl_seconds(&record)? {
        None => None,
        Some(remaining) => Some(format_rfc3339(Utc::now() + Duration::seconds(remaining))),
    };
    let description = match &record.description {
        Some(description) => format!("{description} (rotated)"),
        None => "(rotated)".to_string(),
    };

    let api_key = mint_key(project_id, record.scope, record.branch_id.as_deref())?;
    let new_id = format!("key_{}", Uuid::new_v4().simple());
    let new_record = app.catalog().create_api_key(
        &new_id,
        project_id,
        record.scope,
        record.branch_id.as_deref(),
        &hash_key(&api_key),
        &key_prefix(&api_key),
        Some(&description),
        expires_at.as_deref(),
    )?;
    // The replacement is active, so revoking the original can never trip
    // the last-admin guard.
    app.catalog().revoke_api_key(project_id, key_id)?;

    log_operation(
        app,
        OperationEntry::new("rotate_api_key", "success")
            .project(project_id)
            .resource("api_key", key_id)
            .details(serde_json::json!({"replacement": new_id})),
    );
    Ok(ApiKeyCreatedResponse {
        info: record_to_response(&new_record),
        api_key,
    })
}
