//! Project and bucket operations.

use cormorant_catalog::{OperationEntry, ProjectRecord};
use cormorant_protocol::http_types::{
    BucketListResponse, BucketResponse, KeyScope, ProjectCreatedResponse, ProjectListResponse,
    ProjectResponse, ProjectStatsResponse, ProjectUpdateRequest,
};
use cormorant_protocol::ApiError;
use cormorant_security::{generate_project_key, hash_key, key_prefix};
use cormorant_storage::BranchContext;
use uuid::Uuid;

use crate::error::{AppError, HttpResult};
use crate::ops::log_operation;
use crate::state::App;

pub(crate) fn project_to_response(record: &ProjectRecord) -> ProjectResponse {
    ProjectResponse {
        id: record.id.clone(),
        name: record.name.clone(),
        status: record.status.clone(),
        bucket_count: record.bucket_count,
        table_count: record.table_count,
        size_bytes: record.size_bytes,
        created_at: record.created_at.clone(),
        updated_at: record.updated_at.clone(),
    }
}

pub(crate) fn get_project_record(app: &App, project_id: &str) -> Result<ProjectRecord, AppError> {
    app.catalog()
        .get_project(project_id)?
        .ok_or_else(|| {
            AppError(
                ApiError::not_found(
                    "project_not_found",
                    format!("Project {project_id} not found"),
                )
                .with_details(serde_json::json!({"project_id": project_id})),
            )
        })
}

/// Create a project directory plus its initial admin key.
pub fn create_project(app: &App, project_id: &str, name: Option<&str>) -> HttpResult<ProjectCreatedResponse> {
    if project_id.is_empty()
        || !project_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(AppError(ApiError::invalid_argument(
            "invalid_project_id",
            "Project id must be non-empty and contain only alphanumerics, '_' or '-'",
        )));
    }
    let display_name = name.unwrap_or(project_id);
    app.storage.create_project(project_id, display_name)?;

    let api_key = generate_project_key(project_id);
    let key_id = format!("key_{}", Uuid::new_v4().simple());
    app.catalog().create_api_key(
        &key_id,
        project_id,
        KeyScope::ProjectAdmin,
        None,
        &hash_key(&api_key),
        &key_prefix(&api_key),
        Some("initial admin key"),
        None,
    )?;

    log_operation(
        app,
        OperationEntry::new("create_project", "success")
            .project(project_id)
            .resource("project", project_id),
    );

    let record = get_project_record(app, project_id)?;
    Ok(ProjectCreatedResponse {
        project: project_to_response(&record),
        api_key,
    })
}

pub fn get_project(app: &App, project_id: &str) -> HttpResult<ProjectResponse> {
    let record = get_project_record(app, project_id)?;
    Ok(project_to_response(&record))
}

pub fn list_projects(app: &App, limit: i64, offset: i64) -> HttpResult<ProjectListResponse> {
    let projects = app.catalog().list_projects(limit, offset)?;
    let total = app.catalog().count_projects()?;
    Ok(ProjectListResponse {
        projects: projects.iter().map(project_to_response).collect(),
        total,
    })
}

pub fn update_project(
    app: &App,
    project_id: &str,
    request: &ProjectUpdateRequest,
) -> HttpResult<ProjectResponse> {
    get_project_record(app, project_id)?;
    app.catalog()
        .update_project(project_id, request.name.as_deref(), request.settings.as_ref())?;
    log_operation(
        app,
        OperationEntry::new("update_project", "success")
            .project(project_id)
            .resource("project", project_id),
    );
    get_project(app, project_id)
}

pub fn delete_project(app: &App, project_id: &str) -> HttpResult<()> {
    get_project_record(app, project_id)?;
    app.storage.drop_project(project_id)?;
    log_operation(
        app,
        OperationEntry::new("delete_project", "success")
            .project(project_id)
            .resource("project", project_id),
    );
    Ok(())
}

pub fn project_stats(app: &App, project_id: &str) -> HttpResult<ProjectStatsResponse> {
    get_project_record(app, project_id)?;
    let stats = app.storage.project_stats_from_disk(project_id)?;
    Ok(ProjectStatsResponse {
        id: project_id.to_string(),
        bucket_count: stats.bucket_count,
        table_count: stats.table_count,
        size_bytes: stats.size_bytes,
        branch_count: app.catalog().count_branches(project_id)?,
        snapshot_count: app
            .catalog()
            .count_snapshots(project_id, &Default::default())?,
        file_count: app.catalog().count_files(project_id)?,
    })
}

// ============================================================================
// Buckets (shared across branches; never branched)
// ============================================================================

fn bucket_to_response(app: &App, project_id: &str, name: &str) -> HttpResult<BucketResponse> {
    let tables = app
        .storage
        .layout()
        .list_tables(project_id, name)
        .map_err(cormorant_storage::StorageError::from)?;
    let mut size_bytes = 0i64;
    for table in &tables {
        let path = app.storage.layout().table_path(project_id, name, table);
        size_bytes += std::fs::metadata(&path)
            .map_err(cormorant_storage::StorageError::from)?
            .len() as i64;
    }
    Ok(BucketResponse {
        name: name.to_string(),
        project_id: project_id.to_string(),
        table_count: tables.len() as i64,
        size_bytes,
    })
}

/// Dev branches may not create buckets.
pub fn create_bucket(app: &App, ctx: &BranchContext, name: &str) -> HttpResult<BucketResponse> {
    ctx.require_main("create buckets")?;
    if name.is_empty() || name.starts_with("branch_") {
        return Err(AppError(ApiError::invalid_argument(
            "invalid_bucket_name",
            "Bucket name must be non-empty and must not start with 'branch_'",
        )));
    }
    app.storage.create_bucket(&ctx.project_id, name)?;
    log_operation(
        app,
        OperationEntry::new("create_bucket", "success")
            .project(&ctx.project_id)
            .resource("bucket", name),
    );
    bucket_to_response(app, &ctx.project_id, name)
}

pub fn list_buckets(app: &App, ctx: &BranchContext) -> HttpResult<BucketListResponse> {
    if !app.storage.layout().project_exists(&ctx.project_id) {
        return Err(AppError(ApiError::not_found(
            "project_db_not_found",
            format!("Database directory for project {} not found", ctx.project_id),
        )));
    }
    let names = app
        .storage
        .layout()
        .list_buckets(&ctx.project_id)
        .map_err(cormorant_storage::StorageError::from)?;
    let mut buckets = Vec::with_capacity(names.len());
    for name in &names {
        buckets.push(bucket_to_response(app, &ctx.project_id, name)?);
    }
    let total = buckets.len() as i64;
    Ok(BucketListResponse { buckets, total })
}

/// Bucket deletion is restricted to main.
pub fn delete_bucket(app: &App, ctx: &BranchContext, name: &str, cascade: bool) -> HttpResult<()> {
    ctx.require_main("delete buckets")?;
    app.storage.delete_bucket(&ctx.project_id, name, cascade)?;
    log_operation(
        app,
        OperationEntry::new("delete_bucket", "success")
            .project(&ctx.project_id)
            .resource("bucket", name)
            .details(serde_json::json!({"cascade": cascade})),
    );
    Ok(())
}
