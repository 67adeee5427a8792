//! Snapshot CRUD, restore, and hierarchical settings.
//!
//! All snapshot operations are restricted to main.

use cormorant_catalog::{settings_entity_id, OperationEntry, SnapshotFilter, SnapshotRecord};
use cormorant_protocol::http_types::{
    ColumnInfo, SnapshotCreateRequest, SnapshotDetailResponse, SnapshotListResponse,
    SnapshotResponse, SnapshotRestoreRequest, SnapshotRestoreResponse, SnapshotSettingsResponse,
    SnapshotType, RestoredLocation,
};
use cormorant_protocol::{ApiError, SnapshotConfigPatch};
use cormorant_storage::{resolve_snapshot_config, BranchContext};

use crate::error::{AppError, HttpResult};
use crate::ops::log_operation;
use crate::state::App;

fn record_to_response(record: &SnapshotRecord) -> SnapshotResponse {
    SnapshotResponse {
        id: record.id.clone(),
        project_id: record.project_id.clone(),
        bucket_name: record.bucket_name.clone(),
        table_name: record.table_name.clone(),
        snapshot_type: record.snapshot_type,
        row_count: record.row_count,
        size_bytes: record.size_bytes,
        created_at: record.created_at.clone(),
        expires_at: record.expires_at.clone(),
        description: record.description.clone(),
    }
}

fn record_to_detail(record: &SnapshotRecord) -> SnapshotDetailResponse {
    let schema_columns: Vec<ColumnInfo> = record
        .schema_json
        .get("columns")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    let primary_key: Vec<String> = record
        .schema_json
        .get("primary_key")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    SnapshotDetailResponse {
        snapshot: record_to_response(record),
        schema_columns,
        primary_key,
    }
}

fn get_snapshot_record(app: &App, project_id: &str, snapshot_id: &str) -> HttpResult<SnapshotRecord> {
    app.catalog()
        .get_snapshot(project_id, snapshot_id)?
        .ok_or_else(|| {
            AppError(
                ApiError::not_found(
                    "snapshot_not_found",
                    format!("Snapshot {snapshot_id} not found"),
                )
                .with_details(serde_json::json!({
                    "project_id": project_id,
                    "snapshot_id": snapshot_id,
                })),
            )
        })
}

pub fn create_snapshot(
    app: &App,
    ctx: &BranchContext,
    request: &SnapshotCreateRequest,
) -> HttpResult<SnapshotResponse> {
    ctx.require_main("create snapshots")?;
    let record = app.storage.create_snapshot(
        &ctx.project_id,
        &request.bucket,
        &request.table,
        SnapshotType::Manual,
        request.description.as_deref(),
    )?;
    log_operation(
        app,
        OperationEntry::new("create_snapshot", "success")
            .project(&ctx.project_id)
            .resource("snapshot", &record.id),
    );
    Ok(record_to_response(&record))
}

#[allow(clippy::too_many_arguments)]
pub fn list_snapshots(
    app: &App,
    ctx: &BranchContext,
    bucket: Option<String>,
    table: Option<String>,
    snapshot_type: Option<String>,
    limit: i64,
    offset: i64,
) -> HttpResult<SnapshotListResponse> {
    ctx.require_main("list snapshots")?;
    if !(1..=1000).contains(&limit) {
        return Err(AppError(ApiError::invalid_argument(
            "invalid_limit",
            format!("Snapshot list limit must be between 1 and 1000, got {limit}"),
        )));
    }
    let snapshot_type = match snapshot_type {
        None => None,
        Some(raw) => Some(SnapshotType::parse(&raw).ok_or_else(|| {
            AppError(ApiError::invalid_argument(
                "invalid_snapshot_type",
                format!("Unknown snapshot type '{raw}'"),
            ))
        })?),
    };
    let filter = SnapshotFilter {
        bucket_name: bucket,
        table_name: table,
        snapshot_type,
    };
    let records = app
        .catalog()
        .list_snapshots(&ctx.project_id, &filter, limit, offset)?;
    let total = app.catalog().count_snapshots(&ctx.project_id, &filter)?;
    Ok(SnapshotListResponse {
        snapshots: records.iter().map(record_to_response).collect(),
        total,
    })
}

pub fn get_snapshot(
    app: &App,
    ctx: &BranchContext,
    snapshot_id: &str,
) -> HttpResult<SnapshotDetailResponse> {
    ctx.require_main("get snapshots")?;
    let record = get_snapshot_record(app, &ctx.project_id, snapshot_id)?;
    Ok(record_to_detail(&record))
}

pub fn delete_snapshot(app: &App, ctx: &BranchContext, snapshot_id: &str) -> HttpResult<()> {
    ctx.require_main("delete snapshots")?;
    get_snapshot_record(app, &ctx.project_id, snapshot_id)?;
    app.storage.delete_snapshot(&ctx.project_id, snapshot_id)?;
    log_operation(
        app,
        OperationEntry::new("delete_snapshot", "success")
            .project(&ctx.project_id)
            .resource("snapshot", snapshot_id),
    );
    Ok(())
}

pub fn restore_snapshot(
    app: &App,
    ctx: &BranchContext,
    snapshot_id: &str,
    request: &SnapshotRestoreRequest,
) -> HttpResult<SnapshotRestoreResponse> {
    ctx.require_main("restore snapshots")?;
    get_snapshot_record(app, &ctx.project_id, snapshot_id)?;
    let (bucket, table, row_count) = app.storage.restore_snapshot(
        &ctx.project_id,
        snapshot_id,
        request.target_bucket.as_deref(),
        request.target_table.as_deref(),
    )?;
    log_operation(
        app,
        OperationEntry::new("restore_snapshot", "success")
            .project(&ctx.project_id)
            .resource("snapshot", snapshot_id)
            .details(serde_json::json!({
                "target_bucket": bucket,
                "target_table": table,
                "row_count": row_count,
            })),
    );
    Ok(SnapshotRestoreResponse {
        restored_to: RestoredLocation { bucket, table },
        row_count,
    })
}

// ============================================================================
// Hierarchical settings
// ============================================================================

/// Effective config for a scope plus the local overlay stored there.
pub fn get_snapshot_settings(
    app: &App,
    project_id: &str,
    bucket: Option<&str>,
    table: Option<&str>,
) -> HttpResult<SnapshotSettingsResponse> {
    let (config, sources) =
        resolve_snapshot_config(app.catalog(), project_id, bucket, table)?;
    let (entity_type, entity_id) = settings_entity_id(project_id, bucket, table);
    let local = app.catalog().get_snapshot_settings(entity_type, &entity_id)?;
    Ok(SnapshotSettingsResponse {
        effective: config,
        sources: sources
            .into_iter()
            .map(|(key, source)| (key, source.as_str().to_string()))
            .collect(),
        local,
    })
}

/// Store a scope's delta. Only the patch is stored, never the merged
/// value, so inheritance stays observable.
pub fn put_snapshot_settings(
    app: &App,
    project_id: &str,
    bucket: Option<&str>,
    table: Option<&str>,
    patch: &SnapshotConfigPatch,
) -> HttpResult<SnapshotSettingsResponse> {
    patch
        .validate()
        .map_err(|msg| AppError(ApiError::invalid_argument("invalid_settings", msg)))?;
    let (entity_type, entity_id) = settings_entity_id(project_id, bucket, table);
    app.catalog()
        .put_snapshot_settings(entity_type, &entity_id, patch)?;
    log_operation(
        app,
        OperationEntry::new("put_snapshot_settings", "success")
            .project(project_id)
            .resource("snapshot_settings", &entity_id),
    );
    get_snapshot_settings(app, project_id, bucket, table)
}

pub fn delete_snapshot_settings(
    app: &App,
    project_id: &str,
    bucket: Option<&str>,
    table: Option<&str>,
) -> HttpResult<SnapshotSettingsResponse> {
    let (entity_type, entity_id) = settings_entity_id(project_id, bucket, table);
    app.catalog()
        .delete_snapshot_settings(entity_type, &entity_id)?;
    get_snapshot_settings(app, project_id, bucket, table)
}
