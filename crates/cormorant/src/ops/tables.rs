//! Table operations: lifecycle, preview, import/export, schema changes.
//!
//! Pre-destructive auto snapshots fire on main only (snapshots are
//! main-only); branch writes materialize a copy first, so main data is
//! never at risk from a branch.

use cormorant_catalog::OperationEntry;
use cormorant_protocol::http_types::{
    ColumnInfo, DeleteRowsResponse, ExportRequest, ExportResponse, ImportFromFileRequest,
    ImportResponse, TableCreateRequest, TableListResponse, TablePreviewResponse, TableResponse,
};
use cormorant_protocol::ApiError;
use cormorant_storage::{BranchContext, SnapshotTrigger, StorageError, TableInfo};

use crate::error::{AppError, HttpResult};
use crate::ops::log_operation;
use crate::state::App;

fn table_not_found(bucket: &str, table: &str) -> AppError {
    AppError(
        ApiError::not_found(
            "table_not_found",
            format!("Table {table} not found in bucket {bucket}"),
        )
        .with_details(serde_json::json!({"bucket_name": bucket, "table_name": table})),
    )
}

fn require_bucket(app: &App, ctx: &BranchContext, bucket: &str) -> HttpResult<()> {
    if !app.storage.layout().bucket_exists(&ctx.project_id, bucket) {
        return Err(AppError(
            ApiError::not_found(
                "bucket_not_found",
                format!("Bucket {bucket} not found in project {}", ctx.project_id),
            )
            .with_details(serde_json::json!({"bucket_name": bucket})),
        ));
    }
    Ok(())
}

fn info_to_response(info: TableInfo, source: Option<&'static str>) -> TableResponse {
    TableResponse {
        name: info.name,
        bucket: info.bucket,
        columns: info.columns,
        row_count: info.row_count,
        size_bytes: info.size_bytes,
        primary_key: info.primary_key,
        source: source.map(str::to_string),
    }
}

/// Create a table. On a dev branch the file is created branch-local and
/// tracked, so main is untouched.
pub fn create_table(
    app: &App,
    ctx: &BranchContext,
    bucket: &str,
    request: &TableCreateRequest,
) -> HttpResult<TableResponse> {
    require_bucket(app, ctx, bucket)?;
    match &ctx.branch_id {
        None => {
            let info = app.storage.create_table(
                &ctx.project_id,
                bucket,
                &request.name,
                &request.columns,
                &request.primary_key,
            )?;
            log_operation(
                app,
                OperationEntry::new("create_table", "success")
                    .project(&ctx.project_id)
                    .resource("table", format!("{bucket}.{}", request.name))
                    .details(serde_json::json!({
                        "column_count": request.columns.len(),
                        "primary_key": request.primary_key,
                    })),
            );
            Ok(info_to_response(info, Some("main")))
        }
        Some(branch_id) => {
            // Branch-local creation: file lives under the branch dir and
            // is tracked in the copy-on-write ledger.
            create_branch_local_table(app, ctx, branch_id, bucket, request)
        }
    }
}

fn create_branch_local_table(
    app: &App,
    ctx: &BranchContext,
    branch_id: &str,
    bucket: &str,
    request: &TableCreateRequest,
) -> HttpResult<TableResponse> {
    let layout = app.storage.layout();
    if layout.table_exists(&ctx.project_id, bucket, &request.name)
        || app
            .catalog()
            .is_table_in_branch(branch_id, bucket, &request.name)?
    {
        return Err(StorageError::conflict(format!(
            "Table {} already exists in bucket {bucket}",
            request.name
        ))
        .into());
    }
    for pk_col in &request.primary_key {
        if !request.columns.iter().any(|c| &c.name == pk_col) {
            return Err(StorageError::invalid_argument(format!(
                "Primary key column '{pk_col}' not found in columns"
            ))
            .into());
        }
    }

    let _lock = app
        .storage
        .locks()
        .acquire(&ctx.project_id, bucket, &request.name);
    let dir = layout.branch_bucket_dir(&ctx.project_id, branch_id, bucket);
    std::fs::create_dir_all(&dir).map_err(StorageError::from)?;
    let path = layout.branch_table_path(&ctx.project_id, branch_id, bucket, &request.name);

    let conn = cormorant_db::DbConnection::open(
        &path,
        cormorant_db::AccessMode::ReadWrite,
        app.storage.engine_options(),
    )
    .map_err(StorageError::from)?;
    conn.execute_batch(&cormorant_storage::build_create_table_sql(
        &request.columns,
        &request.primary_key,
    ))
    .map_err(StorageError::from)?;
    conn.checkpoint().map_err(StorageError::from)?;
    drop(conn);

    app.catalog()
        .add_table_to_branch(branch_id, bucket, &request.name)?;
    let info = app
        .storage
        .table_info_at(&path, bucket, &request.name)?;
    Ok(info_to_response(info, Some("branch")))
}

pub fn get_table(
    app: &App,
    ctx: &BranchContext,
    bucket: &str,
    table: &str,
) -> HttpResult<TableResponse> {
    require_bucket(app, ctx, bucket)?;
    let path = app.storage.read_table_path(ctx, bucket, table)?;
    if !path.is_file() {
        return Err(table_not_found(bucket, table));
    }
    let source = app.storage.table_source(ctx, bucket, table)?;
    let info = app.storage.table_info_at(&path, bucket, table)?;
    Ok(info_to_response(info, Some(source)))
}

pub fn list_tables(
    app: &App,
    ctx: &BranchContext,
    bucket: &str,
) -> HttpResult<TableListResponse> {
    require_bucket(app, ctx, bucket)?;
    let mut names = app
        .storage
        .layout()
        .list_tables(&ctx.project_id, bucket)
        .map_err(StorageError::from)?;
    // Branch-only tables (created on the branch, absent from main).
    if let Some(branch_id) = &ctx.branch_id {
        for record in app.catalog().list_branch_tables(branch_id)? {
            if record.bucket_name == bucket && !names.contains(&record.table_name) {
                names.push(record.table_name);
            }
        }
        names.sort();
    }

    let mut tables = Vec::with_capacity(names.len());
    for name in &names {
        tables.push(get_table(app, ctx, bucket, name)?);
    }
    let total = tables.len() as i64;
    Ok(TableListResponse { tables, total })
}

/// Drop a table. On main: auto snapshot (per policy) first, then file
/// removal. On a dev branch only branch-local copies can be dropped;
/// main tables are never touched from a branch.
pub fn delete_table(
    app: &App,
    ctx: &BranchContext,
    bucket: &str,
    table: &str,
) -> HttpResult<Option<String>> {
    require_bucket(app, ctx, bucket)?;
    match &ctx.branch_id {
        None => {
            if !app.storage.layout().table_exists(&ctx.project_id, bucket, table) {
                return Err(table_not_found(bucket, table));
            }
            let snapshot_id = app.storage.auto_snapshot_before(
                &ctx.project_id,
                bucket,
                table,
                SnapshotTrigger::DropTable,
            )?;
            app.storage.delete_table(&ctx.project_id, bucket, table)?;
            log_operation(
                app,
                OperationEntry::new("delete_table", "success")
                    .project(&ctx.project_id)
                    .resource("table", format!("{bucket}.{table}"))
                    .details(serde_json::json!({"auto_snapshot": snapshot_id})),
            );
            Ok(snapshot_id)
        }
        Some(branch_id) => {
            if !app.catalog().is_table_in_branch(branch_id, bucket, table)? {
                return Err(AppError(ApiError::invalid_argument(
                    "table_not_branch_local",
                    "Only branch-local tables can be dropped from a dev branch",
                )));
            }
            app.storage.pull_table(ctx, bucket, table)?;
            Ok(None)
        }
    }
}

pub fn preview_table(
    app: &App,
    ctx: &BranchContext,
    bucket: &str,
    table: &str,
    limit: i64,
) -> HttpResult<TablePreviewResponse> {
    require_bucket(app, ctx, bucket)?;
    let path = app.storage.read_table_path(ctx, bucket, table)?;
    if !path.is_file() {
        return Err(table_not_found(bucket, table));
    }
    let (columns, rows, total) = app.storage.preview_at(&path, limit)?;
    let preview_row_count = rows.len() as i64;
    Ok(TablePreviewResponse {
        columns,
        rows,
        total_row_count: total,
        preview_row_count,
    })
}

// ============================================================================
// Import / export
// ============================================================================

pub fn import_from_file(
    app: &App,
    ctx: &BranchContext,
    bucket: &str,
    table: &str,
    request: &ImportFromFileRequest,
) -> HttpResult<ImportResponse> {
    require_bucket(app, ctx, bucket)?;
    if !app.storage.read_table_path(ctx, bucket, table)?.is_file() {
        return Err(table_not_found(bucket, table));
    }

    let record = app
        .catalog()
        .get_file(&ctx.project_id, &request.file_id)?
        .ok_or_else(|| {
            AppError(ApiError::not_found(
                "file_not_found",
                format!(
                    "File {} not found in project {}",
                    request.file_id, ctx.project_id
                ),
            ))
        })?;
    let file_path = app.storage.layout().files_root().join(&record.path);

    let outcome = app.storage.import_from_file(
        ctx,
        bucket,
        table,
        &file_path,
        request.format,
        request.csv_options.as_ref(),
        &request.import_options,
    )?;

    log_operation(
        app,
        OperationEntry::new("import_from_file", "success")
            .project(&ctx.project_id)
            .resource("table", format!("{bucket}.{table}"))
            .details(serde_json::json!({
                "file_id": request.file_id,
                "format": request.format.as_str(),
                "incremental": request.import_options.incremental,
                "imported_rows": outcome.imported_rows,
            })),
    );
    Ok(ImportResponse {
        imported_rows: outcome.imported_rows,
        table_rows_after: outcome.table_rows_after,
        table_size_bytes: outcome.table_size_bytes,
        warnings: outcome.warnings,
    })
}

pub fn export_to_file(
    app: &App,
    ctx: &BranchContext,
    bucket: &str,
    table: &str,
    request: &ExportRequest,
) -> HttpResult<ExportResponse> {
    require_bucket(app, ctx, bucket)?;
    let outcome = app.storage.export_to_file(ctx, bucket, table, request)?;

    // Register the output as a permanent file.
    let mut tags = std::collections::HashMap::new();
    tags.insert("type".to_string(), "export".to_string());
    tags.insert("table".to_string(), format!("{bucket}.{table}"));
    app.catalog().create_file_record(&cormorant_catalog::FileRecord {
        id: outcome.file_id.clone(),
        project_id: ctx.project_id.clone(),
        name: outcome.file_name.clone(),
        path: outcome.relative_path.clone(),
        size_bytes: outcome.file_size_bytes,
        checksum_sha256: None,
        content_type: Some(outcome.content_type.to_string()),
        is_staged: false,
        created_at: cormorant_catalog::now_rfc3339(),
        expires_at: None,
        tags,
    })?;

    log_operation(
        app,
        OperationEntry::new("export_to_file", "success")
            .project(&ctx.project_id)
            .resource("table", format!("{bucket}.{table}"))
            .details(serde_json::json!({
                "file_id": outcome.file_id,
                "format": request.format.as_str(),
                "rows_exported": outcome.rows_exported,
            })),
    );
    Ok(ExportResponse {
        file_id: outcome.file_id,
        file_path: outcome.relative_path,
        rows_exported: outcome.rows_exported,
        file_size_bytes: outcome.file_size_bytes,
    })
}

// ============================================================================
// Schema evolution
// ============================================================================

pub fn add_column(
    app: &App,
    ctx: &BranchContext,
    bucket: &str,
    table: &str,
    column: &ColumnInfo,
) -> HttpResult<TableResponse> {
    app.storage
        .add_column(ctx, bucket, table, &column.name, &column.column_type)?;
    log_operation(
        app,
        OperationEntry::new("add_column", "success")
            .project(&ctx.project_id)
            .resource("table", format!("{bucket}.{table}")),
    );
    get_table(app, ctx, bucket, table)
}

pub fn drop_column(
    app: &App,
    ctx: &BranchContext,
    bucket: &str,
    table: &str,
    column_name: &str,
) -> HttpResult<TableResponse> {
    if ctx.is_main() {
        app.storage.auto_snapshot_before(
            &ctx.project_id,
            bucket,
            table,
            SnapshotTrigger::DropColumn,
        )?;
    }
    app.storage.drop_column(ctx, bucket, table, column_name)?;
    log_operation(
        app,
        OperationEntry::new("drop_column", "success")
            .project(&ctx.project_id)
            .resource("table", format!("{bucket}.{table}")),
    );
    get_table(app, ctx, bucket, table)
}

pub fn alter_column(
    app: &App,
    ctx: &BranchContext,
    bucket: &str,
    table: &str,
    column_name: &str,
    new_type: &str,
) -> HttpResult<TableResponse> {
    app.storage
        .alter_column_type(ctx, bucket, table, column_name, new_type)?;
    log_operation(
        app,
        OperationEntry::new("alter_column", "success")
            .project(&ctx.project_id)
            .resource("table", format!("{bucket}.{table}")),
    );
    get_table(app, ctx, bucket, table)
}

pub fn add_primary_key(
    app: &App,
    ctx: &BranchContext,
    bucket: &str,
    table: &str,
    columns: &[String],
) -> HttpResult<TableResponse> {
    app.storage.add_primary_key(ctx, bucket, table, columns)?;
    get_table(app, ctx, bucket, table)
}

pub fn drop_primary_key(
    app: &App,
    ctx: &BranchContext,
    bucket: &str,
    table: &str,
) -> HttpResult<TableResponse> {
    app.storage.drop_primary_key(ctx, bucket, table)?;
    get_table(app, ctx, bucket, table)
}

/// Delete rows; an unfiltered delete consults the `delete_all_rows`
/// trigger first (main only).
pub fn delete_rows(
    app: &App,
    ctx: &BranchContext,
    bucket: &str,
    table: &str,
    filter: Option<&str>,
) -> HttpResult<DeleteRowsResponse> {
    let snapshot_id = if filter.is_none() && ctx.is_main() {
        app.storage.auto_snapshot_before(
            &ctx.project_id,
            bucket,
            table,
            SnapshotTrigger::DeleteAllRows,
        )?
    } else {
        None
    };

    let deleted_rows = app.storage.delete_rows(ctx, bucket, table, filter)?;
    let info = app.storage.table_info_at(
        &app.storage.read_table_path(ctx, bucket, table)?,
        bucket,
        table,
    )?;
    log_operation(
        app,
        OperationEntry::new("delete_rows", "success")
            .project(&ctx.project_id)
            .resource("table", format!("{bucket}.{table}"))
            .details(serde_json::json!({
                "deleted_rows": deleted_rows,
                "filtered": filter.is_some(),
            })),
    );
    Ok(DeleteRowsResponse {
        deleted_rows,
        table_rows_after: info.row_count,
        snapshot_id,
    })
}

/// Truncate consults the `truncate_table` trigger (main only).
pub fn truncate_table(
    app: &App,
    ctx: &BranchContext,
    bucket: &str,
    table: &str,
) -> HttpResult<DeleteRowsResponse> {
    let snapshot_id = if ctx.is_main() {
        app.storage.auto_snapshot_before(
            &ctx.project_id,
            bucket,
            table,
            SnapshotTrigger::TruncateTable,
        )?
    } else {
        None
    };
    let deleted_rows = app.storage.truncate_table(ctx, bucket, table)?;
    Ok(DeleteRowsResponse {
        deleted_rows,
        table_rows_after: 0,
        snapshot_id,
    })
}
