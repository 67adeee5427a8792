//! Dev branch operations.

use cormorant_catalog::{BranchRecord, OperationEntry};
use cormorant_protocol::http_types::{
    BranchCreateRequest, BranchDetailResponse, BranchListResponse, BranchResponse,
    BranchTableInfo, PullTableResponse,
};
use cormorant_protocol::ApiError;
use cormorant_storage::{new_branch_id, BranchContext};

use crate::error::{AppError, HttpResult};
use crate::ops::log_operation;
use crate::ops::projects::get_project_record;
use crate::state::App;

fn branch_to_response(app: &App, record: &BranchRecord) -> HttpResult<BranchResponse> {
    let (table_count, size_bytes) = app
        .storage
        .branch_stats(&record.project_id, &record.id)?;
    Ok(BranchResponse {
        id: record.id.clone(),
        project_id: record.project_id.clone(),
        name: record.name.clone(),
        created_at: record.created_at.clone(),
        description: record.description.clone(),
        table_count,
        size_bytes,
    })
}

fn get_branch_record(app: &App, project_id: &str, branch_id: &str) -> HttpResult<BranchRecord> {
    get_project_record(app, project_id)?;
    app.catalog()
        .get_branch(project_id, branch_id)?
        .ok_or_else(|| {
            AppError(
                ApiError::not_found(
                    "branch_not_found",
                    format!("Branch {branch_id} not found in project {project_id}"),
                )
                .with_details(serde_json::json!({
                    "project_id": project_id,
                    "branch_id": branch_id,
                })),
            )
        })
}

/// Create a dev branch. The branch starts empty: reads are a live view of
/// main until the first write copies a table over.
pub fn create_branch(
    app: &App,
    project_id: &str,
    request: &BranchCreateRequest,
) -> HttpResult<BranchResponse> {
    get_project_record(app, project_id)?;
    if request.name.is_empty() || request.name == "default" {
        return Err(AppError(ApiError::invalid_argument(
            "invalid_branch_name",
            "Branch name must be non-empty and must not be 'default'",
        )));
    }

    let branch_id = new_branch_id();
    app.storage.create_branch_dir(project_id, &branch_id)?;
    let record = match app.catalog().create_branch(
        &branch_id,
        project_id,
        &request.name,
        request.description.as_deref(),
    ) {
        Ok(record) => record,
        Err(err) => {
            let _ = std::fs::remove_dir_all(app.storage.layout().branch_dir(project_id, &branch_id));
            return Err(err.into());
        }
    };

    log_operation(
        app,
        OperationEntry::new("create_branch", "success")
            .project(project_id)
            .resource("branch", &branch_id)
            .details(serde_json::json!({"name": request.name})),
    );
    branch_to_response(app, &record)
}

pub fn list_branches(
    app: &App,
    project_id: &str,
    limit: i64,
    offset: i64,
) -> HttpResult<BranchListResponse> {
    get_project_record(app, project_id)?;
    let records = app.catalog().list_branches(project_id, limit, offset)?;
    let mut branches = Vec::with_capacity(records.len());
    for record in &records {
        branches.push(branch_to_response(app, record)?);
    }
    let count = branches.len() as i64;
    Ok(BranchListResponse { branches, count })
}

pub fn get_branch(app: &App, project_id: &str, branch_id: &str) -> HttpResult<BranchDetailResponse> {
    let record = get_branch_record(app, project_id, branch_id)?;
    let copied_tables = app
        .catalog()
        .list_branch_tables(branch_id)?
        .into_iter()
        .map(|t| BranchTableInfo {
            bucket_name: t.bucket_name,
            table_name: t.table_name,
            copied_at: t.copied_at,
        })
        .collect();
    Ok(BranchDetailResponse {
        branch: branch_to_response(app, &record)?,
        copied_tables,
    })
}

/// Delete a branch: its directory and ledger rows. Main tables are never
/// touched.
pub fn delete_branch(app: &App, project_id: &str, branch_id: &str) -> HttpResult<()> {
    let record = get_branch_record(app, project_id, branch_id)?;
    let copied = app.catalog().list_branch_tables(branch_id)?.len();
    app.storage.delete_branch_storage(project_id, branch_id)?;
    log_operation(
        app,
        OperationEntry::new("delete_branch", "success")
            .project(project_id)
            .resource("branch", branch_id)
            .details(serde_json::json!({"name": record.name, "tables_deleted": copied})),
    );
    Ok(())
}

/// Pull a table from main: discard the branch copy and restore the live
/// view. Idempotent.
pub fn pull_table(
    app: &App,
    project_id: &str,
    branch_id: &str,
    bucket: &str,
    table: &str,
) -> HttpResult<PullTableResponse> {
    get_branch_record(app, project_id, branch_id)?;
    if !app.storage.layout().table_exists(project_id, bucket, table) {
        return Err(AppError(ApiError::not_found(
            "table_not_found",
            format!("Table {bucket}.{table} not found in main project"),
        )));
    }

    let ctx = BranchContext {
        project_id: project_id.to_string(),
        branch_id: Some(branch_id.to_string()),
    };
    let was_local = app.storage.pull_table(&ctx, bucket, table)?;

    log_operation(
        app,
        OperationEntry::new("pull_table", "success")
            .project(project_id)
            .resource("branch_table", format!("{branch_id}/{bucket}/{table}"))
            .details(serde_json::json!({"was_local": was_local})),
    );
    Ok(PullTableResponse {
        bucket_name: bucket.to_string(),
        table_name: table.to_string(),
        was_local,
        message: if was_local {
            "Table now reads from main (live view)".to_string()
        } else {
            "Table was already reading from main".to_string()
        },
    })
}
