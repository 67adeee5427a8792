//! Workspaces and the wire-session bridge.
//!
//! A workspace is a named credential plus its own engine database file;
//! the co-resident wire-protocol server authenticates against it, gets
//! back the list of attachable table files, and tracks its sessions here.

use chrono::{Duration, Utc};
use cormorant_catalog::{format_rfc3339, OperationEntry, SessionRecord, WorkspaceRecord};
use cormorant_protocol::http_types::{
    PgWireAuthRequest, PgWireAuthResponse, PgWireCleanupResponse, PgWireSessionCreateRequest,
    PgWireSessionInfo, PgWireTableInfo, WorkspaceCreatedResponse, WorkspacePasswordResetResponse,
};
use cormorant_protocol::{ApiError, ErrorKind};
use cormorant_security::hash_password;
use cormorant_storage::{BranchContext, StorageError};
use rand::RngCore;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, HttpResult};
use crate::ops::log_operation;
use crate::ops::projects::get_project_record;
use crate::state::App;

/// 16 bytes of OS randomness, hex-encoded; same secret strength as an
/// API key tail.
fn random_password() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn session_to_info(record: &SessionRecord) -> PgWireSessionInfo {
    PgWireSessionInfo {
        session_id: record.session_id.clone(),
        workspace_id: record.workspace_id.clone(),
        client_ip: record.client_ip.clone(),
        started_at: record.started_at.clone(),
        last_activity_at: record.last_activity_at.clone(),
        query_count: record.query_count,
        status: record.status.clone(),
    }
}

fn get_workspace(app: &App, workspace_id: &str) -> HttpResult<WorkspaceRecord> {
    app.catalog().get_workspace(workspace_id)?.ok_or_else(|| {
        AppError(ApiError::not_found(
            "workspace_not_found",
            format!("Workspace {workspace_id} not found"),
        ))
    })
}

// ============================================================================
// Workspace lifecycle
// ============================================================================

pub fn create_workspace(
    app: &App,
    project_id: &str,
    branch_id: Option<&str>,
    username: Option<&str>,
    expires_in_days: Option<i64>,
) -> HttpResult<WorkspaceCreatedResponse> {
    get_project_record(app, project_id)?;
    if let Some(branch_id) = branch_id {
        if app.catalog().get_branch(project_id, branch_id)?.is_none() {
            return Err(AppError(ApiError::not_found(
                "branch_not_found",
                format!("Branch {branch_id} not found in project {project_id}"),
            )));
        }
    }

    let workspace_id = format!("ws_{}", &Uuid::new_v4().simple().to_string()[..8]);
    let username = username
        .map(str::to_string)
        .unwrap_or_else(|| format!("ws_user_{workspace_id}"));
    let password = random_password();
    let expires_at = expires_in_days.map(|days| format_rfc3339(Utc::now() + Duration::days(days)));

    let db_path = app
        .storage
        .layout()
        .workspace_db_path(project_id, &workspace_id);
    // Initialize the workspace's own database file.
    let conn = cormorant_db::DbConnection::open(
        &db_path,
        cormorant_db::AccessMode::ReadWrite,
        app.storage.engine_options(),
    )
    .map_err(StorageError::from)?;
    conn.checkpoint().map_err(StorageError::from)?;
    drop(conn);

    let record = match app.catalog().create_workspace(
        &workspace_id,
        project_id,
        branch_id,
        &username,
        &hash_password(&password),
        &db_path.to_string_lossy(),
        expires_at.as_deref(),
    ) {
        Ok(record) => record,
        Err(err) => {
            let _ = std::fs::remove_file(&db_path);
            return Err(err.into());
        }
    };

    log_operation(
        app,
        OperationEntry::new("create_workspace", "success")
            .project(project_id)
            .resource("workspace", &workspace_id),
    );
    Ok(WorkspaceCreatedResponse {
        workspace_id: record.id,
        project_id: record.project_id,
        branch_id: record.branch_id,
        username: record.username,
        password,
        db_path: record.db_path,
        expires_at: record.expires_at,
    })
}

pub fn drop_workspace(app: &App, project_id: &str, workspace_id: &str) -> HttpResult<()> {
    let record = get_workspace(app, workspace_id)?;
    if record.project_id != project_id {
        return Err(AppError(ApiError::not_found(
            "workspace_not_found",
            format!("Workspace {workspace_id} not found"),
        )));
    }
    let db_path = std::path::PathBuf::from(&record.db_path);
    if db_path.is_file() {
        std::fs::remove_file(&db_path).map_err(StorageError::from)?;
    }
    app.catalog().delete_workspace(workspace_id)?;
    log_operation(
        app,
        OperationEntry::new("drop_workspace", "success")
            .project(project_id)
            .resource("workspace", workspace_id),
    );
    Ok(())
}

pub fn reset_workspace_password(
    app: &App,
    project_id: &str,
    workspace_id: &str,
) -> HttpResult<WorkspacePasswordResetResponse> {
    let record = get_workspace(app, workspace_id)?;
    if record.project_id != project_id {
        return Err(AppError(ApiError::not_found(
            "workspace_not_found",
            format!("Workspace {workspace_id} not found"),
        )));
    }
    let password = random_password();
    app.catalog()
        .update_workspace_password(workspace_id, &hash_password(&password))?;
    log_operation(
        app,
        OperationEntry::new("reset_workspace_password", "success")
            .project(project_id)
            .resource("workspace", workspace_id),
    );
    Ok(WorkspacePasswordResetResponse {
        workspace_id: workspace_id.to_string(),
        username: record.username,
        password,
    })
}

// ============================================================================
// Wire-session bridge
// ============================================================================

/// Tables the wire server may ATTACH read-only for this workspace: every
/// main table, with the branch-local path substituted where the
/// workspace's branch has materialized a copy.
fn attachable_tables(
    app: &App,
    project_id: &str,
    branch_id: Option<&str>,
) -> HttpResult<Vec<PgWireTableInfo>> {
    let ctx = BranchContext {
        project_id: project_id.to_string(),
        branch_id: branch_id.map(str::to_string),
    };
    let mut tables = Vec::new();
    for bucket in app
        .storage
        .layout()
        .list_buckets(project_id)
        .map_err(StorageError::from)?
    {
        for table in app
            .storage
            .layout()
            .list_tables(project_id, &bucket)
            .map_err(StorageError::from)?
        {
            let path = app.storage.read_table_path(&ctx, &bucket, &table)?;
            let info = app.storage.table_info_at(&path, &bucket, &table)?;
            tables.push(PgWireTableInfo {
                bucket: bucket.clone(),
                name: table,
                path: path.to_string_lossy().to_string(),
                rows: info.row_count,
            });
        }
    }
    Ok(tables)
}

/// Validate workspace credentials and return everything the wire server
/// needs to initialize a session.
pub fn pgwire_authenticate(app: &App, request: &PgWireAuthRequest) -> HttpResult<PgWireAuthResponse> {
    info!(username = %request.username, client_ip = ?request.client_ip, "wire auth attempt");

    let workspace = app
        .catalog()
        .get_workspace_by_username(&request.username)?;
    let Some(workspace) = workspace else {
        warn!(username = %request.username, "wire auth failed: user not found");
        return Err(AppError(ApiError::unauthenticated(
            "Invalid username or password",
        )));
    };

    if hash_password(&request.password) != workspace.password_hash {
        warn!(workspace_id = %workspace.id, "wire auth failed: invalid password");
        return Err(AppError(ApiError::unauthenticated(
            "Invalid username or password",
        )));
    }

    if workspace.is_expired()? {
        return Err(AppError(ApiError::gone(
            "workspace_expired",
            format!("Workspace {} has expired", workspace.id),
        )));
    }
    if !workspace.is_active() {
        return Err(AppError(ApiError::gone(
            "workspace_not_active",
            format!("Workspace {} is not active", workspace.id),
        )));
    }

    let active = app.catalog().count_active_sessions(&workspace.id)?;
    let limit = app.config.pgwire_max_connections_per_workspace;
    if active >= limit {
        return Err(AppError(
            ApiError::new(
                ErrorKind::TooManyRequests,
                "connection_limit_reached",
                format!("Maximum connections ({limit}) reached for workspace"),
            )
            .with_details(serde_json::json!({
                "workspace_id": workspace.id,
                "active_sessions": active,
                "limit": limit,
            })),
        ));
    }

    let tables = attachable_tables(app, &workspace.project_id, workspace.branch_id.as_deref())?;
    info!(
        workspace_id = %workspace.id,
        project_id = %workspace.project_id,
        tables = tables.len(),
        "wire auth success"
    );
    Ok(PgWireAuthResponse {
        workspace_id: workspace.id,
        project_id: workspace.project_id,
        branch_id: workspace.branch_id,
        db_path: workspace.db_path,
        tables,
        memory_limit: app.config.pgwire_session_memory_limit.clone(),
        query_timeout_seconds: app.config.pgwire_query_timeout_seconds,
    })
}

pub fn pgwire_create_session(
    app: &App,
    request: &PgWireSessionCreateRequest,
) -> HttpResult<PgWireSessionInfo> {
    get_workspace(app, &request.workspace_id)?;
    let record = app.catalog().create_session(
        &request.session_id,
        &request.workspace_id,
        request.client_ip.as_deref(),
    )?;
    info!(session_id = %record.session_id, workspace_id = %record.workspace_id, "wire session created");
    Ok(session_to_info(&record))
}

pub fn pgwire_get_session(app: &App, session_id: &str) -> HttpResult<PgWireSessionInfo> {
    let record = app.catalog().get_session(session_id)?.ok_or_else(|| {
        AppError(ApiError::not_found(
            "session_not_found",
            format!("Session {session_id} not found"),
        ))
    })?;
    Ok(session_to_info(&record))
}

pub fn pgwire_update_activity(
    app: &App,
    session_id: &str,
    increment_queries: bool,
) -> HttpResult<PgWireSessionInfo> {
    pgwire_get_session(app, session_id)?;
    app.catalog()
        .update_session_activity(session_id, increment_queries)?;
    pgwire_get_session(app, session_id)
}

pub fn pgwire_close_session(
    app: &App,
    session_id: &str,
    reason: &str,
) -> HttpResult<()> {
    let session = pgwire_get_session(app, session_id)?;
    // Terminal states only; anything else becomes an error close.
    let status = match reason {
        "idle_timeout" | "user_disconnect" | "error" => reason,
        "disconnected" => "user_disconnect",
        _ => "error",
    };
    app.catalog().close_session(session_id, status)?;
    info!(
        session_id,
        workspace_id = %session.workspace_id,
        reason,
        query_count = session.query_count,
        "wire session closed"
    );
    Ok(())
}

pub fn pgwire_list_sessions(
    app: &App,
    workspace_id: Option<&str>,
    status: Option<&str>,
) -> HttpResult<Vec<PgWireSessionInfo>> {
    let records = app.catalog().list_sessions(workspace_id, status)?;
    Ok(records.iter().map(session_to_info).collect())
}

pub fn pgwire_cleanup_stale(
    app: &App,
    idle_timeout_seconds: Option<i64>,
) -> HttpResult<PgWireCleanupResponse> {
    let timeout = idle_timeout_seconds.unwrap_or(app.config.pgwire_idle_timeout_seconds);
    let cleaned_up = app.catalog().cleanup_stale_sessions(timeout)?;
    info!(timeout_seconds = timeout, sessions_marked = cleaned_up, "stale wire sessions swept");
    Ok(PgWireCleanupResponse {
        cleaned_up,
        idle_timeout_seconds: timeout as u64,
    })
}
