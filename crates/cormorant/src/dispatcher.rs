//! Command dispatcher: the request/response service.
//!
//! An incoming [`DriverRequest`] wraps one command behind a type URL; the
//! last path segment of the URL selects the handler from an init-time
//! registry of `(name, deserializer, handler)` entries. Handlers collect
//! log messages that are returned alongside the response, and failures
//! map onto the shared error taxonomy.

use std::collections::HashMap;
use std::time::Instant;

use cormorant_protocol::envelope::{
    Credentials, DriverRequest, DriverResponse, LogLevel, LogMessage, RuntimeOptions,
};
use cormorant_protocol::http_types::{
    ApiKeyCreateRequest, BackendInitResponse, ColumnInfo, CsvOptions, ExportRequest, FileFormat,
    ImportFromFileRequest, ImportOptions, TableCreateRequest,
};
use cormorant_protocol::{ApiError, ErrorKind};
use cormorant_storage::DEFAULT_BRANCH_ID;
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::auth;
use crate::error::AppError;
use crate::metrics;
use crate::ops;
use crate::state::App;

/// Per-request log message collector, returned in the response envelope.
#[derive(Default)]
pub struct LogCollector {
    messages: Mutex<Vec<LogMessage>>,
}

impl LogCollector {
    pub fn push(&self, level: LogLevel, message: impl Into<String>) {
        self.messages.lock().push(LogMessage::new(level, message));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.push(LogLevel::Informational, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.push(LogLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.push(LogLevel::Error, message);
    }

    pub fn into_messages(self) -> Vec<LogMessage> {
        self.messages.into_inner()
    }
}

/// Everything a handler gets besides its typed command.
pub struct CommandContext<'a> {
    pub app: &'a App,
    pub credentials: Option<Credentials>,
    pub runtime: RuntimeOptions,
    pub log: &'a LogCollector,
}

impl CommandContext<'_> {
    /// Validate presented credentials when the caller sent any. Absent
    /// credentials are accepted: the command service is an internal
    /// surface fronted by its own transport authentication.
    fn check_credentials(&self) -> Result<(), AppError> {
        if let Some(credentials) = &self.credentials {
            auth::authenticate(self.app, credentials.api_key())?;
        }
        Ok(())
    }
}

type Handler = fn(&CommandContext<'_>, serde_json::Value) -> Result<Option<serde_json::Value>, AppError>;

fn parse<T: serde::de::DeserializeOwned>(payload: serde_json::Value) -> Result<T, AppError> {
    serde_json::from_value(payload).map_err(|err| {
        AppError(ApiError::invalid_argument(
            "invalid_command",
            format!("Malformed command payload: {err}"),
        ))
    })
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Option<serde_json::Value>, AppError> {
    serde_json::to_value(value)
        .map(Some)
        .map_err(|err| AppError(ApiError::internal(format!("response serialization: {err}"))))
}

fn default_branch() -> String {
    DEFAULT_BRANCH_ID.to_string()
}

// ============================================================================
// Command payloads
// ============================================================================

#[derive(Debug, Deserialize)]
struct InitBackendCommand {}

#[derive(Debug, Deserialize)]
struct RemoveBackendCommand {}

#[derive(Debug, Deserialize)]
struct CreateProjectCommand {
    project_id: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DropProjectCommand {
    project_id: String,
}

#[derive(Debug, Deserialize)]
struct BucketScope {
    project_id: String,
    #[serde(default = "default_branch")]
    branch_id: String,
    bucket_name: String,
}

#[derive(Debug, Deserialize)]
struct CreateBucketCommand {
    #[serde(flatten)]
    scope: BucketScope,
}

#[derive(Debug, Deserialize)]
struct DropBucketCommand {
    #[serde(flatten)]
    scope: BucketScope,
    #[serde(default)]
    cascade: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct TableScope {
    project_id: String,
    #[serde(default = "default_branch")]
    branch_id: String,
    bucket_name: String,
    table_name: String,
}

#[derive(Debug, Deserialize)]
struct CreateTableCommand {
    #[serde(flatten)]
    scope: TableScope,
    columns: Vec<ColumnInfo>,
    #[serde(default)]
    primary_key: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DropTableCommand {
    #[serde(flatten)]
    scope: TableScope,
}

#[derive(Debug, Deserialize)]
struct PreviewTableCommand {
    #[serde(flatten)]
    scope: TableScope,
    #[serde(default)]
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ObjectInfoCommand {
    project_id: String,
    #[serde(default = "default_branch")]
    branch_id: String,
    #[serde(default)]
    bucket_name: Option<String>,
    #[serde(default)]
    table_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TableImportFromFileCommand {
    #[serde(flatten)]
    scope: TableScope,
    file_id: String,
    format: FileFormat,
    #[serde(default)]
    csv_options: Option<CsvOptions>,
    #[serde(default)]
    import_options: Option<ImportOptions>,
}

#[derive(Debug, Deserialize)]
struct TableExportToFileCommand {
    #[serde(flatten)]
    scope: TableScope,
    format: FileFormat,
    #[serde(default)]
    columns: Option<Vec<String>>,
    #[serde(default)]
    compression: Option<String>,
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    where_filter: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AddColumnCommand {
    #[serde(flatten)]
    scope: TableScope,
    column: ColumnInfo,
}

#[derive(Debug, Deserialize)]
struct DropColumnCommand {
    #[serde(flatten)]
    scope: TableScope,
    column_name: String,
}

#[derive(Debug, Deserialize)]
struct AlterColumnCommand {
    #[serde(flatten)]
    scope: TableScope,
    column_name: String,
    new_type: String,
}

#[derive(Debug, Deserialize)]
struct AddPrimaryKeyCommand {
    #[serde(flatten)]
    scope: TableScope,
    columns: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DropPrimaryKeyCommand {
    #[serde(flatten)]
    scope: TableScope,
}

#[derive(Debug, Deserialize)]
struct DeleteTableRowsCommand {
    #[serde(flatten)]
    scope: TableScope,
    #[serde(default)]
    where_filter: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TruncateTableCommand {
    #[serde(flatten)]
    scope: TableScope,
}

#[derive(Debug, Deserialize)]
struct CreateWorkspaceCommand {
    project_id: String,
    #[serde(default)]
    branch_id: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    expires_in_days: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct DropWorkspaceCommand {
    project_id: String,
    workspace_id: String,
}

#[derive(Debug, Deserialize)]
struct ResetWorkspacePasswordCommand {
    project_id: String,
    workspace_id: String,
}

#[derive(Debug, Deserialize)]
struct CreateApiKeyCommand {
    project_id: String,
    #[serde(flatten)]
    request: ApiKeyCreateRequest,
}

// ============================================================================
// Handlers
// ============================================================================

fn resolve_table_scope(
    ctx: &CommandContext<'_>,
    scope: &TableScope,
) -> Result<cormorant_storage::BranchContext, AppError> {
    Ok(ctx
        .app
        .storage
        .resolve_branch(&scope.project_id, &scope.branch_id)?)
}

fn handle_init_backend(
    ctx: &CommandContext<'_>,
    payload: serde_json::Value,
) -> Result<Option<serde_json::Value>, AppError> {
    let _: InitBackendCommand = parse(payload)?;
    ctx.app.storage.init_backend().map_err(AppError::from)?;
    ctx.log.info("Backend initialized");
    to_json(&BackendInitResponse {
        initialized: true,
        message: "Backend initialized".to_string(),
    })
}

fn handle_remove_backend(
    ctx: &CommandContext<'_>,
    payload: serde_json::Value,
) -> Result<Option<serde_json::Value>, AppError> {
    let _: RemoveBackendCommand = parse(payload)?;
    // Declared a no-op; intended semantics under future evolution are
    // unspecified.
    ctx.log.info("Backend removal is a no-op");
    to_json(&BackendInitResponse {
        initialized: true,
        message: "Backend removal is a no-op".to_string(),
    })
}

fn handle_create_project(
    ctx: &CommandContext<'_>,
    payload: serde_json::Value,
) -> Result<Option<serde_json::Value>, AppError> {
    let cmd: CreateProjectCommand = parse(payload)?;
    let response = ops::projects::create_project(ctx.app, &cmd.project_id, cmd.name.as_deref())?;
    ctx.log.info(format!("Project {} created", cmd.project_id));
    to_json(&response)
}

fn handle_drop_project(
    ctx: &CommandContext<'_>,
    payload: serde_json::Value,
) -> Result<Option<serde_json::Value>, AppError> {
    let cmd: DropProjectCommand = parse(payload)?;
    ops::projects::delete_project(ctx.app, &cmd.project_id)?;
    ctx.log.info(format!("Project {} dropped", cmd.project_id));
    Ok(None)
}

fn handle_create_bucket(
    ctx: &CommandContext<'_>,
    payload: serde_json::Value,
) -> Result<Option<serde_json::Value>, AppError> {
    let cmd: CreateBucketCommand = parse(payload)?;
    let branch_ctx = ctx
        .app
        .storage
        .resolve_branch(&cmd.scope.project_id, &cmd.scope.branch_id)?;
    let response = ops::projects::create_bucket(ctx.app, &branch_ctx, &cmd.scope.bucket_name)?;
    ctx.log.info(format!("Bucket {} created", cmd.scope.bucket_name));
    to_json(&response)
}

fn handle_drop_bucket(
    ctx: &CommandContext<'_>,
    payload: serde_json::Value,
) -> Result<Option<serde_json::Value>, AppError> {
    let cmd: DropBucketCommand = parse(payload)?;
    let branch_ctx = ctx
        .app
        .storage
        .resolve_branch(&cmd.scope.project_id, &cmd.scope.branch_id)?;
    ops::projects::delete_bucket(
        ctx.app,
        &branch_ctx,
        &cmd.scope.bucket_name,
        cmd.cascade.unwrap_or(true),
    )?;
    ctx.log.info(format!("Bucket {} dropped", cmd.scope.bucket_name));
    Ok(None)
}

fn handle_create_table(
    ctx: &CommandContext<'_>,
    payload: serde_json::Value,
) -> Result<Option<serde_json::Value>, AppError> {
    let cmd: CreateTableCommand = parse(payload)?;
    let branch_ctx = resolve_table_scope(ctx, &cmd.scope)?;
    let request = TableCreateRequest {
        name: cmd.scope.table_name.clone(),
        columns: cmd.columns,
        primary_key: cmd.primary_key,
    };
    let response = ops::tables::create_table(ctx.app, &branch_ctx, &cmd.scope.bucket_name, &request)?;
    ctx.log.info(format!(
        "Table {}.{} created",
        cmd.scope.bucket_name, cmd.scope.table_name
    ));
    to_json(&response)
}

fn handle_drop_table(
    ctx: &CommandContext<'_>,
    payload: serde_json::Value,
) -> Result<Option<serde_json::Value>, AppError> {
    let cmd: DropTableCommand = parse(payload)?;
    let branch_ctx = resolve_table_scope(ctx, &cmd.scope)?;
    let snapshot = ops::tables::delete_table(
        ctx.app,
        &branch_ctx,
        &cmd.scope.bucket_name,
        &cmd.scope.table_name,
    )?;
    if let Some(snapshot_id) = snapshot {
        ctx.log.info(format!("Automatic snapshot {snapshot_id} created before drop"));
    }
    ctx.log.info(format!(
        "Table {}.{} dropped",
        cmd.scope.bucket_name, cmd.scope.table_name
    ));
    Ok(None)
}

fn handle_preview_table(
    ctx: &CommandContext<'_>,
    payload: serde_json::Value,
) -> Result<Option<serde_json::Value>, AppError> {
    let cmd: PreviewTableCommand = parse(payload)?;
    let branch_ctx = resolve_table_scope(ctx, &cmd.scope)?;
    let response = ops::tables::preview_table(
        ctx.app,
        &branch_ctx,
        &cmd.scope.bucket_name,
        &cmd.scope.table_name,
        cmd.limit.unwrap_or(1000),
    )?;
    to_json(&response)
}

fn handle_object_info(
    ctx: &CommandContext<'_>,
    payload: serde_json::Value,
) -> Result<Option<serde_json::Value>, AppError> {
    let cmd: ObjectInfoCommand = parse(payload)?;
    let branch_ctx = ctx
        .app
        .storage
        .resolve_branch(&cmd.project_id, &cmd.branch_id)?;
    match (&cmd.bucket_name, &cmd.table_name) {
        (Some(bucket), Some(table)) => {
            let info = ops::tables::get_table(ctx.app, &branch_ctx, bucket, table)?;
            to_json(&info)
        }
        (Some(bucket), None) => {
            let buckets = ops::projects::list_buckets(ctx.app, &branch_ctx)?;
            let info = buckets
                .buckets
                .into_iter()
                .find(|b| &b.name == bucket)
                .ok_or_else(|| {
                    AppError(ApiError::not_found(
                        "bucket_not_found",
                        format!("Bucket {bucket} not found"),
                    ))
                })?;
            to_json(&info)
        }
        _ => {
            let info = ops::projects::get_project(ctx.app, &cmd.project_id)?;
            to_json(&info)
        }
    }
}

fn handle_import(
    ctx: &CommandContext<'_>,
    payload: serde_json::Value,
) -> Result<Option<serde_json::Value>, AppError> {
    let cmd: TableImportFromFileCommand = parse(payload)?;
    let branch_ctx = resolve_table_scope(ctx, &cmd.scope)?;
    let request = ImportFromFileRequest {
        file_id: cmd.file_id,
        format: cmd.format,
        csv_options: cmd.csv_options,
        import_options: cmd.import_options.unwrap_or_default(),
    };
    let response = ops::tables::import_from_file(
        ctx.app,
        &branch_ctx,
        &cmd.scope.bucket_name,
        &cmd.scope.table_name,
        &request,
    )?;
    ctx.log.info(format!(
        "Imported {} rows into {}.{}",
        response.imported_rows, cmd.scope.bucket_name, cmd.scope.table_name
    ));
    to_json(&response)
}

fn handle_export(
    ctx: &CommandContext<'_>,
    payload: serde_json::Value,
) -> Result<Option<serde_json::Value>, AppError> {
    let cmd: TableExportToFileCommand = parse(payload)?;
    let branch_ctx = resolve_table_scope(ctx, &cmd.scope)?;
    let request = ExportRequest {
        format: cmd.format,
        columns: cmd.columns,
        compression: cmd.compression,
        limit: cmd.limit,
        where_filter: cmd.where_filter,
    };
    let response = ops::tables::export_to_file(
        ctx.app,
        &branch_ctx,
        &cmd.scope.bucket_name,
        &cmd.scope.table_name,
        &request,
    )?;
    ctx.log.info(format!(
        "Exported {} rows from {}.{}",
        response.rows_exported, cmd.scope.bucket_name, cmd.scope.table_name
    ));
    to_json(&response)
}

fn handle_add_column(
    ctx: &CommandContext<'_>,
    payload: serde_json::Value,
) -> Result<Option<serde_json::Value>, AppError> {
    let cmd: AddColumnCommand = parse(payload)?;
    let branch_ctx = resolve_table_scope(ctx, &cmd.scope)?;
    let response = ops::tables::add_column(
        ctx.app,
        &branch_ctx,
        &cmd.scope.bucket_name,
        &cmd.scope.table_name,
        &cmd.column,
    )?;
    to_json(&response)
}

fn handle_drop_column(
    ctx: &CommandContext<'_>,
    payload: serde_json::Value,
) -> Result<Option<serde_json::Value>, AppError> {
    let cmd: DropColumnCommand = parse(payload)?;
    let branch_ctx = resolve_table_scope(ctx, &cmd.scope)?;
    let response = ops::tables::drop_column(
        ctx.app,
        &branch_ctx,
        &cmd.scope.bucket_name,
        &cmd.scope.table_name,
        &cmd.column_name,
    )?;
    to_json(&response)
}

fn handle_alter_column(
    ctx: &CommandContext<'_>,
    payload: serde_json::Value,
) -> Result<Option<serde_json::Value>, AppError> {
    let cmd: AlterColumnCommand = parse(payload)?;
    let branch_ctx = resolve_table_scope(ctx, &cmd.scope)?;
    let response = ops::tables::alter_column(
        ctx.app,
        &branch_ctx,
        &cmd.scope.bucket_name,
        &cmd.scope.table_name,
        &cmd.column_name,
        &cmd.new_type,
    )?;
    to_json(&response)
}

fn handle_add_primary_key(
    ctx: &CommandContext<'_>,
    payload: serde_json::Value,
) -> Result<Option<serde_json::Value>, AppError> {
    let cmd: AddPrimaryKeyCommand = parse(payload)?;
    let branch_ctx = resolve_table_scope(ctx, &cmd.scope)?;
    let response = ops::tables::add_primary_key(
        ctx.app,
        &branch_ctx,
        &cmd.scope.bucket_name,
        &cmd.scope.table_name,
        &cmd.columns,
    )?;
    to_json(&response)
}

fn handle_drop_primary_key(
    ctx: &CommandContext<'_>,
    payload: serde_json::Value,
) -> Result<Option<serde_json::Value>, AppError> {
    let cmd: DropPrimaryKeyCommand = parse(payload)?;
    let branch_ctx = resolve_table_scope(ctx, &cmd.scope)?;
    let response = ops::tables::drop_primary_key(
        ctx.app,
        &branch_ctx,
        &cmd.scope.bucket_name,
        &cmd.scope.table_name,
    )?;
    to_json(&response)
}

fn handle_delete_rows(
    ctx: &CommandContext<'_>,
    payload: serde_json::Value,
) -> Result<Option<serde_json::Value>, AppError> {
    let cmd: DeleteTableRowsCommand = parse(payload)?;
    let branch_ctx = resolve_table_scope(ctx, &cmd.scope)?;
    let response = ops::tables::delete_rows(
        ctx.app,
        &branch_ctx,
        &cmd.scope.bucket_name,
        &cmd.scope.table_name,
        cmd.where_filter.as_deref(),
    )?;
    if let Some(snapshot_id) = &response.snapshot_id {
        ctx.log.info(format!("Automatic snapshot {snapshot_id} created before delete"));
    }
    to_json(&response)
}

fn handle_truncate_table(
    ctx: &CommandContext<'_>,
    payload: serde_json::Value,
) -> Result<Option<serde_json::Value>, AppError> {
    let cmd: TruncateTableCommand = parse(payload)?;
    let branch_ctx = resolve_table_scope(ctx, &cmd.scope)?;
    let response = ops::tables::truncate_table(
        ctx.app,
        &branch_ctx,
        &cmd.scope.bucket_name,
        &cmd.scope.table_name,
    )?;
    if let Some(snapshot_id) = &response.snapshot_id {
        ctx.log.info(format!("Automatic snapshot {snapshot_id} created before truncate"));
    }
    to_json(&response)
}

fn handle_create_workspace(
    ctx: &CommandContext<'_>,
    payload: serde_json::Value,
) -> Result<Option<serde_json::Value>, AppError> {
    let cmd: CreateWorkspaceCommand = parse(payload)?;
    let response = ops::workspaces::create_workspace(
        ctx.app,
        &cmd.project_id,
        cmd.branch_id.as_deref(),
        cmd.username.as_deref(),
        cmd.expires_in_days,
    )?;
    ctx.log.info(format!("Workspace {} created", response.workspace_id));
    to_json(&response)
}

fn handle_drop_workspace(
    ctx: &CommandContext<'_>,
    payload: serde_json::Value,
) -> Result<Option<serde_json::Value>, AppError> {
    let cmd: DropWorkspaceCommand = parse(payload)?;
    ops::workspaces::drop_workspace(ctx.app, &cmd.project_id, &cmd.workspace_id)?;
    ctx.log.info(format!("Workspace {} dropped", cmd.workspace_id));
    Ok(None)
}

fn handle_reset_workspace_password(
    ctx: &CommandContext<'_>,
    payload: serde_json::Value,
) -> Result<Option<serde_json::Value>, AppError> {
    let cmd: ResetWorkspacePasswordCommand = parse(payload)?;
    let response =
        ops::workspaces::reset_workspace_password(ctx.app, &cmd.project_id, &cmd.workspace_id)?;
    to_json(&response)
}

fn handle_create_api_key(
    ctx: &CommandContext<'_>,
    payload: serde_json::Value,
) -> Result<Option<serde_json::Value>, AppError> {
    let cmd: CreateApiKeyCommand = parse(payload)?;
    let response = ops::api_keys::create_api_key(ctx.app, &cmd.project_id, &cmd.request)?;
    to_json(&response)
}

// ============================================================================
// Registry and execution
// ============================================================================

/// Init-time registry of command name -> handler.
pub struct Dispatcher {
    handlers: HashMap<&'static str, Handler>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let mut handlers: HashMap<&'static str, Handler> = HashMap::new();
        handlers.insert("InitBackendCommand", handle_init_backend);
        handlers.insert("RemoveBackendCommand", handle_remove_backend);
        handlers.insert("CreateProjectCommand", handle_create_project);
        handlers.insert("DropProjectCommand", handle_drop_project);
        handlers.insert("CreateBucketCommand", handle_create_bucket);
        handlers.insert("DropBucketCommand", handle_drop_bucket);
        handlers.insert("CreateTableCommand", handle_create_table);
        handlers.insert("DropTableCommand", handle_drop_table);
        handlers.insert("PreviewTableCommand", handle_preview_table);
        handlers.insert("ObjectInfoCommand", handle_object_info);
        handlers.insert("TableImportFromFileCommand", handle_import);
        handlers.insert("TableExportToFileCommand", handle_export);
        handlers.insert("AddColumnCommand", handle_add_column);
        handlers.insert("DropColumnCommand", handle_drop_column);
        handlers.insert("AlterColumnCommand", handle_alter_column);
        handlers.insert("AddPrimaryKeyCommand", handle_add_primary_key);
        handlers.insert("DropPrimaryKeyCommand", handle_drop_primary_key);
        handlers.insert("DeleteTableRowsCommand", handle_delete_rows);
        handlers.insert("TruncateTableCommand", handle_truncate_table);
        handlers.insert("CreateWorkspaceCommand", handle_create_workspace);
        handlers.insert("DropWorkspaceCommand", handle_drop_workspace);
        handlers.insert(
            "ResetWorkspacePasswordCommand",
            handle_reset_workspace_password,
        );
        handlers.insert("CreateApiKeyCommand", handle_create_api_key);
        info!(handlers = handlers.len(), "command dispatcher initialized");
        Self { handlers }
    }

    pub fn command_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.handlers.keys().copied().collect();
        names.sort();
        names
    }

    /// Execute one envelope. Returns the error kind (for the transport
    /// status) alongside the response; the response always carries the
    /// collected log messages, with the error appended on failure.
    pub fn execute(&self, app: &App, request: DriverRequest) -> (Option<ErrorKind>, DriverResponse) {
        let command_name = request.command.command_name().to_string();
        let start = Instant::now();
        debug!(command = %command_name, "received command");

        let collector = LogCollector::default();
        let ctx = CommandContext {
            app,
            credentials: request.credentials,
            runtime: request.runtime_options.unwrap_or_default(),
            log: &collector,
        };
        if let Some(run_id) = &ctx.runtime.run_id {
            debug!(run_id = %run_id, "command runtime options");
        }

        let result = match self.handlers.get(command_name.as_str()) {
            None => Err(AppError(ApiError::new(
                ErrorKind::Unimplemented,
                "unimplemented",
                format!("Unsupported command: {command_name}"),
            ))),
            Some(handler) => ctx
                .check_credentials()
                .and_then(|()| handler(&ctx, request.command.payload)),
        };

        let (kind, response) = match result {
            Ok(command_response) => {
                metrics::COMMANDS_TOTAL
                    .with_label_values(&[&command_name, "success"])
                    .inc();
                (
                    None,
                    DriverResponse {
                        command_response,
                        messages: collector.into_messages(),
                    },
                )
            }
            Err(err) => {
                warn!(command = %command_name, error = %err.0, "command failed");
                metrics::COMMANDS_TOTAL
                    .with_label_values(&[&command_name, "error"])
                    .inc();
                metrics::COMMAND_ERRORS_TOTAL
                    .with_label_values(&[&command_name, err.0.kind.as_str()])
                    .inc();
                let mut messages = collector.into_messages();
                messages.push(LogMessage::new(LogLevel::Error, err.0.message.clone()));
                (
                    Some(err.0.kind),
                    DriverResponse {
                        command_response: None,
                        messages,
                    },
                )
            }
        };
        metrics::COMMAND_DURATION
            .with_label_values(&[&command_name])
            .observe(start.elapsed().as_secs_f64());
        (kind, response)
    }
}
