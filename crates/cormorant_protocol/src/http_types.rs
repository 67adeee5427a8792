//! Request/response bodies for the HTTP/JSON facade.
//!
//! All timestamps are RFC3339 UTC strings on the wire. Enum values use
//! strict snake_case tagging so unknown values fail deserialization with
//! an invalid-argument error at the boundary.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Projects
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectCreateRequest {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectUpdateRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub settings: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectResponse {
    pub id: String,
    pub name: String,
    pub status: String,
    pub bucket_count: i64,
    pub table_count: i64,
    pub size_bytes: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Creation response: includes the project's initial admin key, the only
/// time it is returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectCreatedResponse {
    #[serde(flatten)]
    pub project: ProjectResponse,
    pub api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectListResponse {
    pub projects: Vec<ProjectResponse>,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectStatsResponse {
    pub id: String,
    pub bucket_count: i64,
    pub table_count: i64,
    pub size_bytes: i64,
    pub branch_count: i64,
    pub snapshot_count: i64,
    pub file_count: i64,
}

// ============================================================================
// Buckets
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketCreateRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketResponse {
    pub name: String,
    pub project_id: String,
    pub table_count: i64,
    pub size_bytes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketListResponse {
    pub buckets: Vec<BucketResponse>,
    pub total: i64,
}

// ============================================================================
// Tables
// ============================================================================

/// Column definition: name, engine type, nullability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    #[serde(default = "default_true")]
    pub nullable: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableCreateRequest {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    #[serde(default)]
    pub primary_key: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableResponse {
    pub name: String,
    pub bucket: String,
    pub columns: Vec<ColumnInfo>,
    pub row_count: i64,
    pub size_bytes: i64,
    pub primary_key: Vec<String>,
    /// `main` when served live from main, `branch` when a branch-local copy exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableListResponse {
    pub tables: Vec<TableResponse>,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TablePreviewResponse {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub total_row_count: i64,
    pub preview_row_count: i64,
}

// ============================================================================
// Import / Export
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    Csv,
    Parquet,
}

impl FileFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Parquet => "parquet",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CsvOptions {
    #[serde(default)]
    pub delimiter: Option<String>,
    #[serde(default)]
    pub quote: Option<String>,
    #[serde(default)]
    pub escape: Option<String>,
    #[serde(default)]
    pub header: Option<bool>,
    #[serde(default)]
    pub null_string: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupMode {
    UpdateDuplicates,
    FailOnDuplicates,
    InsertDuplicates,
}

impl Default for DedupMode {
    fn default() -> Self {
        Self::UpdateDuplicates
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportOptions {
    #[serde(default)]
    pub incremental: bool,
    #[serde(default)]
    pub dedup_mode: DedupMode,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            incremental: false,
            dedup_mode: DedupMode::UpdateDuplicates,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportFromFileRequest {
    pub file_id: String,
    pub format: FileFormat,
    #[serde(default)]
    pub csv_options: Option<CsvOptions>,
    #[serde(default)]
    pub import_options: ImportOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportResponse {
    pub imported_rows: i64,
    pub table_rows_after: i64,
    pub table_size_bytes: i64,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRequest {
    pub format: FileFormat,
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    #[serde(default)]
    pub compression: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub where_filter: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportResponse {
    pub file_id: String,
    pub file_path: String,
    pub rows_exported: i64,
    pub file_size_bytes: i64,
}

// ============================================================================
// Branches
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchCreateRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchResponse {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub table_count: i64,
    pub size_bytes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchDetailResponse {
    #[serde(flatten)]
    pub branch: BranchResponse,
    /// Tables materialized locally by copy-on-write.
    pub copied_tables: Vec<BranchTableInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchTableInfo {
    pub bucket_name: String,
    pub table_name: String,
    pub copied_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchListResponse {
    pub branches: Vec<BranchResponse>,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullTableResponse {
    pub bucket_name: String,
    pub table_name: String,
    pub was_local: bool,
    pub message: String,
}

// ============================================================================
// Snapshots
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotType {
    Manual,
    AutoPredrop,
    AutoPretruncate,
    AutoPredelete,
    AutoPredropColumn,
}

impl SnapshotType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::AutoPredrop => "auto_predrop",
            Self::AutoPretruncate => "auto_pretruncate",
            Self::AutoPredelete => "auto_predelete",
            Self::AutoPredropColumn => "auto_predrop_column",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "manual" => Some(Self::Manual),
            "auto_predrop" => Some(Self::AutoPredrop),
            "auto_pretruncate" => Some(Self::AutoPretruncate),
            "auto_predelete" => Some(Self::AutoPredelete),
            "auto_predrop_column" => Some(Self::AutoPredropColumn),
            _ => None,
        }
    }

    pub fn is_manual(&self) -> bool {
        matches!(self, Self::Manual)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotCreateRequest {
    pub bucket: String,
    pub table: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotResponse {
    pub id: String,
    pub project_id: String,
    pub bucket_name: String,
    pub table_name: String,
    pub snapshot_type: SnapshotType,
    pub row_count: i64,
    pub size_bytes: i64,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotDetailResponse {
    #[serde(flatten)]
    pub snapshot: SnapshotResponse,
    pub schema_columns: Vec<ColumnInfo>,
    pub primary_key: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotListResponse {
    pub snapshots: Vec<SnapshotResponse>,
    pub total: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotRestoreRequest {
    #[serde(default)]
    pub target_bucket: Option<String>,
    #[serde(default)]
    pub target_table: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoredLocation {
    pub bucket: String,
    pub table: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRestoreResponse {
    pub restored_to: RestoredLocation,
    pub row_count: i64,
}

/// Effective snapshot settings plus the layer each leaf came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotSettingsResponse {
    pub effective: crate::snapshot_config::SnapshotConfig,
    /// Flattened leaf path -> source layer (`system`/`project`/`bucket`/`table`).
    pub sources: HashMap<String, String>,
    /// The local (non-inherited) overlay stored at this scope, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<crate::snapshot_config::SnapshotConfigPatch>,
}

// ============================================================================
// API keys
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyScope {
    ProjectAdmin,
    BranchAdmin,
    BranchRead,
}

impl KeyScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProjectAdmin => "project_admin",
            Self::BranchAdmin => "branch_admin",
            Self::BranchRead => "branch_read",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "project_admin" => Some(Self::ProjectAdmin),
            "branch_admin" => Some(Self::BranchAdmin),
            "branch_read" => Some(Self::BranchRead),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyCreateRequest {
    #[serde(default = "default_key_scope")]
    pub scope: KeyScope,
    #[serde(default)]
    pub branch_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub expires_in_days: Option<i64>,
}

fn default_key_scope() -> KeyScope {
    KeyScope::ProjectAdmin
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyResponse {
    pub id: String,
    pub project_id: String,
    pub scope: KeyScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
    pub key_prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    pub revoked: bool,
}

/// Creation/rotation response: the only time the raw key is returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyCreatedResponse {
    #[serde(flatten)]
    pub info: ApiKeyResponse,
    pub api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyListResponse {
    pub api_keys: Vec<ApiKeyResponse>,
    pub total: i64,
}

// ============================================================================
// Files
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePrepareRequest {
    pub filename: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub size_bytes: Option<i64>,
    #[serde(default)]
    pub tags: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePrepareResponse {
    pub upload_key: String,
    pub upload_url: String,
    pub expires_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileUploadResponse {
    pub upload_key: String,
    pub size_bytes: i64,
    pub checksum_sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRegisterRequest {
    pub upload_key: String,
    #[serde(default)]
    pub tags: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfoResponse {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub path: String,
    pub size_bytes: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub is_staged: bool,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileListResponse {
    pub files: Vec<FileInfoResponse>,
    pub total: i64,
}

// ============================================================================
// Wire-session bridge
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PgWireAuthRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub client_ip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PgWireTableInfo {
    pub bucket: String,
    pub name: String,
    pub path: String,
    pub rows: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PgWireAuthResponse {
    pub workspace_id: String,
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
    pub db_path: String,
    pub tables: Vec<PgWireTableInfo>,
    pub memory_limit: String,
    pub query_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PgWireSessionCreateRequest {
    pub session_id: String,
    pub workspace_id: String,
    #[serde(default)]
    pub client_ip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PgWireSessionInfo {
    pub session_id: String,
    pub workspace_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
    pub started_at: String,
    pub last_activity_at: String,
    pub query_count: i64,
    pub status: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PgWireSessionUpdateRequest {
    #[serde(default)]
    pub increment_queries: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PgWireCleanupResponse {
    pub cleaned_up: i64,
    pub idle_timeout_seconds: u64,
}

// ============================================================================
// Workspaces
// ============================================================================

/// Creation response: the password is returned exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceCreatedResponse {
    pub workspace_id: String,
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
    pub username: String,
    pub password: String,
    pub db_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspacePasswordResetResponse {
    pub workspace_id: String,
    pub username: String,
    pub password: String,
}

/// Row-deletion observables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteRowsResponse {
    pub deleted_rows: i64,
    pub table_rows_after: i64,
    /// Id of the automatic pre-destructive snapshot, when one was taken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
}

// ============================================================================
// Misc
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendInitResponse {
    pub initialized: bool,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_mode_tagging() {
        let opts: ImportOptions =
            serde_json::from_str(r#"{"incremental": true, "dedup_mode": "fail_on_duplicates"}"#)
                .unwrap();
        assert!(opts.incremental);
        assert_eq!(opts.dedup_mode, DedupMode::FailOnDuplicates);

        // Unknown enum values must fail at the boundary.
        let bad: Result<ImportOptions, _> =
            serde_json::from_str(r#"{"dedup_mode": "keep_everything"}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_snapshot_type_roundtrip() {
        for ty in [
            SnapshotType::Manual,
            SnapshotType::AutoPredrop,
            SnapshotType::AutoPretruncate,
            SnapshotType::AutoPredelete,
            SnapshotType::AutoPredropColumn,
        ] {
            assert_eq!(SnapshotType::parse(ty.as_str()), Some(ty));
        }
        assert_eq!(SnapshotType::parse("auto_whatever"), None);
    }

    #[test]
    fn test_column_info_nullable_default() {
        let col: ColumnInfo = serde_json::from_str(r#"{"name": "id", "type": "INTEGER"}"#).unwrap();
        assert!(col.nullable);
        assert_eq!(col.column_type, "INTEGER");
    }
}
