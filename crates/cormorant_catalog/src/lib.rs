//! Durable metadata catalog.
//!
//! One engine database file (`metadata.duckdb` under the data root) holds
//! every control-plane record: projects, branches, branch-local table
//! copies, API keys, snapshots, snapshot settings, files, idempotency
//! entries, the operation log, workspaces, and wire sessions.
//!
//! The catalog is a cache and audit record for storage state; the
//! filesystem stays the source of truth for project/bucket/table
//! existence. Each catalog call takes the connection mutex once, so each
//! call is a single transaction.

mod api_keys;
mod branches;
mod files;
mod idempotency;
mod operations;
mod projects;
mod sessions;
mod settings;
mod snapshots;
mod workspaces;

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use cormorant_db::{BackendError, DbConnection};
use parking_lot::{Mutex, MutexGuard};
use thiserror::Error;

pub use api_keys::ApiKeyRecord;
pub use branches::{BranchRecord, BranchTableRecord};
pub use files::FileRecord;
pub use idempotency::IdempotencyRecord;
pub use operations::OperationEntry;
pub use projects::ProjectRecord;
pub use sessions::SessionRecord;
pub use settings::settings_entity_id;
pub use snapshots::{SnapshotFilter, SnapshotRecord};
pub use workspaces::WorkspaceRecord;

/// Catalog operation result type.
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Catalog errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Engine error (connection, query, etc.)
    #[error("Catalog database error: {0}")]
    Backend(#[from] BackendError),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Constraint violation (duplicate id, revoke-last-admin, etc.)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Serialization error for JSON columns
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Malformed stored value (bad timestamp, unknown enum value)
    #[error("Invalid catalog state: {0}")]
    InvalidState(String),
}

impl CatalogError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }
}

/// RFC3339 UTC timestamp with fixed microsecond precision so stored
/// values sort lexicographically.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Format an explicit instant the same way [`now_rfc3339`] does.
pub fn format_rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp back into an instant.
pub fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CatalogError::invalid_state(format!("Invalid timestamp '{value}': {e}")))
}

/// Handle to the metadata catalog.
///
/// Cheap to share behind an `Arc`; every operation serializes on the
/// single engine connection.
pub struct Catalog {
    conn: Mutex<DbConnection>,
}

impl Catalog {
    /// Open (or create) the catalog database and ensure its schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CatalogError::Backend(BackendError::Database(format!(
                    "Failed to create catalog directory {}: {e}",
                    parent.display()
                )))
            })?;
        }
        let conn = DbConnection::open_rw(path)?;
        let catalog = Self {
            conn: Mutex::new(conn),
        };
        catalog.init_schema()?;
        Ok(catalog)
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, DbConnection> {
        self.conn.lock()
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                settings TEXT,
                bucket_count BIGINT NOT NULL DEFAULT 0,
                table_count BIGINT NOT NULL DEFAULT 0,
                size_bytes BIGINT NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS branches (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS ix_branches_project ON branches(project_id);

            CREATE TABLE IF NOT EXISTS branch_tables (
                branch_id TEXT NOT NULL,
                bucket_name TEXT NOT NULL,
                table_name TEXT NOT NULL,
                copied_at TEXT NOT NULL,
                PRIMARY KEY (branch_id, bucket_name, table_name)
            );

            CREATE TABLE IF NOT EXISTS api_keys (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                scope TEXT NOT NULL,
                branch_id TEXT,
                key_hash TEXT NOT NULL,
                key_prefix TEXT NOT NULL,
                description TEXT,
                created_at TEXT NOT NULL,
                expires_at TEXT,
                revoked BOOLEAN NOT NULL DEFAULT false
            );
            CREATE INDEX IF NOT EXISTS ix_api_keys_project ON api_keys(project_id);
            CREATE INDEX IF NOT EXISTS ix_api_keys_hash ON api_keys(key_hash);

            CREATE TABLE IF NOT EXISTS snapshots (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                bucket_name TEXT NOT NULL,
                table_name TEXT NOT NULL,
                snapshot_type TEXT NOT NULL,
                parquet_path TEXT NOT NULL,
                row_count BIGINT NOT NULL DEFAULT 0,
                size_bytes BIGINT NOT NULL DEFAULT 0,
                schema_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT,
                description TEXT
            );
            CREATE INDEX IF NOT EXISTS ix_snapshots_project ON snapshots(project_id);

            CREATE TABLE IF NOT EXISTS snapshot_settings (
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                config TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (entity_type, entity_id)
            );

            CREATE TABLE IF NOT EXISTS files (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                name TEXT NOT NULL,
                path TEXT NOT NULL,
                size_bytes BIGINT NOT NULL DEFAULT 0,
                checksum_sha256 TEXT,
                content_type TEXT,
                is_staged BOOLEAN NOT NULL DEFAULT false,
                created_at TEXT NOT NULL,
                expires_at TEXT,
                tags TEXT NOT NULL DEFAULT '{}'
            );
            CREATE INDEX IF NOT EXISTS ix_files_project ON files(project_id);

            CREATE TABLE IF NOT EXISTS idempotency_keys (
                key TEXT PRIMARY KEY,
                method TEXT NOT NULL,
                endpoint TEXT NOT NULL,
                request_hash TEXT,
                response_status BIGINT NOT NULL,
                response_body TEXT,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );

            CREATE SEQUENCE IF NOT EXISTS seq_operations_log START 1;
            CREATE TABLE IF NOT EXISTS operations_log (
                id BIGINT PRIMARY KEY DEFAULT nextval('seq_operations_log'),
                operation TEXT NOT NULL,
                status TEXT NOT NULL,
                project_id TEXT,
                request_id TEXT,
                resource_type TEXT,
                resource_id TEXT,
                details TEXT,
                error_message TEXT,
                duration_ms BIGINT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS ix_operations_project ON operations_log(project_id);

            CREATE TABLE IF NOT EXISTS workspaces (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                branch_id TEXT,
                username TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                db_path TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                created_at TEXT NOT NULL,
                expires_at TEXT
            );

            CREATE TABLE IF NOT EXISTS pgwire_sessions (
                session_id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL,
                client_ip TEXT,
                started_at TEXT NOT NULL,
                last_activity_at TEXT NOT NULL,
                query_count BIGINT NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'active'
            );
            CREATE INDEX IF NOT EXISTS ix_sessions_workspace ON pgwire_sessions(workspace_id);
            "#,
        )?;
        Ok(())
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog").finish()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_is_idempotent() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("metadata.duckdb");
        {
            let catalog = Catalog::open(&path).unwrap();
            catalog
                .create_project("p1", "Project One")
                .expect("create project");
        }
        // Re-opening must keep existing rows and re-run DDL harmlessly.
        let catalog = Catalog::open(&path).unwrap();
        let project = catalog.get_project("p1").unwrap().unwrap();
        assert_eq!(project.name, "Project One");
    }

    #[test]
    fn test_timestamps_sort_lexicographically() {
        let a = now_rfc3339();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = now_rfc3339();
        assert!(a < b);
        assert!(parse_rfc3339(&a).unwrap() < parse_rfc3339(&b).unwrap());
    }
}
