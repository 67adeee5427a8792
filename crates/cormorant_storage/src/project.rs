//! Project, bucket, and table lifecycle.
//!
//! Mutations leave no dangling state: when the engine step fails after a
//! filesystem step (or vice versa), the completed half is rolled back
//! best-effort. Counters in the catalog are recomputed from disk after
//! every mutation; the filesystem is the source of truth.

use std::path::Path;
use std::sync::Arc;

use cormorant_catalog::Catalog;
use cormorant_db::{quote_ident, DbConnection, EngineOptions, SchemaColumn};
use cormorant_protocol::http_types::ColumnInfo;
use tracing::{debug, warn};

use crate::layout::{StorageLayout, TABLE_DATA_NAME};
use crate::lock::TableLockRegistry;
use crate::{Result, StorageError};

/// Full description of a table as read from its file.
#[derive(Debug, Clone)]
pub struct TableInfo {
    pub name: String,
    pub bucket: String,
    pub columns: Vec<ColumnInfo>,
    pub primary_key: Vec<String>,
    pub row_count: i64,
    pub size_bytes: i64,
}

/// Filesystem-derived project counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectStats {
    pub bucket_count: i64,
    pub table_count: i64,
    pub size_bytes: i64,
}

pub(crate) fn schema_to_columns(columns: &[SchemaColumn]) -> Vec<ColumnInfo> {
    columns
        .iter()
        .map(|col| ColumnInfo {
            name: col.name.clone(),
            column_type: col.column_type.clone(),
            nullable: col.nullable,
        })
        .collect()
}

/// The storage lifecycle engine: one instance per process.
pub struct StorageManager {
    layout: StorageLayout,
    catalog: Arc<Catalog>,
    locks: Arc<TableLockRegistry>,
    engine: EngineOptions,
}

impl StorageManager {
    pub fn new(
        layout: StorageLayout,
        catalog: Arc<Catalog>,
        locks: Arc<TableLockRegistry>,
        engine: EngineOptions,
    ) -> Self {
        Self {
            layout,
            catalog,
            locks,
            engine,
        }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn locks(&self) -> &Arc<TableLockRegistry> {
        &self.locks
    }

    pub fn engine_options(&self) -> &EngineOptions {
        &self.engine
    }

    /// Create the storage roots. Idempotent.
    pub fn init_backend(&self) -> Result<()> {
        std::fs::create_dir_all(self.layout.data_root())?;
        std::fs::create_dir_all(self.layout.snapshot_root())?;
        std::fs::create_dir_all(self.layout.files_root())?;
        Ok(())
    }

    // ========================================================================
    // Projects
    // ========================================================================

    pub fn create_project(&self, project_id: &str, name: &str) -> Result<()> {
        let dir = self.layout.project_dir(project_id);
        if dir.exists() {
            return Err(StorageError::conflict(format!(
                "Project {project_id} already exists"
            )));
        }
        std::fs::create_dir_all(&dir)?;

        if let Err(err) = self.catalog.create_project(project_id, name) {
            // Roll back the directory so no dangling project remains.
            if let Err(fs_err) = std::fs::remove_dir_all(&dir) {
                warn!(project_id, error = %fs_err, "rollback of project directory failed");
            }
            return Err(err.into());
        }
        Ok(())
    }

    /// Hard-delete a project: directory, files, snapshots, catalog rows,
    /// and lock entries.
    pub fn drop_project(&self, project_id: &str) -> Result<()> {
        if !self.layout.project_exists(project_id) {
            return Err(StorageError::not_found(format!(
                "Project {project_id} not found"
            )));
        }
        std::fs::remove_dir_all(self.layout.project_dir(project_id))?;

        let files_dir = self.layout.project_files_dir(project_id);
        if files_dir.exists() {
            std::fs::remove_dir_all(&files_dir)?;
        }
        let snapshots_dir = self.layout.snapshot_root().join(project_id);
        if snapshots_dir.exists() {
            std::fs::remove_dir_all(&snapshots_dir)?;
        }

        self.catalog.delete_project(project_id)?;
        self.locks.remove_project(project_id);
        Ok(())
    }

    // ========================================================================
    // Buckets
    // ========================================================================

    pub fn create_bucket(&self, project_id: &str, bucket_name: &str) -> Result<()> {
        if !self.layout.project_exists(project_id) {
            return Err(StorageError::not_found(format!(
                "Project {project_id} not found"
            )));
        }
        let dir = self.layout.bucket_dir(project_id, bucket_name);
        if dir.exists() {
            return Err(StorageError::conflict(format!(
                "Bucket {bucket_name} already exists in project {project_id}"
            )));
        }
        std::fs::create_dir_all(&dir)?;
        self.refresh_project_stats(project_id)?;
        Ok(())
    }

    /// Delete a bucket. Without `cascade`, refuses when tables remain.
    /// Under cascade, partially failed deletion returns the first error
    /// and leaves already-deleted tables deleted.
    pub fn delete_bucket(&self, project_id: &str, bucket_name: &str, cascade: bool) -> Result<()> {
        if !self.layout.bucket_exists(project_id, bucket_name) {
            return Err(StorageError::not_found(format!(
                "Bucket {bucket_name} not found in project {project_id}"
            )));
        }
        let tables = self.layout.list_tables(project_id, bucket_name)?;
        if !tables.is_empty() && !cascade {
            return Err(StorageError::conflict(format!(
                "Bucket {bucket_name} is not empty ({} tables)",
                tables.len()
            )));
        }
        for table in &tables {
            self.delete_table(project_id, bucket_name, table)?;
        }
        std::fs::remove_dir_all(self.layout.bucket_dir(project_id, bucket_name))?;
        self.locks.remove_bucket(project_id, bucket_name);
        self.refresh_project_stats(project_id)?;
        Ok(())
    }

    // ========================================================================
    // Tables
    // ========================================================================

    /// Create a table file holding the single `main.data` relation with
    /// the given columns and optional primary key.
    pub fn create_table(
        &self,
        project_id: &str,
        bucket_name: &str,
        table_name: &str,
        columns: &[ColumnInfo],
        primary_key: &[String],
    ) -> Result<TableInfo> {
        if !self.layout.bucket_exists(project_id, bucket_name) {
            return Err(StorageError::not_found(format!(
                "Bucket {bucket_name} not found in project {project_id}"
            )));
        }
        if columns.is_empty() {
            return Err(StorageError::invalid_argument(
                "Table must have at least one column",
            ));
        }
        // Primary key columns must exist in the column list.
        for pk_col in primary_key {
            if !columns.iter().any(|c| &c.name == pk_col) {
                return Err(StorageError::invalid_argument(format!(
                    "Primary key column '{pk_col}' not found in columns"
                )));
            }
        }

        let _lock = self.locks.acquire(project_id, bucket_name, table_name);
        if self.layout.table_exists(project_id, bucket_name, table_name) {
            return Err(StorageError::conflict(format!(
                "Table {table_name} already exists in bucket {bucket_name}"
            )));
        }

        let path = self.layout.table_path(project_id, bucket_name, table_name);
        let create_sql = build_create_table_sql(columns, primary_key);
        debug!(project_id, bucket = bucket_name, table = table_name, sql = %create_sql, "creating table");

        let result = (|| -> Result<()> {
            let conn = DbConnection::open(&path, cormorant_db::AccessMode::ReadWrite, &self.engine)?;
            conn.execute_batch(&create_sql)?;
            conn.checkpoint()?;
            Ok(())
        })();
        if let Err(err) = result {
            // Best-effort delete of the just-created file.
            let _ = std::fs::remove_file(&path);
            return Err(err);
        }

        self.refresh_project_stats(project_id)?;
        self.table_info_at(&path, bucket_name, table_name)
    }

    /// Delete a table file and its lock registration.
    pub fn delete_table(&self, project_id: &str, bucket_name: &str, table_name: &str) -> Result<()> {
        if !self.layout.table_exists(project_id, bucket_name, table_name) {
            return Err(StorageError::not_found(format!(
                "Table {table_name} not found in bucket {bucket_name}"
            )));
        }
        {
            let _lock = self.locks.acquire(project_id, bucket_name, table_name);
            let path = self.layout.table_path(project_id, bucket_name, table_name);
            std::fs::remove_file(&path)?;
            remove_side_files(&path);
        }
        self.locks.remove_table(project_id, bucket_name, table_name);
        self.catalog
            .remove_table_from_all_branches(project_id, bucket_name, table_name)?;
        self.refresh_project_stats(project_id)?;
        Ok(())
    }

    /// Read a table's full description from the given file path.
    pub fn table_info_at(&self, path: &Path, bucket_name: &str, table_name: &str) -> Result<TableInfo> {
        let conn = DbConnection::open(path, cormorant_db::AccessMode::ReadOnly, &self.engine)?;
        let schema = conn.table_schema(TABLE_DATA_NAME)?;
        let row_count =
            conn.query_scalar_i64(&format!("SELECT COUNT(*) FROM main.{TABLE_DATA_NAME}"), &[])?;
        let size_bytes = std::fs::metadata(path)?.len() as i64;
        Ok(TableInfo {
            name: table_name.to_string(),
            bucket: bucket_name.to_string(),
            columns: schema_to_columns(&schema.columns),
            primary_key: schema.primary_key,
            row_count,
            size_bytes,
        })
    }

    /// Read a main-branch table's description.
    pub fn table_info(
        &self,
        project_id: &str,
        bucket_name: &str,
        table_name: &str,
    ) -> Result<TableInfo> {
        if !self.layout.table_exists(project_id, bucket_name, table_name) {
            return Err(StorageError::not_found(format!(
                "Table {table_name} not found in bucket {bucket_name}"
            )));
        }
        let path = self.layout.table_path(project_id, bucket_name, table_name);
        self.table_info_at(&path, bucket_name, table_name)
    }

    pub fn list_tables(&self, project_id: &str, bucket_name: &str) -> Result<Vec<TableInfo>> {
        if !self.layout.bucket_exists(project_id, bucket_name) {
            return Err(StorageError::not_found(format!(
                "Bucket {bucket_name} not found in project {project_id}"
            )));
        }
        let mut infos = Vec::new();
        for table in self.layout.list_tables(project_id, bucket_name)? {
            let path = self.layout.table_path(project_id, bucket_name, &table);
            infos.push(self.table_info_at(&path, bucket_name, &table)?);
        }
        Ok(infos)
    }

    /// Preview: columns, first `limit` rows, and total row count.
    pub fn preview_at(&self, path: &Path, limit: i64) -> Result<(Vec<ColumnInfo>, Vec<Vec<serde_json::Value>>, i64)> {
        if !(1..=10_000).contains(&limit) {
            return Err(StorageError::invalid_argument(format!(
                "Preview limit must be between 1 and 10000, got {limit}"
            )));
        }
        let conn = DbConnection::open(path, cormorant_db::AccessMode::ReadOnly, &self.engine)?;
        let schema = conn.table_schema(TABLE_DATA_NAME)?;
        let total =
            conn.query_scalar_i64(&format!("SELECT COUNT(*) FROM main.{TABLE_DATA_NAME}"), &[])?;
        let rows = conn.query_all(
            &format!("SELECT * FROM main.{TABLE_DATA_NAME} LIMIT {limit}"),
            &[],
        )?;
        let json_rows: Vec<Vec<serde_json::Value>> = rows
            .iter()
            .map(|row| row.values().iter().map(|v| v.to_json()).collect())
            .collect();
        Ok((schema_to_columns(&schema.columns), json_rows, total))
    }

    // ========================================================================
    // Stats
    // ========================================================================

    /// Recompute bucket/table counts and total table bytes from disk.
    pub fn project_stats_from_disk(&self, project_id: &str) -> Result<ProjectStats> {
        let mut stats = ProjectStats::default();
        for bucket in self.layout.list_buckets(project_id)? {
            stats.bucket_count += 1;
            for table in self.layout.list_tables(project_id, &bucket)? {
                stats.table_count += 1;
                let path = self.layout.table_path(project_id, &bucket, &table);
                stats.size_bytes += std::fs::metadata(&path)?.len() as i64;
            }
        }
        Ok(stats)
    }

    /// Push disk-derived counters into the catalog.
    pub fn refresh_project_stats(&self, project_id: &str) -> Result<ProjectStats> {
        let stats = self.project_stats_from_disk(project_id)?;
        self.catalog.update_project_stats(
            project_id,
            stats.bucket_count,
            stats.table_count,
            stats.size_bytes,
        )?;
        Ok(stats)
    }

    /// Table count and bytes materialized locally by a branch.
    pub fn branch_stats(&self, project_id: &str, branch_id: &str) -> Result<(i64, i64)> {
        let branch_dir = self.layout.branch_dir(project_id, branch_id);
        let mut table_count = 0i64;
        let mut size_bytes = 0i64;
        if branch_dir.is_dir() {
            for entry in std::fs::read_dir(&branch_dir)? {
                let entry = entry?;
                if !entry.file_type()?.is_dir() {
                    continue;
                }
                for table in StorageLayout::list_tables_in_dir(&entry.path())? {
                    table_count += 1;
                    size_bytes += std::fs::metadata(entry.path().join(table))?.len() as i64;
                }
            }
        }
        Ok((table_count, size_bytes))
    }
}

/// Remove engine side files (`.wal`) left next to a deleted table file.
pub(crate) fn remove_side_files(table_path: &Path) {
    let wal = table_path.with_extension("wal");
    if wal.exists() {
        let _ = std::fs::remove_file(wal);
    }
}

/// `CREATE TABLE main.data (...)` with quoted identifiers, NOT NULL
/// markers, and an optional PRIMARY KEY constraint.
pub fn build_create_table_sql(columns: &[ColumnInfo], primary_key: &[String]) -> String {
    let mut defs: Vec<String> = columns
        .iter()
        .map(|col| {
            let nullable = if col.nullable { "" } else { " NOT NULL" };
            format!("{} {}{}", quote_ident(&col.name), col.column_type, nullable)
        })
        .collect();
    if !primary_key.is_empty() {
        let pk_cols: Vec<String> = primary_key.iter().map(|c| quote_ident(c)).collect();
        defs.push(format!("PRIMARY KEY ({})", pk_cols.join(", ")));
    }
    format!(
        "CREATE TABLE main.{TABLE_DATA_NAME} ({})",
        defs.join(", ")
    )
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use cormorant_catalog::Catalog;
    use tempfile::TempDir;

    pub fn manager() -> (TempDir, StorageManager) {
        let dir = TempDir::new().unwrap();
        let layout = StorageLayout::new(
            dir.path().join("data"),
            dir.path().join("snapshots"),
            dir.path().join("files"),
        );
        let catalog = Arc::new(Catalog::open(&layout.catalog_path()).unwrap());
        let manager = StorageManager::new(
            layout,
            catalog,
            Arc::new(TableLockRegistry::new()),
            EngineOptions::default(),
        );
        manager.init_backend().unwrap();
        (dir, manager)
    }

    pub fn users_columns() -> Vec<ColumnInfo> {
        vec![
            ColumnInfo {
                name: "id".into(),
                column_type: "INTEGER".into(),
                nullable: false,
            },
            ColumnInfo {
                name: "name".into(),
                column_type: "VARCHAR".into(),
                nullable: true,
            },
            ColumnInfo {
                name: "email".into(),
                column_type: "VARCHAR".into(),
                nullable: true,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{manager, users_columns};
    use super::*;

    #[test]
    fn test_build_create_table_sql() {
        let sql = build_create_table_sql(&users_columns(), &["id".to_string()]);
        assert_eq!(
            sql,
            "CREATE TABLE main.data (\"id\" INTEGER NOT NULL, \"name\" VARCHAR, \"email\" VARCHAR, PRIMARY KEY (\"id\"))"
        );
    }

    #[test]
    fn test_project_lifecycle() {
        let (_dir, manager) = manager();
        manager.create_project("p1", "One").unwrap();
        assert!(manager.layout().project_exists("p1"));

        let err = manager.create_project("p1", "Again").unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));

        manager.drop_project("p1").unwrap();
        assert!(!manager.layout().project_exists("p1"));
        assert!(manager.catalog().get_project("p1").unwrap().is_none());

        let err = manager.drop_project("p1").unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[test]
    fn test_table_lifecycle_and_counters() {
        let (_dir, manager) = manager();
        manager.create_project("p1", "One").unwrap();
        manager.create_bucket("p1", "in").unwrap();

        let info = manager
            .create_table("p1", "in", "users", &users_columns(), &["id".to_string()])
            .unwrap();
        assert_eq!(info.name, "users");
        assert_eq!(info.primary_key, vec!["id"]);
        assert_eq!(info.row_count, 0);
        assert!(info.size_bytes > 0);

        // Counters recomputed from disk after each mutation.
        let project = manager.catalog().get_project("p1").unwrap().unwrap();
        assert_eq!(project.bucket_count, 1);
        assert_eq!(project.table_count, 1);
        assert_eq!(project.size_bytes, info.size_bytes);

        manager.delete_table("p1", "in", "users").unwrap();
        assert!(!manager.layout().table_exists("p1", "in", "users"));
        let project = manager.catalog().get_project("p1").unwrap().unwrap();
        assert_eq!(project.table_count, 0);
    }

    #[test]
    fn test_create_table_invalid_pk() {
        let (_dir, manager) = manager();
        manager.create_project("p1", "One").unwrap();
        manager.create_bucket("p1", "in").unwrap();

        let err = manager
            .create_table("p1", "in", "users", &users_columns(), &["ghost".to_string()])
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidArgument(_)));
        // No dangling file.
        assert!(!manager.layout().table_exists("p1", "in", "users"));
    }

    #[test]
    fn test_duplicate_table_conflicts() {
        let (_dir, manager) = manager();
        manager.create_project("p1", "One").unwrap();
        manager.create_bucket("p1", "in").unwrap();
        manager
            .create_table("p1", "in", "users", &users_columns(), &[])
            .unwrap();
        let err = manager
            .create_table("p1", "in", "users", &users_columns(), &[])
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[test]
    fn test_delete_bucket_cascade_semantics() {
        let (_dir, manager) = manager();
        manager.create_project("p1", "One").unwrap();
        manager.create_bucket("p1", "in").unwrap();
        manager
            .create_table("p1", "in", "users", &users_columns(), &[])
            .unwrap();

        let err = manager.delete_bucket("p1", "in", false).unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));

        manager.delete_bucket("p1", "in", true).unwrap();
        assert!(!manager.layout().bucket_exists("p1", "in"));
        assert_eq!(manager.locks().registered_count(), 0);
    }

    #[test]
    fn test_preview_limits() {
        let (_dir, manager) = manager();
        manager.create_project("p1", "One").unwrap();
        manager.create_bucket("p1", "in").unwrap();
        manager
            .create_table("p1", "in", "users", &users_columns(), &["id".to_string()])
            .unwrap();

        let path = manager.layout().table_path("p1", "in", "users");
        {
            let conn = DbConnection::open_rw(&path).unwrap();
            conn.execute_batch(
                "INSERT INTO main.data VALUES (1, 'A', 'a@x'), (2, 'B', 'b@x'), (3, 'C', 'c@x')",
            )
            .unwrap();
        }

        let (columns, rows, total) = manager.preview_at(&path, 2).unwrap();
        assert_eq!(columns.len(), 3);
        assert_eq!(rows.len(), 2);
        assert_eq!(total, 3);
        assert_eq!(rows[0][1], serde_json::json!("A"));

        assert!(manager.preview_at(&path, 0).is_err());
        assert!(manager.preview_at(&path, 10_001).is_err());
    }
}
