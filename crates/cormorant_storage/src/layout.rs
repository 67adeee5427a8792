//! On-disk layout discipline.
//!
//! ```text
//! <root>/project_<id>/                          project directory
//! <root>/project_<id>/<bucket>/                 bucket directory
//! <root>/project_<id>/<bucket>/<table>          table file (one engine db)
//! <root>/project_<id>/branch_<id>/<bucket>/<t>  branched table copy
//! <root>/metadata.duckdb                        catalog
//! <snap-root>/<project>/<snap-id>/data.parquet  snapshot data
//! <files-root>/project_<id>/staging/            staged uploads
//! <files-root>/project_<id>/<yyyy>/<mm>/<dd>/   permanent files
//! ```

use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};

/// The canonical logical relation inside every table file. Callers never
/// parameterize it.
pub const TABLE_DATA_NAME: &str = "data";

/// Resolved storage roots.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    data_root: PathBuf,
    snapshot_root: PathBuf,
    files_root: PathBuf,
}

impl StorageLayout {
    pub fn new(data_root: PathBuf, snapshot_root: PathBuf, files_root: PathBuf) -> Self {
        Self {
            data_root,
            snapshot_root,
            files_root,
        }
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    pub fn snapshot_root(&self) -> &Path {
        &self.snapshot_root
    }

    pub fn files_root(&self) -> &Path {
        &self.files_root
    }

    /// Path of the metadata catalog database.
    pub fn catalog_path(&self) -> PathBuf {
        self.data_root.join("metadata.duckdb")
    }

    // ========================================================================
    // Project / bucket / table paths
    // ========================================================================

    pub fn project_dir(&self, project_id: &str) -> PathBuf {
        self.data_root.join(format!("project_{project_id}"))
    }

    pub fn bucket_dir(&self, project_id: &str, bucket_name: &str) -> PathBuf {
        self.project_dir(project_id).join(bucket_name)
    }

    pub fn table_path(&self, project_id: &str, bucket_name: &str, table_name: &str) -> PathBuf {
        self.bucket_dir(project_id, bucket_name).join(table_name)
    }

    pub fn branch_dir(&self, project_id: &str, branch_id: &str) -> PathBuf {
        self.project_dir(project_id).join(format!("branch_{branch_id}"))
    }

    pub fn branch_bucket_dir(
        &self,
        project_id: &str,
        branch_id: &str,
        bucket_name: &str,
    ) -> PathBuf {
        self.branch_dir(project_id, branch_id).join(bucket_name)
    }

    pub fn branch_table_path(
        &self,
        project_id: &str,
        branch_id: &str,
        bucket_name: &str,
        table_name: &str,
    ) -> PathBuf {
        self.branch_bucket_dir(project_id, branch_id, bucket_name)
            .join(table_name)
    }

    /// Workspace database file inside the project directory.
    pub fn workspace_db_path(&self, project_id: &str, workspace_id: &str) -> PathBuf {
        self.project_dir(project_id)
            .join(format!("workspace_{workspace_id}.duckdb"))
    }

    // ========================================================================
    // Existence by path (source of truth is disk)
    // ========================================================================

    pub fn project_exists(&self, project_id: &str) -> bool {
        self.project_dir(project_id).is_dir()
    }

    pub fn bucket_exists(&self, project_id: &str, bucket_name: &str) -> bool {
        self.bucket_dir(project_id, bucket_name).is_dir()
    }

    pub fn table_exists(&self, project_id: &str, bucket_name: &str, table_name: &str) -> bool {
        self.table_path(project_id, bucket_name, table_name).is_file()
    }

    // ========================================================================
    // Listing (skips branch dirs, workspace files, and engine side files)
    // ========================================================================

    /// Bucket directories of a project, sorted.
    pub fn list_buckets(&self, project_id: &str) -> std::io::Result<Vec<String>> {
        let mut buckets = Vec::new();
        for entry in std::fs::read_dir(self.project_dir(project_id))? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with("branch_") {
                continue;
            }
            buckets.push(name);
        }
        buckets.sort();
        Ok(buckets)
    }

    /// Table files in a bucket directory, sorted. Engine side files
    /// (`.wal`, `.tmp`) are not tables.
    pub fn list_tables_in_dir(dir: &Path) -> std::io::Result<Vec<String>> {
        let mut tables = Vec::new();
        if !dir.is_dir() {
            return Ok(tables);
        }
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(".wal") || name.ends_with(".tmp") || name.ends_with(".lock") {
                continue;
            }
            tables.push(name);
        }
        tables.sort();
        Ok(tables)
    }

    pub fn list_tables(&self, project_id: &str, bucket_name: &str) -> std::io::Result<Vec<String>> {
        Self::list_tables_in_dir(&self.bucket_dir(project_id, bucket_name))
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    pub fn snapshot_dir(&self, project_id: &str, snapshot_id: &str) -> PathBuf {
        self.snapshot_root.join(project_id).join(snapshot_id)
    }

    pub fn snapshot_data_path(&self, project_id: &str, snapshot_id: &str) -> PathBuf {
        self.snapshot_dir(project_id, snapshot_id).join("data.parquet")
    }

    pub fn snapshot_metadata_path(&self, project_id: &str, snapshot_id: &str) -> PathBuf {
        self.snapshot_dir(project_id, snapshot_id).join("metadata.json")
    }

    // ========================================================================
    // Files
    // ========================================================================

    pub fn project_files_dir(&self, project_id: &str) -> PathBuf {
        self.files_root.join(format!("project_{project_id}"))
    }

    pub fn staging_dir(&self, project_id: &str) -> PathBuf {
        self.project_files_dir(project_id).join("staging")
    }

    /// Date-organized permanent directory for a given instant.
    pub fn permanent_dir(&self, project_id: &str, now: DateTime<Utc>) -> PathBuf {
        self.project_files_dir(project_id).join(format!(
            "{:04}/{:02}/{:02}",
            now.year(),
            now.month(),
            now.day()
        ))
    }

    /// Export output path:
    /// `project_<pid>/<yyyy>/<mm>/<dd>/<uuid>_export_<table>_<stamp>.<ext>`.
    /// Returns (absolute path, path relative to the files root, file name).
    pub fn export_file_path(
        &self,
        project_id: &str,
        table_name: &str,
        file_id: &str,
        extension: &str,
        now: DateTime<Utc>,
    ) -> (PathBuf, String, String) {
        let stamp = now.format("%Y%m%d_%H%M%S");
        let file_name = format!("export_{table_name}_{stamp}.{extension}");
        let dir = self.permanent_dir(project_id, now);
        let absolute = dir.join(format!("{file_id}_{file_name}"));
        let relative = absolute
            .strip_prefix(&self.files_root)
            .expect("export path is under the files root")
            .to_string_lossy()
            .to_string();
        (absolute, relative, file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn layout(dir: &TempDir) -> StorageLayout {
        StorageLayout::new(
            dir.path().join("data"),
            dir.path().join("snapshots"),
            dir.path().join("files"),
        )
    }

    #[test]
    fn test_path_discipline() {
        let dir = TempDir::new().unwrap();
        let layout = layout(&dir);

        assert!(layout
            .table_path("p1", "in", "users")
            .ends_with("project_p1/in/users"));
        assert!(layout
            .branch_table_path("p1", "dev1", "in", "users")
            .ends_with("project_p1/branch_dev1/in/users"));
        assert!(layout
            .snapshot_data_path("p1", "snap_users_x")
            .ends_with("p1/snap_users_x/data.parquet"));
    }

    #[test]
    fn test_existence_by_path() {
        let dir = TempDir::new().unwrap();
        let layout = layout(&dir);

        assert!(!layout.project_exists("p1"));
        std::fs::create_dir_all(layout.bucket_dir("p1", "in")).unwrap();
        assert!(layout.project_exists("p1"));
        assert!(layout.bucket_exists("p1", "in"));
        assert!(!layout.table_exists("p1", "in", "users"));

        std::fs::write(layout.table_path("p1", "in", "users"), b"").unwrap();
        assert!(layout.table_exists("p1", "in", "users"));
    }

    #[test]
    fn test_listing_skips_branch_dirs_and_side_files() {
        let dir = TempDir::new().unwrap();
        let layout = layout(&dir);
        std::fs::create_dir_all(layout.bucket_dir("p1", "in")).unwrap();
        std::fs::create_dir_all(layout.bucket_dir("p1", "out")).unwrap();
        std::fs::create_dir_all(layout.branch_dir("p1", "dev1")).unwrap();
        std::fs::write(layout.table_path("p1", "in", "users"), b"").unwrap();
        std::fs::write(layout.table_path("p1", "in", "users.wal"), b"").unwrap();

        assert_eq!(layout.list_buckets("p1").unwrap(), vec!["in", "out"]);
        assert_eq!(layout.list_tables("p1", "in").unwrap(), vec!["users"]);
    }

    #[test]
    fn test_export_file_path_shape() {
        let dir = TempDir::new().unwrap();
        let layout = layout(&dir);
        let now = chrono::DateTime::parse_from_rfc3339("2026-08-01T12:30:45Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let (abs, rel, name) = layout.export_file_path("p1", "users", "uuid-1", "csv.gz", now);
        assert_eq!(name, "export_users_20260801_123045.csv.gz");
        assert_eq!(rel, "project_p1/2026/08/01/uuid-1_export_users_20260801_123045.csv.gz");
        assert!(abs.ends_with(&rel));
    }
}
