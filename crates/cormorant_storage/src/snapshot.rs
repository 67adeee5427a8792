//! Snapshot engine: create, restore, delete, and pre-destructive
//! auto-snapshots.
//!
//! A snapshot is a zstd-compressed Parquet export of one table plus a
//! `metadata.json` sidecar for crash recovery. A snapshot exists only
//! while its file is present; deletion removes both the directory and the
//! catalog row. Snapshot operations are restricted to main.

use chrono::{DateTime, Duration, Utc};
use cormorant_catalog::{format_rfc3339, now_rfc3339, SnapshotRecord};
use cormorant_db::{quote_ident, quote_literal, DbConnection};
use cormorant_protocol::http_types::SnapshotType;
use tracing::{info, warn};

use crate::layout::TABLE_DATA_NAME;
use crate::project::StorageManager;
use crate::snapshot_config::{
    retention_days, should_create_snapshot, SnapshotTrigger,
};
use crate::{Result, StorageError};

/// Mint a snapshot id: `snap_<table>_<UTC YmdHMS>_<ms>`.
pub fn snapshot_id(table_name: &str, now: DateTime<Utc>) -> String {
    format!(
        "snap_{}_{}_{:03}",
        table_name,
        now.format("%Y%m%d_%H%M%S"),
        now.timestamp_subsec_millis()
    )
}

impl StorageManager {
    /// Create a snapshot of a main-branch table under its lock.
    ///
    /// Refused when the resolved configuration has snapshots disabled.
    pub fn create_snapshot(
        &self,
        project_id: &str,
        bucket_name: &str,
        table_name: &str,
        snapshot_type: SnapshotType,
        description: Option<&str>,
    ) -> Result<SnapshotRecord> {
        if !self.layout().table_exists(project_id, bucket_name, table_name) {
            return Err(StorageError::not_found(format!(
                "Table {table_name} not found in bucket {bucket_name}"
            )));
        }

        let (config, _) = crate::snapshot_config::resolve_snapshot_config(
            self.catalog(),
            project_id,
            Some(bucket_name),
            Some(table_name),
        )?;
        if !config.enabled {
            return Err(StorageError::invalid_argument(format!(
                "Snapshots are disabled for table {bucket_name}.{table_name}"
            )));
        }

        let _lock = self.locks().acquire(project_id, bucket_name, table_name);

        let now = Utc::now();
        let id = snapshot_id(table_name, now);
        let snapshot_dir = self.layout().snapshot_dir(project_id, &id);
        std::fs::create_dir_all(&snapshot_dir)?;
        let data_path = self.layout().snapshot_data_path(project_id, &id);

        let table_path = self.layout().table_path(project_id, bucket_name, table_name);
        let export = (|| -> Result<(i64, serde_json::Value)> {
            let conn = DbConnection::open(
                &table_path,
                cormorant_db::AccessMode::ReadOnly,
                self.engine_options(),
            )?;
            let schema = conn.table_schema(TABLE_DATA_NAME)?;
            let schema_json = serde_json::json!({
                "columns": crate::project::schema_to_columns(&schema.columns),
                "primary_key": schema.primary_key,
            });
            conn.execute_batch(&format!(
                "COPY main.{TABLE_DATA_NAME} TO {} (FORMAT PARQUET, COMPRESSION ZSTD)",
                quote_literal(&data_path.to_string_lossy())
            ))?;
            let row_count =
                conn.query_scalar_i64(&format!("SELECT COUNT(*) FROM main.{TABLE_DATA_NAME}"), &[])?;
            Ok((row_count, schema_json))
        })();
        let (row_count, schema_json) = match export {
            Ok(ok) => ok,
            Err(err) => {
                // A half-written export is an orphan; remove the directory.
                let _ = std::fs::remove_dir_all(&snapshot_dir);
                return Err(err);
            }
        };

        let size_bytes = std::fs::metadata(&data_path)?.len() as i64;
        let retention =
            retention_days(self.catalog(), project_id, Some(bucket_name), Some(table_name), snapshot_type)?;
        let expires_at = format_rfc3339(now + Duration::days(retention as i64));

        let record = SnapshotRecord {
            id: id.clone(),
            project_id: project_id.to_string(),
            bucket_name: bucket_name.to_string(),
            table_name: table_name.to_string(),
            snapshot_type,
            parquet_path: format!("{project_id}/{id}"),
            row_count,
            size_bytes,
            schema_json,
            created_at: now_rfc3339(),
            expires_at: Some(expires_at),
            description: description.map(str::to_string),
        };

        // Sidecar with all snapshot fields, for recovery if the catalog
        // row is lost.
        let sidecar = serde_json::json!({
            "snapshot_id": record.id,
            "project_id": record.project_id,
            "bucket_name": record.bucket_name,
            "table_name": record.table_name,
            "snapshot_type": record.snapshot_type.as_str(),
            "row_count": record.row_count,
            "size_bytes": record.size_bytes,
            "created_at": record.created_at,
            "expires_at": record.expires_at,
            "description": record.description,
            "schema": record.schema_json,
        });
        std::fs::write(
            self.layout().snapshot_metadata_path(project_id, &id),
            serde_json::to_vec_pretty(&sidecar)
                .map_err(|e| StorageError::invalid_argument(e.to_string()))?,
        )?;

        if let Err(err) = self.catalog().create_snapshot(&record) {
            let _ = std::fs::remove_dir_all(&snapshot_dir);
            return Err(err.into());
        }

        info!(
            snapshot_id = %id,
            project_id,
            bucket = bucket_name,
            table = table_name,
            snapshot_type = snapshot_type.as_str(),
            row_count,
            size_bytes,
            "snapshot created"
        );
        Ok(record)
    }

    /// Restore a snapshot. Target defaults to the source table; restoring
    /// over an existing table is allowed only in place (target == source),
    /// where the relation is replaced. Returns the restored row count and
    /// the target location.
    pub fn restore_snapshot(
        &self,
        project_id: &str,
        snapshot_id: &str,
        target_bucket: Option<&str>,
        target_table: Option<&str>,
    ) -> Result<(String, String, i64)> {
        let snapshot = self
            .catalog()
            .get_snapshot(project_id, snapshot_id)?
            .ok_or_else(|| {
                StorageError::not_found(format!("Snapshot {snapshot_id} not found"))
            })?;

        let target_bucket = target_bucket.unwrap_or(&snapshot.bucket_name).to_string();
        let target_table = target_table.unwrap_or(&snapshot.table_name).to_string();

        if !self.layout().bucket_exists(project_id, &target_bucket) {
            return Err(StorageError::not_found(format!(
                "Target bucket {target_bucket} not found"
            )));
        }

        let same_location =
            target_bucket == snapshot.bucket_name && target_table == snapshot.table_name;
        if self
            .layout()
            .table_exists(project_id, &target_bucket, &target_table)
            && !same_location
        {
            return Err(StorageError::conflict(format!(
                "Table {target_table} already exists in bucket {target_bucket}"
            )));
        }

        let data_path = self.layout().snapshot_data_path(project_id, snapshot_id);
        if !data_path.is_file() {
            return Err(StorageError::not_found(format!(
                "Snapshot file not found at {}",
                data_path.display()
            )));
        }

        let _lock = self
            .locks()
            .acquire(project_id, &target_bucket, &target_table);
        let table_path = self
            .layout()
            .table_path(project_id, &target_bucket, &target_table);

        let conn = DbConnection::open(
            &table_path,
            cormorant_db::AccessMode::ReadWrite,
            self.engine_options(),
        )?;
        conn.execute_batch(&format!(
            "CREATE OR REPLACE TABLE main.{TABLE_DATA_NAME} AS SELECT * FROM read_parquet({})",
            quote_literal(&data_path.to_string_lossy())
        ))?;

        // Re-apply the primary key, best effort: the engine cannot always
        // add a constraint after the fact.
        let primary_key: Vec<String> = snapshot
            .schema_json
            .get("primary_key")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        if !primary_key.is_empty() {
            let pk_cols: Vec<String> = primary_key.iter().map(|c| quote_ident(c)).collect();
            let alter = format!(
                "ALTER TABLE main.{TABLE_DATA_NAME} ADD PRIMARY KEY ({})",
                pk_cols.join(", ")
            );
            if let Err(err) = conn.execute_batch(&alter) {
                warn!(
                    snapshot_id,
                    primary_key = ?primary_key,
                    error = %err,
                    "failed to re-apply primary key after restore"
                );
            }
        }

        let row_count =
            conn.query_scalar_i64(&format!("SELECT COUNT(*) FROM main.{TABLE_DATA_NAME}"), &[])?;
        conn.checkpoint()?;
        drop(conn);

        self.refresh_project_stats(project_id)?;

        info!(
            snapshot_id,
            project_id,
            target_bucket = %target_bucket,
            target_table = %target_table,
            row_count,
            "snapshot restored"
        );
        Ok((target_bucket, target_table, row_count))
    }

    /// Delete a snapshot: directory first, then the catalog row.
    pub fn delete_snapshot(&self, project_id: &str, snapshot_id: &str) -> Result<()> {
        let snapshot = self
            .catalog()
            .get_snapshot(project_id, snapshot_id)?
            .ok_or_else(|| {
                StorageError::not_found(format!("Snapshot {snapshot_id} not found"))
            })?;

        let dir = self.layout().snapshot_dir(project_id, &snapshot.id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        self.catalog().delete_snapshot(&snapshot.id)?;
        Ok(())
    }

    /// Take the matching auto snapshot before a destructive operation iff
    /// the resolved trigger (and the master switch) is on. A snapshot
    /// failure aborts the destructive operation by propagating the error.
    ///
    /// Returns the snapshot id when one was taken.
    pub fn auto_snapshot_before(
        &self,
        project_id: &str,
        bucket_name: &str,
        table_name: &str,
        trigger: SnapshotTrigger,
    ) -> Result<Option<String>> {
        if !should_create_snapshot(self.catalog(), project_id, bucket_name, table_name, trigger)? {
            return Ok(None);
        }
        let record = self.create_snapshot(
            project_id,
            bucket_name,
            table_name,
            trigger.snapshot_type(),
            None,
        )?;
        Ok(Some(record.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::test_support::{manager, users_columns};
    use cormorant_catalog::SnapshotFilter;
    use cormorant_protocol::SnapshotConfigPatch;

    fn setup_table(manager: &StorageManager) {
        manager.create_project("p1", "One").unwrap();
        manager.create_bucket("p1", "in").unwrap();
        manager
            .create_table("p1", "in", "users", &users_columns(), &["id".to_string()])
            .unwrap();
        let path = manager.layout().table_path("p1", "in", "users");
        let conn = DbConnection::open_rw(&path).unwrap();
        conn.execute_batch(
            "INSERT INTO main.data VALUES (1, 'A', 'a@x'), (2, 'B', 'b@x'), (3, 'C', 'c@x')",
        )
        .unwrap();
        conn.checkpoint().unwrap();
    }

    #[test]
    fn test_snapshot_id_format() {
        let now = chrono::DateTime::parse_from_rfc3339("2026-08-01T12:30:45.123Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(snapshot_id("users", now), "snap_users_20260801_123045_123");
    }

    #[test]
    fn test_create_snapshot_writes_data_and_sidecar() {
        let (_dir, manager) = manager();
        setup_table(&manager);

        let record = manager
            .create_snapshot("p1", "in", "users", SnapshotType::Manual, Some("before load"))
            .unwrap();
        assert_eq!(record.row_count, 3);
        assert!(record.size_bytes > 0);
        assert!(record.expires_at.is_some());

        assert!(manager
            .layout()
            .snapshot_data_path("p1", &record.id)
            .is_file());
        let sidecar: serde_json::Value = serde_json::from_slice(
            &std::fs::read(manager.layout().snapshot_metadata_path("p1", &record.id)).unwrap(),
        )
        .unwrap();
        assert_eq!(sidecar["snapshot_id"], record.id.as_str());
        assert_eq!(sidecar["row_count"], 3);
        assert_eq!(sidecar["schema"]["primary_key"][0], "id");
    }

    #[test]
    fn test_snapshot_refused_when_disabled() {
        let (_dir, manager) = manager();
        setup_table(&manager);
        manager
            .catalog()
            .put_snapshot_settings(
                "table",
                "p1/in/users",
                &SnapshotConfigPatch {
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();

        let err = manager
            .create_snapshot("p1", "in", "users", SnapshotType::Manual, None)
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidArgument(_)));
    }

    #[test]
    fn test_restore_roundtrip() {
        let (_dir, manager) = manager();
        setup_table(&manager);
        let record = manager
            .create_snapshot("p1", "in", "users", SnapshotType::Manual, None)
            .unwrap();

        // Mutate, then restore in place.
        let path = manager.layout().table_path("p1", "in", "users");
        {
            let conn = DbConnection::open_rw(&path).unwrap();
            conn.execute_batch("DELETE FROM main.data WHERE id > 1").unwrap();
        }
        let (bucket, table, rows) = manager
            .restore_snapshot("p1", &record.id, None, None)
            .unwrap();
        assert_eq!((bucket.as_str(), table.as_str(), rows), ("in", "users", 3));

        let conn = DbConnection::open_ro(&path).unwrap();
        assert_eq!(
            conn.query_scalar_i64("SELECT COUNT(*) FROM main.data", &[]).unwrap(),
            3
        );
    }

    #[test]
    fn test_restore_to_foreign_existing_table_conflicts() {
        let (_dir, manager) = manager();
        setup_table(&manager);
        manager
            .create_table("p1", "in", "others", &users_columns(), &[])
            .unwrap();
        let record = manager
            .create_snapshot("p1", "in", "users", SnapshotType::Manual, None)
            .unwrap();

        let err = manager
            .restore_snapshot("p1", &record.id, Some("in"), Some("others"))
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));

        // Restoring to a fresh name works.
        let (_, table, rows) = manager
            .restore_snapshot("p1", &record.id, Some("in"), Some("users_copy"))
            .unwrap();
        assert_eq!(table, "users_copy");
        assert_eq!(rows, 3);
        assert!(manager.layout().table_exists("p1", "in", "users_copy"));
    }

    #[test]
    fn test_delete_snapshot_removes_files_and_row() {
        let (_dir, manager) = manager();
        setup_table(&manager);
        let record = manager
            .create_snapshot("p1", "in", "users", SnapshotType::Manual, None)
            .unwrap();

        manager.delete_snapshot("p1", &record.id).unwrap();
        assert!(!manager.layout().snapshot_dir("p1", &record.id).exists());
        assert!(manager.catalog().get_snapshot("p1", &record.id).unwrap().is_none());

        let err = manager.delete_snapshot("p1", &record.id).unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[test]
    fn test_auto_snapshot_respects_triggers() {
        let (_dir, manager) = manager();
        setup_table(&manager);

        // drop_table trigger defaults on.
        let id = manager
            .auto_snapshot_before("p1", "in", "users", SnapshotTrigger::DropTable)
            .unwrap();
        let id = id.expect("auto snapshot expected");
        let record = manager.catalog().get_snapshot("p1", &id).unwrap().unwrap();
        assert_eq!(record.snapshot_type, SnapshotType::AutoPredrop);

        // truncate trigger defaults off.
        assert!(manager
            .auto_snapshot_before("p1", "in", "users", SnapshotTrigger::TruncateTable)
            .unwrap()
            .is_none());

        let filter = SnapshotFilter {
            snapshot_type: Some(SnapshotType::AutoPredrop),
            ..Default::default()
        };
        assert_eq!(manager.catalog().count_snapshots("p1", &filter).unwrap(), 1);
    }
}
