//! Snapshot rows.

use cormorant_db::{DbRow, DbValue};
use cormorant_protocol::http_types::SnapshotType;

use crate::{Catalog, CatalogError, Result};

#[derive(Debug, Clone)]
pub struct SnapshotRecord {
    pub id: String,
    pub project_id: String,
    pub bucket_name: String,
    pub table_name: String,
    pub snapshot_type: SnapshotType,
    /// Relative path of the snapshot directory under the snapshot root.
    pub parquet_path: String,
    pub row_count: i64,
    pub size_bytes: i64,
    /// `{columns: [...], primary_key: [...]}` as captured at export time.
    pub schema_json: serde_json::Value,
    pub created_at: String,
    pub expires_at: Option<String>,
    pub description: Option<String>,
}

/// List/count filter; `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct SnapshotFilter {
    pub bucket_name: Option<String>,
    pub table_name: Option<String>,
    pub snapshot_type: Option<SnapshotType>,
}

const SNAPSHOT_COLUMNS: &str = "id, project_id, bucket_name, table_name, snapshot_type, parquet_path, row_count, size_bytes, schema_json, created_at, expires_at, description";

fn row_to_snapshot(row: &DbRow) -> Result<SnapshotRecord> {
    let type_raw: String = row.get(4)?;
    let snapshot_type = SnapshotType::parse(&type_raw).ok_or_else(|| {
        CatalogError::invalid_state(format!("Unknown snapshot type '{type_raw}'"))
    })?;
    let schema_raw: String = row.get(8)?;
    Ok(SnapshotRecord {
        id: row.get(0)?,
        project_id: row.get(1)?,
        bucket_name: row.get(2)?,
        table_name: row.get(3)?,
        snapshot_type,
        parquet_path: row.get(5)?,
        row_count: row.get(6)?,
        size_bytes: row.get(7)?,
        schema_json: serde_json::from_str(&schema_raw)?,
        created_at: row.get(9)?,
        expires_at: row.get(10)?,
        description: row.get(11)?,
    })
}

fn filter_clause(filter: &SnapshotFilter, params: &mut Vec<DbValue>) -> String {
    let mut clause = String::new();
    if let Some(bucket) = &filter.bucket_name {
        clause.push_str(" AND bucket_name = ?");
        params.push(DbValue::from(bucket.as_str()));
    }
    if let Some(table) = &filter.table_name {
        clause.push_str(" AND table_name = ?");
        params.push(DbValue::from(table.as_str()));
    }
    if let Some(ty) = filter.snapshot_type {
        clause.push_str(" AND snapshot_type = ?");
        params.push(DbValue::from(ty.as_str()));
    }
    clause
}

impl Catalog {
    pub fn create_snapshot(&self, record: &SnapshotRecord) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            &format!(
                "INSERT INTO snapshots ({SNAPSHOT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            &[
                DbValue::from(record.id.as_str()),
                DbValue::from(record.project_id.as_str()),
                DbValue::from(record.bucket_name.as_str()),
                DbValue::from(record.table_name.as_str()),
                DbValue::from(record.snapshot_type.as_str()),
                DbValue::from(record.parquet_path.as_str()),
                DbValue::from(record.row_count),
                DbValue::from(record.size_bytes),
                DbValue::from(serde_json::to_string(&record.schema_json)?),
                DbValue::from(record.created_at.as_str()),
                DbValue::from(record.expires_at.as_deref()),
                DbValue::from(record.description.as_deref()),
            ],
        )?;
        Ok(())
    }

    pub fn get_snapshot(
        &self,
        project_id: &str,
        snapshot_id: &str,
    ) -> Result<Option<SnapshotRecord>> {
        let conn = self.conn();
        let row = conn.query_optional(
            &format!("SELECT {SNAPSHOT_COLUMNS} FROM snapshots WHERE project_id = ? AND id = ?"),
            &[DbValue::from(project_id), DbValue::from(snapshot_id)],
        )?;
        row.as_ref().map(row_to_snapshot).transpose()
    }

    pub fn list_snapshots(
        &self,
        project_id: &str,
        filter: &SnapshotFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<SnapshotRecord>> {
        let mut params = vec![DbValue::from(project_id)];
        let clause = filter_clause(filter, &mut params);
        params.push(DbValue::from(limit));
        params.push(DbValue::from(offset));

        let conn = self.conn();
        let rows = conn.query_all(
            &format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM snapshots WHERE project_id = ?{clause} \
                 ORDER BY created_at DESC LIMIT ? OFFSET ?"
            ),
            &params,
        )?;
        rows.iter().map(row_to_snapshot).collect()
    }

    pub fn count_snapshots(&self, project_id: &str, filter: &SnapshotFilter) -> Result<i64> {
        let mut params = vec![DbValue::from(project_id)];
        let clause = filter_clause(filter, &mut params);
        let conn = self.conn();
        Ok(conn.query_scalar_i64(
            &format!("SELECT COUNT(*) FROM snapshots WHERE project_id = ?{clause}"),
            &params,
        )?)
    }

    pub fn delete_snapshot(&self, snapshot_id: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "DELETE FROM snapshots WHERE id = ?",
            &[DbValue::from(snapshot_id)],
        )?;
        Ok(())
    }
}
