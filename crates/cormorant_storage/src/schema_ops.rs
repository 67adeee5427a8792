//! Schema evolution on the single table relation.
//!
//! Every operation runs under the table lock on the branch-resolved write
//! path (copy-on-write applies). Pre-destructive auto snapshots for
//! `drop_column` and unfiltered `delete_rows` are taken by the caller
//! before invoking these, since snapshots are main-only.

use cormorant_db::{quote_ident, sql_guard, DbConnection};
use tracing::debug;

use crate::branch::BranchContext;
use crate::layout::TABLE_DATA_NAME;
use crate::project::StorageManager;
use crate::{Result, StorageError};

impl StorageManager {
    fn with_write_conn<T>(
        &self,
        ctx: &BranchContext,
        bucket_name: &str,
        table_name: &str,
        f: impl FnOnce(&DbConnection) -> Result<T>,
    ) -> Result<T> {
        if !self.read_table_path(ctx, bucket_name, table_name)?.is_file() {
            return Err(StorageError::not_found(format!(
                "Table {table_name} not found in bucket {bucket_name}"
            )));
        }
        let _lock = self
            .locks()
            .acquire(&ctx.project_id, bucket_name, table_name);
        let path = self.write_table_path(ctx, bucket_name, table_name)?;
        let conn = DbConnection::open(
            &path,
            cormorant_db::AccessMode::ReadWrite,
            self.engine_options(),
        )?;
        let result = f(&conn)?;
        conn.checkpoint()?;
        drop(conn);
        if ctx.is_main() {
            self.refresh_project_stats(&ctx.project_id)?;
        }
        Ok(result)
    }

    pub fn add_column(
        &self,
        ctx: &BranchContext,
        bucket_name: &str,
        table_name: &str,
        column_name: &str,
        column_type: &str,
    ) -> Result<()> {
        self.with_write_conn(ctx, bucket_name, table_name, |conn| {
            let sql = format!(
                "ALTER TABLE main.{TABLE_DATA_NAME} ADD COLUMN {} {column_type}",
                quote_ident(column_name)
            );
            debug!(sql = %sql, "add column");
            conn.execute_batch(&sql)?;
            Ok(())
        })
    }

    pub fn drop_column(
        &self,
        ctx: &BranchContext,
        bucket_name: &str,
        table_name: &str,
        column_name: &str,
    ) -> Result<()> {
        self.with_write_conn(ctx, bucket_name, table_name, |conn| {
            let sql = format!(
                "ALTER TABLE main.{TABLE_DATA_NAME} DROP COLUMN {}",
                quote_ident(column_name)
            );
            debug!(sql = %sql, "drop column");
            conn.execute_batch(&sql)?;
            Ok(())
        })
    }

    pub fn alter_column_type(
        &self,
        ctx: &BranchContext,
        bucket_name: &str,
        table_name: &str,
        column_name: &str,
        new_type: &str,
    ) -> Result<()> {
        self.with_write_conn(ctx, bucket_name, table_name, |conn| {
            let sql = format!(
                "ALTER TABLE main.{TABLE_DATA_NAME} ALTER COLUMN {} SET DATA TYPE {new_type}",
                quote_ident(column_name)
            );
            debug!(sql = %sql, "alter column type");
            conn.execute_batch(&sql)?;
            Ok(())
        })
    }

    /// Add a primary key to the existing relation. Duplicate values in
    /// the key columns surface as a conflict.
    pub fn add_primary_key(
        &self,
        ctx: &BranchContext,
        bucket_name: &str,
        table_name: &str,
        columns: &[String],
    ) -> Result<()> {
        if columns.is_empty() {
            return Err(StorageError::invalid_argument(
                "Primary key needs at least one column",
            ));
        }
        self.with_write_conn(ctx, bucket_name, table_name, |conn| {
            let schema = conn.table_schema(TABLE_DATA_NAME)?;
            for column in columns {
                if !schema.columns.iter().any(|c| &c.name == column) {
                    return Err(StorageError::invalid_argument(format!(
                        "Primary key column '{column}' not found in columns"
                    )));
                }
            }
            let pk_cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
            let sql = format!(
                "ALTER TABLE main.{TABLE_DATA_NAME} ADD PRIMARY KEY ({})",
                pk_cols.join(", ")
            );
            debug!(sql = %sql, "add primary key");
            conn.execute_batch(&sql).map_err(|err| {
                if err.is_constraint_violation() {
                    StorageError::conflict(format!("Cannot add primary key: {err}"))
                } else {
                    err.into()
                }
            })?;
            Ok(())
        })
    }

    /// Drop the primary key by rebuilding the relation; CTAS drops
    /// constraints.
    pub fn drop_primary_key(
        &self,
        ctx: &BranchContext,
        bucket_name: &str,
        table_name: &str,
    ) -> Result<()> {
        self.with_write_conn(ctx, bucket_name, table_name, |conn| {
            conn.execute_batch(&format!(
                "CREATE TEMPORARY TABLE __rebuild AS SELECT * FROM main.{TABLE_DATA_NAME}; \
                 DROP TABLE main.{TABLE_DATA_NAME}; \
                 CREATE TABLE main.{TABLE_DATA_NAME} AS SELECT * FROM __rebuild; \
                 DROP TABLE __rebuild;"
            ))?;
            Ok(())
        })
    }

    /// Delete rows, optionally filtered. Returns the number deleted.
    /// Callers consult the `delete_all_rows` trigger before an unfiltered
    /// delete.
    pub fn delete_rows(
        &self,
        ctx: &BranchContext,
        bucket_name: &str,
        table_name: &str,
        filter: Option<&str>,
    ) -> Result<i64> {
        if let Some(filter) = filter {
            sql_guard::validate_where_filter(filter)
                .map_err(|err| StorageError::invalid_argument(err.to_string()))?;
        }
        self.with_write_conn(ctx, bucket_name, table_name, |conn| {
            let sql = match filter {
                Some(filter) => {
                    format!("DELETE FROM main.{TABLE_DATA_NAME} WHERE {filter}")
                }
                None => format!("DELETE FROM main.{TABLE_DATA_NAME}"),
            };
            debug!(sql = %sql, "delete rows");
            let deleted = conn.execute(&sql, &[])?;
            Ok(deleted as i64)
        })
    }

    /// Truncate: delete all rows without consulting a filter.
    pub fn truncate_table(
        &self,
        ctx: &BranchContext,
        bucket_name: &str,
        table_name: &str,
    ) -> Result<i64> {
        self.delete_rows(ctx, bucket_name, table_name, None)
    }
}
