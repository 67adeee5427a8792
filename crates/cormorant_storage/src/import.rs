//! Import pipeline: stage, transform, cleanup.
//!
//! All three stages run on one connection under the target table lock:
//!
//! 1. STAGE: a transient staging relation mirroring the target's columns
//!    is bulk-loaded from the staged file with the engine's native loader.
//! 2. TRANSFORM: non-incremental loads clear the target first; with a
//!    primary key, the dedup mode picks the merge statement.
//! 3. CLEANUP: the staging relation is dropped and the load committed.

use std::path::Path;

use cormorant_db::{quote_ident, quote_literal, DbConnection};
use cormorant_protocol::http_types::{CsvOptions, DedupMode, FileFormat, ImportOptions};
use tracing::{debug, info};

use crate::branch::BranchContext;
use crate::layout::TABLE_DATA_NAME;
use crate::project::StorageManager;
use crate::{Result, StorageError};

/// Name of the transient staging relation.
const STAGING_TABLE: &str = "staging";

/// Observables reported after a completed import.
#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub imported_rows: i64,
    pub table_rows_after: i64,
    pub table_size_bytes: i64,
    pub staging_rows: i64,
    pub warnings: Vec<String>,
}

/// `COPY staging FROM '<file>' (...)` with caller-supplied CSV options.
pub(crate) fn build_copy_from_sql(
    file_path: &Path,
    format: FileFormat,
    csv_options: Option<&CsvOptions>,
) -> String {
    let mut options: Vec<String> = Vec::new();
    match format {
        FileFormat::Csv => {
            options.push("FORMAT CSV".to_string());
            match csv_options {
                Some(opts) => {
                    if let Some(delimiter) = &opts.delimiter {
                        options.push(format!("DELIMITER {}", quote_literal(delimiter)));
                    }
                    if let Some(quote) = &opts.quote {
                        options.push(format!("QUOTE {}", quote_literal(quote)));
                    }
                    if let Some(escape) = &opts.escape {
                        options.push(format!("ESCAPE {}", quote_literal(escape)));
                    }
                    if let Some(header) = opts.header {
                        options.push(format!("HEADER {header}"));
                    }
                    if let Some(null_string) = &opts.null_string {
                        options.push(format!("NULLSTR {}", quote_literal(null_string)));
                    }
                }
                None => options.push("HEADER true".to_string()),
            }
        }
        FileFormat::Parquet => options.push("FORMAT PARQUET".to_string()),
    }
    format!(
        "COPY {STAGING_TABLE} FROM {} ({})",
        quote_literal(&file_path.to_string_lossy()),
        options.join(", ")
    )
}

/// Merge statements for the TRANSFORM stage.
pub(crate) fn build_dedup_sql(
    target_columns: &[String],
    primary_key: &[String],
    dedup_mode: DedupMode,
) -> Vec<String> {
    // No primary key: plain insert, no dedup possible.
    if primary_key.is_empty() {
        return vec![format!(
            "INSERT INTO main.{TABLE_DATA_NAME} SELECT * FROM {STAGING_TABLE}"
        )];
    }

    match dedup_mode {
        // A key collision surfaces as a constraint violation.
        DedupMode::FailOnDuplicates | DedupMode::InsertDuplicates => vec![format!(
            "INSERT INTO main.{TABLE_DATA_NAME} SELECT * FROM {STAGING_TABLE}"
        )],
        DedupMode::UpdateDuplicates => {
            let all_cols: Vec<String> = target_columns.iter().map(|c| quote_ident(c)).collect();
            let all_cols = all_cols.join(", ");
            let pk_cols: Vec<String> = primary_key.iter().map(|c| quote_ident(c)).collect();
            let pk_cols = pk_cols.join(", ");
            let update_cols: Vec<&String> = target_columns
                .iter()
                .filter(|c| !primary_key.contains(c))
                .collect();

            if update_cols.is_empty() {
                // Only PK columns, nothing to update.
                vec![format!(
                    "INSERT INTO main.{TABLE_DATA_NAME} ({all_cols}) \
                     SELECT {all_cols} FROM {STAGING_TABLE} \
                     ON CONFLICT ({pk_cols}) DO NOTHING"
                )]
            } else {
                let update_set: Vec<String> = update_cols
                    .iter()
                    .map(|c| format!("{} = EXCLUDED.{}", quote_ident(c), quote_ident(c)))
                    .collect();
                vec![format!(
                    "INSERT INTO main.{TABLE_DATA_NAME} ({all_cols}) \
                     SELECT {all_cols} FROM {STAGING_TABLE} \
                     ON CONFLICT ({pk_cols}) DO UPDATE SET {}",
                    update_set.join(", ")
                )]
            }
        }
    }
}

impl StorageManager {
    /// Run the three-stage import of a staged file into a table.
    ///
    /// On a dev branch the table is materialized first (copy-on-write).
    pub fn import_from_file(
        &self,
        ctx: &BranchContext,
        bucket_name: &str,
        table_name: &str,
        file_path: &Path,
        format: FileFormat,
        csv_options: Option<&CsvOptions>,
        import_options: &ImportOptions,
    ) -> Result<ImportOutcome> {
        if !file_path.is_file() {
            return Err(StorageError::not_found(format!(
                "File content not found on disk: {}",
                file_path.display()
            )));
        }

        let _lock = self
            .locks()
            .acquire(&ctx.project_id, bucket_name, table_name);
        let table_path = self.write_table_path(ctx, bucket_name, table_name)?;

        let conn = DbConnection::open(
            &table_path,
            cormorant_db::AccessMode::ReadWrite,
            self.engine_options(),
        )?;
        let schema = conn.table_schema(TABLE_DATA_NAME)?;
        if schema.columns.is_empty() {
            return Err(StorageError::not_found(format!(
                "Table {table_name} not found in bucket {bucket_name}"
            )));
        }
        let target_columns: Vec<String> =
            schema.columns.iter().map(|c| c.name.clone()).collect();

        let rows_before =
            conn.query_scalar_i64(&format!("SELECT COUNT(*) FROM main.{TABLE_DATA_NAME}"), &[])?;

        // Stage 1: transient staging relation mirroring the target.
        let column_defs: Vec<String> = schema
            .columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), c.column_type))
            .collect();
        conn.execute_batch(&format!(
            "CREATE TEMPORARY TABLE {STAGING_TABLE} ({})",
            column_defs.join(", ")
        ))?;

        let copy_sql = build_copy_from_sql(file_path, format, csv_options);
        debug!(sql = %copy_sql, "import stage 1: bulk load");
        if let Err(err) = conn.execute_batch(&copy_sql) {
            return Err(StorageError::invalid_argument(format!(
                "Failed to load file: {err}"
            )));
        }
        let staging_rows =
            conn.query_scalar_i64(&format!("SELECT COUNT(*) FROM {STAGING_TABLE}"), &[])?;

        // Stage 2: transform under one transaction.
        conn.execute_batch("BEGIN TRANSACTION")?;
        let transform = (|| -> Result<()> {
            if !import_options.incremental {
                conn.execute_batch(&format!("DELETE FROM main.{TABLE_DATA_NAME}"))?;
            }
            let statements = build_dedup_sql(
                &target_columns,
                &schema.primary_key,
                import_options.dedup_mode,
            );
            for sql in &statements {
                debug!(sql = %sql, "import stage 2: merge");
                conn.execute_batch(sql)?;
            }
            Ok(())
        })();
        if let Err(err) = transform {
            let _ = conn.execute_batch("ROLLBACK");
            let _ = conn.execute_batch(&format!("DROP TABLE IF EXISTS {STAGING_TABLE}"));
            if let StorageError::Backend(backend) = &err {
                if backend.is_constraint_violation() {
                    return Err(StorageError::conflict(format!(
                        "Duplicate key violation: {backend}"
                    )));
                }
            }
            return Err(err);
        }
        conn.execute_batch("COMMIT")?;

        // Stage 3: cleanup and stats.
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {STAGING_TABLE}"))?;
        let rows_after =
            conn.query_scalar_i64(&format!("SELECT COUNT(*) FROM main.{TABLE_DATA_NAME}"), &[])?;
        conn.checkpoint()?;
        drop(conn);

        let imported_rows = if import_options.incremental {
            rows_after - rows_before
        } else {
            staging_rows
        };
        let table_size_bytes = std::fs::metadata(&table_path)?.len() as i64;

        if ctx.is_main() {
            self.refresh_project_stats(&ctx.project_id)?;
        }

        info!(
            project_id = %ctx.project_id,
            bucket = bucket_name,
            table = table_name,
            staging_rows,
            imported_rows,
            rows_before,
            rows_after,
            "import complete"
        );
        Ok(ImportOutcome {
            imported_rows,
            table_rows_after: rows_after,
            table_size_bytes,
            staging_rows,
            warnings: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::test_support::{manager, users_columns};

    fn setup(manager: &StorageManager) -> BranchContext {
        manager.create_project("p1", "One").unwrap();
        manager.create_bucket("p1", "in").unwrap();
        manager
            .create_table("p1", "in", "users", &users_columns(), &["id".to_string()])
            .unwrap();
        BranchContext::main("p1")
    }

    fn write_csv(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_build_dedup_sql_shapes() {
        let columns = vec!["id".to_string(), "name".to_string(), "email".to_string()];
        let pk = vec!["id".to_string()];

        let upsert = build_dedup_sql(&columns, &pk, DedupMode::UpdateDuplicates);
        assert_eq!(upsert.len(), 1);
        assert!(upsert[0].contains("ON CONFLICT (\"id\") DO UPDATE SET"));
        assert!(upsert[0].contains("\"name\" = EXCLUDED.\"name\""));

        let plain = build_dedup_sql(&columns, &pk, DedupMode::FailOnDuplicates);
        assert!(!plain[0].contains("ON CONFLICT"));

        let pk_only = build_dedup_sql(&pk, &pk, DedupMode::UpdateDuplicates);
        assert!(pk_only[0].contains("DO NOTHING"));

        let no_pk = build_dedup_sql(&columns, &[], DedupMode::UpdateDuplicates);
        assert!(no_pk[0].contains("SELECT * FROM staging"));
    }

    #[test]
    fn test_full_load_then_incremental_upsert() {
        let (dir, manager) = manager();
        let ctx = setup(&manager);
        let f1 = write_csv(dir.path(), "f1.csv", "id,name,email\n1,A,a@x\n2,B,b@x\n");
        let f2 = write_csv(dir.path(), "f2.csv", "id,name,email\n2,B2,b2@x\n3,C,c@x\n");

        let full = manager
            .import_from_file(
                &ctx,
                "in",
                "users",
                &f1,
                FileFormat::Csv,
                None,
                &ImportOptions::default(),
            )
            .unwrap();
        assert_eq!(full.imported_rows, 2);
        assert_eq!(full.table_rows_after, 2);

        let incremental = manager
            .import_from_file(
                &ctx,
                "in",
                "users",
                &f2,
                FileFormat::Csv,
                None,
                &ImportOptions {
                    incremental: true,
                    dedup_mode: DedupMode::UpdateDuplicates,
                },
            )
            .unwrap();
        assert_eq!(incremental.table_rows_after, 3);
        // One genuinely new row; the other updated in place.
        assert_eq!(incremental.imported_rows, 1);

        let path = manager.layout().table_path("p1", "in", "users");
        let conn = DbConnection::open_ro(&path).unwrap();
        let row = conn
            .query_row("SELECT name, email FROM main.data WHERE id = 2", &[])
            .unwrap();
        assert_eq!(row.get::<String>(0).unwrap(), "B2");
        assert_eq!(row.get::<String>(1).unwrap(), "b2@x");
    }

    #[test]
    fn test_fail_on_duplicates_conflicts() {
        let (dir, manager) = manager();
        let ctx = setup(&manager);
        let f1 = write_csv(dir.path(), "f1.csv", "id,name,email\n1,A,a@x\n");
        let f2 = write_csv(dir.path(), "f2.csv", "id,name,email\n1,A2,a2@x\n");

        manager
            .import_from_file(
                &ctx,
                "in",
                "users",
                &f1,
                FileFormat::Csv,
                None,
                &ImportOptions::default(),
            )
            .unwrap();

        let err = manager
            .import_from_file(
                &ctx,
                "in",
                "users",
                &f2,
                FileFormat::Csv,
                None,
                &ImportOptions {
                    incremental: true,
                    dedup_mode: DedupMode::FailOnDuplicates,
                },
            )
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)), "got: {err}");

        // The failed import must not have changed the table.
        let path = manager.layout().table_path("p1", "in", "users");
        let conn = DbConnection::open_ro(&path).unwrap();
        let row = conn
            .query_row("SELECT name FROM main.data WHERE id = 1", &[])
            .unwrap();
        assert_eq!(row.get::<String>(0).unwrap(), "A");
    }

    #[test]
    fn test_non_incremental_replaces_rows() {
        let (dir, manager) = manager();
        let ctx = setup(&manager);
        let f1 = write_csv(dir.path(), "f1.csv", "id,name,email\n1,A,a@x\n2,B,b@x\n");
        let f2 = write_csv(dir.path(), "f2.csv", "id,name,email\n9,Z,z@x\n");

        manager
            .import_from_file(
                &ctx,
                "in",
                "users",
                &f1,
                FileFormat::Csv,
                None,
                &ImportOptions::default(),
            )
            .unwrap();
        let outcome = manager
            .import_from_file(
                &ctx,
                "in",
                "users",
                &f2,
                FileFormat::Csv,
                None,
                &ImportOptions::default(),
            )
            .unwrap();
        assert_eq!(outcome.imported_rows, 1);
        assert_eq!(outcome.table_rows_after, 1);
    }

    #[test]
    fn test_missing_file_not_found() {
        let (dir, manager) = manager();
        let ctx = setup(&manager);
        let err = manager
            .import_from_file(
                &ctx,
                "in",
                "users",
                &dir.path().join("ghost.csv"),
                FileFormat::Csv,
                None,
                &ImportOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }
}
