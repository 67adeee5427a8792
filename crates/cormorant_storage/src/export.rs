//! Export: filtered, column-selected, optionally compressed COPY out.
//!
//! Read-only, no table lock. The caller-supplied WHERE expression is
//! checked by the coarse denylist guard before splicing.

use chrono::Utc;
use cormorant_db::{quote_ident, quote_literal, sql_guard, DbConnection};
use cormorant_protocol::http_types::{ExportRequest, FileFormat};
use tracing::info;
use uuid::Uuid;

use crate::branch::BranchContext;
use crate::layout::TABLE_DATA_NAME;
use crate::project::StorageManager;
use crate::{Result, StorageError};

/// Result of a completed export, ready for file registration.
#[derive(Debug, Clone)]
pub struct ExportOutcome {
    pub file_id: String,
    /// Path relative to the files root.
    pub relative_path: String,
    pub file_name: String,
    pub rows_exported: i64,
    pub file_size_bytes: i64,
    pub content_type: &'static str,
}

fn validate_compression(format: FileFormat, compression: Option<&str>) -> Result<()> {
    let valid: &[&str] = match format {
        FileFormat::Csv => &["gzip"],
        FileFormat::Parquet => &["gzip", "zstd", "snappy"],
    };
    if let Some(compression) = compression {
        if !valid.contains(&compression) {
            return Err(StorageError::invalid_argument(format!(
                "Invalid compression for {}: {compression}",
                format.as_str()
            )));
        }
    }
    Ok(())
}

impl StorageManager {
    /// Export a table (branch-aware read) to a dated file under the files
    /// root. The output is registered as a permanent file by the caller.
    pub fn export_to_file(
        &self,
        ctx: &BranchContext,
        bucket_name: &str,
        table_name: &str,
        request: &ExportRequest,
    ) -> Result<ExportOutcome> {
        validate_compression(request.format, request.compression.as_deref())?;

        if let Some(filter) = &request.where_filter {
            sql_guard::validate_where_filter(filter)
                .map_err(|err| StorageError::invalid_argument(err.to_string()))?;
        }
        if let Some(limit) = request.limit {
            if limit < 1 {
                return Err(StorageError::invalid_argument(format!(
                    "Export limit must be positive, got {limit}"
                )));
            }
        }

        let table_path = self.read_table_path(ctx, bucket_name, table_name)?;
        if !table_path.is_file() {
            return Err(StorageError::not_found(format!(
                "Table {table_name} not found in bucket {bucket_name}"
            )));
        }

        // Build the SELECT the COPY wraps.
        let columns_sql = match &request.columns {
            Some(columns) if !columns.is_empty() => columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", "),
            _ => "*".to_string(),
        };
        let mut query = format!("SELECT {columns_sql} FROM main.{TABLE_DATA_NAME}");
        if let Some(filter) = &request.where_filter {
            query.push_str(&format!(" WHERE {filter}"));
        }
        if let Some(limit) = request.limit {
            query.push_str(&format!(" LIMIT {limit}"));
        }

        // Output path: <files-root>/project_<pid>/<yyyy>/<mm>/<dd>/<uuid>_export_<t>_<stamp>.<ext>[.gz]
        let file_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let mut extension = request.format.as_str().to_string();
        if request.compression.as_deref() == Some("gzip") && request.format == FileFormat::Csv {
            extension.push_str(".gz");
        }
        let (absolute, relative_path, file_name) =
            self.layout()
                .export_file_path(&ctx.project_id, table_name, &file_id, &extension, now);
        if let Some(parent) = absolute.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut copy_options: Vec<String> = Vec::new();
        match request.format {
            FileFormat::Csv => {
                copy_options.push("FORMAT CSV".to_string());
                copy_options.push("HEADER true".to_string());
                if request.compression.as_deref() == Some("gzip") {
                    copy_options.push("COMPRESSION GZIP".to_string());
                }
            }
            FileFormat::Parquet => {
                copy_options.push("FORMAT PARQUET".to_string());
                if let Some(compression) = &request.compression {
                    copy_options.push(format!("COMPRESSION {}", compression.to_uppercase()));
                }
            }
        }

        let conn = DbConnection::open(
            &table_path,
            cormorant_db::AccessMode::ReadOnly,
            self.engine_options(),
        )?;
        let rows_exported = conn.query_scalar_i64(
            &format!("SELECT COUNT(*) FROM ({query}) AS export_data"),
            &[],
        )?;
        conn.execute_batch(&format!(
            "COPY ({query}) TO {} ({})",
            quote_literal(&absolute.to_string_lossy()),
            copy_options.join(", ")
        ))?;
        drop(conn);

        let file_size_bytes = std::fs::metadata(&absolute)?.len() as i64;
        let content_type = match request.format {
            FileFormat::Csv => "text/csv",
            FileFormat::Parquet => "application/x-parquet",
        };

        info!(
            project_id = %ctx.project_id,
            bucket = bucket_name,
            table = table_name,
            file_id = %file_id,
            rows_exported,
            file_size_bytes,
            "export complete"
        );
        Ok(ExportOutcome {
            file_id,
            relative_path,
            file_name,
            rows_exported,
            file_size_bytes,
            content_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::test_support::{manager, users_columns};
    use cormorant_db::DbValue;

    fn setup(manager: &StorageManager) -> BranchContext {
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
        BranchContext::main("p1")
    }

    fn csv_request() -> ExportRequest {
        ExportRequest {
            format: FileFormat::Csv,
            columns: None,
            compression: None,
            limit: None,
            where_filter: None,
        }
    }

    #[test]
    fn test_export_all_rows_csv() {
        let (_dir, manager) = manager();
        let ctx = setup(&manager);

        let outcome = manager
            .export_to_file(&ctx, "in", "users", &csv_request())
            .unwrap();
        assert_eq!(outcome.rows_exported, 3);
        assert!(outcome.file_size_bytes > 0);
        assert!(outcome.file_name.starts_with("export_users_"));
        assert!(outcome.relative_path.starts_with("project_p1/"));

        let absolute = manager.layout().files_root().join(&outcome.relative_path);
        let content = std::fs::read_to_string(absolute).unwrap();
        assert!(content.starts_with("id,name,email"));
        assert!(content.contains("2,B,b@x"));
    }

    #[test]
    fn test_export_filter_columns_limit() {
        let (_dir, manager) = manager();
        let ctx = setup(&manager);

        let request = ExportRequest {
            format: FileFormat::Csv,
            columns: Some(vec!["id".to_string(), "name".to_string()]),
            compression: None,
            limit: Some(1),
            where_filter: Some("id > 1".to_string()),
        };
        let outcome = manager.export_to_file(&ctx, "in", "users", &request).unwrap();
        assert_eq!(outcome.rows_exported, 1);

        let absolute = manager.layout().files_root().join(&outcome.relative_path);
        let content = std::fs::read_to_string(absolute).unwrap();
        assert!(content.starts_with("id,name"));
        assert!(!content.contains("email"));
    }

    #[test]
    fn test_unsafe_filter_rejected() {
        let (_dir, manager) = manager();
        let ctx = setup(&manager);

        let request = ExportRequest {
            where_filter: Some("id = 1; DROP TABLE data".to_string()),
            ..csv_request()
        };
        let err = manager.export_to_file(&ctx, "in", "users", &request).unwrap_err();
        assert!(matches!(err, StorageError::InvalidArgument(_)));
    }

    #[test]
    fn test_invalid_compression_rejected() {
        let (_dir, manager) = manager();
        let ctx = setup(&manager);

        let request = ExportRequest {
            compression: Some("zstd".to_string()),
            ..csv_request()
        };
        let err = manager.export_to_file(&ctx, "in", "users", &request).unwrap_err();
        assert!(matches!(err, StorageError::InvalidArgument(_)));
    }

    #[test]
    fn test_export_parquet_roundtrips() {
        let (_dir, manager) = manager();
        let ctx = setup(&manager);

        let request = ExportRequest {
            format: FileFormat::Parquet,
            compression: Some("zstd".to_string()),
            ..csv_request()
        };
        let outcome = manager.export_to_file(&ctx, "in", "users", &request).unwrap();
        assert_eq!(outcome.rows_exported, 3);

        // The exported file is readable by the engine.
        let absolute = manager.layout().files_root().join(&outcome.relative_path);
        let probe = manager.layout().data_root().join("probe.duckdb");
        let conn = DbConnection::open_rw(&probe).unwrap();
        let count = conn
            .query_scalar_i64(
                "SELECT COUNT(*) FROM read_parquet(?)",
                &[DbValue::from(absolute.to_string_lossy().to_string())],
            )
            .unwrap();
        assert_eq!(count, 3);
    }
}
