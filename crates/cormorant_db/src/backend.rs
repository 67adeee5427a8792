//! DuckDB-only synchronous backend.
//!
//! - Columnar, OLAP-optimized
//! - Single-writer per database file; read-only opens can coexist

use std::path::Path;

use thiserror::Error;
use tracing::debug;

/// Errors from database backend operations.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Type conversion error: {0}")]
    TypeConversion(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),
}

impl BackendError {
    /// True when the underlying engine rejected a statement due to a
    /// constraint (primary key / unique) violation.
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            Self::Constraint(_) => true,
            Self::DuckDb(err) => {
                let msg = err.to_string().to_lowercase();
                msg.contains("constraint") || msg.contains("duplicate key")
            }
            _ => false,
        }
    }
}

/// Database access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Read-write access (callers must hold the table lock)
    ReadWrite,
    /// Read-only access (can coexist with other readers)
    ReadOnly,
}

/// Engine tuning applied at open time.
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Worker thread count hint.
    pub threads: Option<i64>,
    /// Memory limit hint, e.g. `"4GB"`.
    pub memory_limit: Option<String>,
}

/// Value type for query parameters and results.
#[derive(Debug, Clone, PartialEq)]
pub enum DbValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Boolean(bool),
}

impl From<i32> for DbValue {
    fn from(v: i32) -> Self {
        DbValue::Integer(v as i64)
    }
}

impl From<i64> for DbValue {
    fn from(v: i64) -> Self {
        DbValue::Integer(v)
    }
}

impl From<f64> for DbValue {
    fn from(v: f64) -> Self {
        DbValue::Real(v)
    }
}

impl From<String> for DbValue {
    fn from(v: String) -> Self {
        DbValue::Text(v)
    }
}

impl From<&str> for DbValue {
    fn from(v: &str) -> Self {
        DbValue::Text(v.to_string())
    }
}

impl From<bool> for DbValue {
    fn from(v: bool) -> Self {
        DbValue::Boolean(v)
    }
}

impl From<Vec<u8>> for DbValue {
    fn from(v: Vec<u8>) -> Self {
        DbValue::Blob(v)
    }
}

impl<T: Into<DbValue>> From<Option<T>> for DbValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => DbValue::Null,
        }
    }
}

impl DbValue {
    fn to_engine(&self) -> duckdb::types::Value {
        use duckdb::types::Value;
        match self {
            DbValue::Null => Value::Null,
            DbValue::Integer(v) => Value::BigInt(*v),
            DbValue::Real(v) => Value::Double(*v),
            DbValue::Text(v) => Value::Text(v.clone()),
            DbValue::Blob(v) => Value::Blob(v.clone()),
            DbValue::Boolean(v) => Value::Boolean(*v),
        }
    }

    fn from_engine(value: duckdb::types::ValueRef<'_>) -> Result<Self, BackendError> {
        use duckdb::types::ValueRef;
        Ok(match value {
            ValueRef::Null => DbValue::Null,
            ValueRef::Boolean(v) => DbValue::Boolean(v),
            ValueRef::TinyInt(v) => DbValue::Integer(v as i64),
            ValueRef::SmallInt(v) => DbValue::Integer(v as i64),
            ValueRef::Int(v) => DbValue::Integer(v as i64),
            ValueRef::BigInt(v) => DbValue::Integer(v),
            ValueRef::HugeInt(v) => DbValue::Integer(v as i64),
            ValueRef::UTinyInt(v) => DbValue::Integer(v as i64),
            ValueRef::USmallInt(v) => DbValue::Integer(v as i64),
            ValueRef::UInt(v) => DbValue::Integer(v as i64),
            ValueRef::UBigInt(v) => DbValue::Integer(v as i64),
            ValueRef::Float(v) => DbValue::Real(v as f64),
            ValueRef::Double(v) => DbValue::Real(v),
            ValueRef::Text(bytes) => DbValue::Text(
                std::str::from_utf8(bytes)
                    .map_err(|e| BackendError::TypeConversion(format!("Invalid UTF-8: {e}")))?
                    .to_string(),
            ),
            ValueRef::Blob(bytes) => DbValue::Blob(bytes.to_vec()),
            // Timestamps, decimals, nested types: preview-only rendering.
            other => DbValue::Text(format!("{other:?}")),
        })
    }

    /// JSON rendering used by preview rows.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            DbValue::Null => serde_json::Value::Null,
            DbValue::Integer(v) => serde_json::Value::from(*v),
            DbValue::Real(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            DbValue::Text(v) => serde_json::Value::String(v.clone()),
            DbValue::Blob(v) => serde_json::Value::String(format!("<{} bytes>", v.len())),
            DbValue::Boolean(v) => serde_json::Value::Bool(*v),
        }
    }
}

/// Conversion from a result value into a concrete Rust type.
pub trait FromDbValue: Sized {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError>;
}

impl FromDbValue for String {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Text(v) => Ok(v.clone()),
            other => Err(BackendError::TypeConversion(format!(
                "Expected text, got {other:?}"
            ))),
        }
    }
}

impl FromDbValue for i64 {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Integer(v) => Ok(*v),
            other => Err(BackendError::TypeConversion(format!(
                "Expected integer, got {other:?}"
            ))),
        }
    }
}

impl FromDbValue for f64 {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Real(v) => Ok(*v),
            DbValue::Integer(v) => Ok(*v as f64),
            other => Err(BackendError::TypeConversion(format!(
                "Expected real, got {other:?}"
            ))),
        }
    }
}

impl FromDbValue for bool {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Boolean(v) => Ok(*v),
            DbValue::Integer(v) => Ok(*v != 0),
            other => Err(BackendError::TypeConversion(format!(
                "Expected boolean, got {other:?}"
            ))),
        }
    }
}

impl<T: FromDbValue> FromDbValue for Option<T> {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Null => Ok(None),
            other => T::from_db_value(other).map(Some),
        }
    }
}

/// Row data from a query result.
#[derive(Debug, Clone)]
pub struct DbRow {
    values: Vec<DbValue>,
}

impl DbRow {
    pub fn new(values: Vec<DbValue>) -> Self {
        Self { values }
    }

    /// Get a value by column index.
    pub fn get<T: FromDbValue>(&self, index: usize) -> Result<T, BackendError> {
        self.values
            .get(index)
            .ok_or_else(|| {
                BackendError::TypeConversion(format!("Column index {index} out of bounds"))
            })
            .and_then(T::from_db_value)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[DbValue] {
        &self.values
    }
}

/// Column description from schema introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaColumn {
    pub name: String,
    pub column_type: String,
    pub nullable: bool,
}

/// Introspected relation schema: ordered columns plus primary key subset.
#[derive(Debug, Clone, Default)]
pub struct TableSchema {
    pub columns: Vec<SchemaColumn>,
    pub primary_key: Vec<String>,
}

/// Quote an identifier for embedding in engine SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal for embedding in engine SQL.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Synchronous connection to one engine database file.
pub struct DbConnection {
    conn: duckdb::Connection,
    mode: AccessMode,
}

impl DbConnection {
    /// Open a database file with the given access mode and tuning.
    pub fn open(
        path: &Path,
        mode: AccessMode,
        options: &EngineOptions,
    ) -> Result<Self, BackendError> {
        let mut config = duckdb::Config::default();
        if mode == AccessMode::ReadOnly {
            config = config.access_mode(duckdb::AccessMode::ReadOnly)?;
        }
        if let Some(threads) = options.threads {
            config = config.threads(threads)?;
        }
        if let Some(limit) = &options.memory_limit {
            config = config.max_memory(limit)?;
        }

        debug!(path = %path.display(), ?mode, "opening engine database");
        let conn = duckdb::Connection::open_with_flags(path, config)?;
        Ok(Self { conn, mode })
    }

    /// Open read-write with default tuning.
    pub fn open_rw(path: &Path) -> Result<Self, BackendError> {
        Self::open(path, AccessMode::ReadWrite, &EngineOptions::default())
    }

    /// Open read-only with default tuning.
    pub fn open_ro(path: &Path) -> Result<Self, BackendError> {
        Self::open(path, AccessMode::ReadOnly, &EngineOptions::default())
    }

    pub fn access_mode(&self) -> AccessMode {
        self.mode
    }

    /// Execute a single statement, returning the affected row count.
    pub fn execute(&self, sql: &str, params: &[DbValue]) -> Result<usize, BackendError> {
        let engine_params: Vec<duckdb::types::Value> =
            params.iter().map(DbValue::to_engine).collect();
        let affected = self
            .conn
            .execute(sql, duckdb::params_from_iter(engine_params))?;
        Ok(affected)
    }

    /// Execute a batch of semicolon-separated statements.
    pub fn execute_batch(&self, sql: &str) -> Result<(), BackendError> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    /// Run a query and collect every row.
    pub fn query_all(&self, sql: &str, params: &[DbValue]) -> Result<Vec<DbRow>, BackendError> {
        let engine_params: Vec<duckdb::types::Value> =
            params.iter().map(DbValue::to_engine).collect();
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(duckdb::params_from_iter(engine_params))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let count = row.as_ref().column_count();
            let mut values = Vec::with_capacity(count);
            for idx in 0..count {
                values.push(DbValue::from_engine(row.get_ref(idx)?)?);
            }
            out.push(DbRow::new(values));
        }
        Ok(out)
    }

    /// Run a query expected to return at most one row.
    pub fn query_optional(
        &self,
        sql: &str,
        params: &[DbValue],
    ) -> Result<Option<DbRow>, BackendError> {
        let mut rows = self.query_all(sql, params)?;
        if rows.len() > 1 {
            return Err(BackendError::Query(format!(
                "Expected at most one row, got {}",
                rows.len()
            )));
        }
        Ok(rows.pop())
    }

    /// Run a query expected to return exactly one row.
    pub fn query_row(&self, sql: &str, params: &[DbValue]) -> Result<DbRow, BackendError> {
        self.query_optional(sql, params)?
            .ok_or_else(|| BackendError::Query("Expected one row, got none".to_string()))
    }

    /// Convenience: `SELECT COUNT(*)`-style single integer result.
    pub fn query_scalar_i64(&self, sql: &str, params: &[DbValue]) -> Result<i64, BackendError> {
        self.query_row(sql, params)?.get(0)
    }

    /// Introspect a relation: ordered columns plus primary key columns.
    ///
    /// `relation` is the bare relation name inside the `main` schema.
    pub fn table_schema(&self, relation: &str) -> Result<TableSchema, BackendError> {
        let columns_sql = r#"
            SELECT column_name, data_type,
                   CASE WHEN is_nullable = 'YES' THEN true ELSE false END AS nullable
            FROM information_schema.columns
            WHERE table_schema = 'main' AND table_name = ?
            ORDER BY ordinal_position
        "#;
        let rows = self.query_all(columns_sql, &[DbValue::from(relation)])?;
        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            columns.push(SchemaColumn {
                name: row.get(0)?,
                column_type: row.get(1)?,
                nullable: row.get(2)?,
            });
        }

        // duckdb_constraints() exposes PK columns as a list; unnest keeps the
        // declared order.
        let pk_sql = r#"
            SELECT unnest(constraint_column_names)
            FROM duckdb_constraints()
            WHERE constraint_type = 'PRIMARY KEY'
              AND table_name = ?
              AND schema_name = 'main'
        "#;
        let primary_key = match self.query_all(pk_sql, &[DbValue::from(relation)]) {
            Ok(rows) => rows
                .iter()
                .filter_map(|r| r.get::<String>(0).ok())
                .collect(),
            // Older engine builds without duckdb_constraints(); treat as no PK.
            Err(err) => {
                debug!(error = %err, "primary key introspection unavailable");
                Vec::new()
            }
        };

        Ok(TableSchema {
            columns,
            primary_key,
        })
    }

    /// Force a checkpoint so file size on disk reflects committed data.
    pub fn checkpoint(&self) -> Result<(), BackendError> {
        self.conn.execute_batch("CHECKPOINT")?;
        Ok(())
    }
}

impl std::fmt::Debug for DbConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConnection")
            .field("mode", &self.mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_test_db() -> (tempfile::TempDir, DbConnection) {
        let dir = tempdir().unwrap();
        let conn = DbConnection::open_rw(&dir.path().join("test.duckdb")).unwrap();
        (dir, conn)
    }

    #[test]
    fn test_execute_and_query() {
        let (_dir, conn) = open_test_db();
        conn.execute_batch("CREATE TABLE t (id BIGINT, name VARCHAR)")
            .unwrap();
        conn.execute(
            "INSERT INTO t VALUES (?, ?)",
            &[DbValue::from(1i64), DbValue::from("alpha")],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO t VALUES (?, ?)",
            &[DbValue::from(2i64), DbValue::Null],
        )
        .unwrap();

        let rows = conn.query_all("SELECT id, name FROM t ORDER BY id", &[]).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get::<i64>(0).unwrap(), 1);
        assert_eq!(rows[0].get::<String>(1).unwrap(), "alpha");
        assert_eq!(rows[1].get::<Option<String>>(1).unwrap(), None);

        let count = conn.query_scalar_i64("SELECT COUNT(*) FROM t", &[]).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_query_optional() {
        let (_dir, conn) = open_test_db();
        conn.execute_batch("CREATE TABLE t (id BIGINT)").unwrap();
        assert!(conn
            .query_optional("SELECT id FROM t", &[])
            .unwrap()
            .is_none());

        conn.execute("INSERT INTO t VALUES (7)", &[]).unwrap();
        let row = conn.query_optional("SELECT id FROM t", &[]).unwrap().unwrap();
        assert_eq!(row.get::<i64>(0).unwrap(), 7);
    }

    #[test]
    fn test_table_schema_introspection() {
        let (_dir, conn) = open_test_db();
        conn.execute_batch(
            "CREATE TABLE data (id INTEGER NOT NULL, name VARCHAR, PRIMARY KEY (id))",
        )
        .unwrap();

        let schema = conn.table_schema("data").unwrap();
        assert_eq!(schema.columns.len(), 2);
        assert_eq!(schema.columns[0].name, "id");
        assert!(!schema.columns[0].nullable);
        assert_eq!(schema.columns[1].name, "name");
        assert!(schema.columns[1].nullable);
        assert_eq!(schema.primary_key, vec!["id".to_string()]);
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ro.duckdb");
        {
            let conn = DbConnection::open_rw(&path).unwrap();
            conn.execute_batch("CREATE TABLE t (id BIGINT)").unwrap();
        }
        let ro = DbConnection::open_ro(&path).unwrap();
        assert_eq!(ro.query_scalar_i64("SELECT COUNT(*) FROM t", &[]).unwrap(), 0);
        assert!(ro.execute("INSERT INTO t VALUES (1)", &[]).is_err());
    }

    #[test]
    fn test_constraint_violation_detection() {
        let (_dir, conn) = open_test_db();
        conn.execute_batch("CREATE TABLE t (id BIGINT PRIMARY KEY)")
            .unwrap();
        conn.execute("INSERT INTO t VALUES (1)", &[]).unwrap();
        let err = conn.execute("INSERT INTO t VALUES (1)", &[]).unwrap_err();
        assert!(err.is_constraint_violation(), "got: {err}");
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("plain"), "\"plain\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_literal("it's"), "'it''s'");
    }
}
