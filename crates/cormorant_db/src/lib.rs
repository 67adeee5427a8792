//! Engine adapter for Cormorant.
//!
//! Thin typed wrapper over the embedded DuckDB engine: open/close with an
//! access mode, DDL/DML execution, parameterized queries, COPY in/out,
//! and schema introspection. The engine is columnar and enforces a
//! single writer per database file; write serialization across requests
//! is handled above this layer by the table lock registry.

pub mod backend;
pub mod sql_guard;

pub use backend::{
    quote_ident, quote_literal, AccessMode, BackendError, DbConnection, DbRow, DbValue,
    EngineOptions, FromDbValue, SchemaColumn, TableSchema,
};
pub use sql_guard::{validate_where_filter, SqlGuardError};
