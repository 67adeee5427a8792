//! Storage core: on-disk layout, table lifecycle, per-table locking,
//! copy-on-write branching, snapshots, and the import/export pipeline.
//!
//! Projects, buckets, and tables are tested for existence by path; the
//! catalog is a cache and audit record. Every write path acquires the
//! table's exclusive mutex from [`lock::TableLockRegistry`]; read paths
//! open the table file read-only and skip the lock.

pub mod branch;
pub mod export;
pub mod import;
pub mod layout;
pub mod lock;
pub mod project;
pub mod schema_ops;
pub mod snapshot;
pub mod snapshot_config;

use cormorant_catalog::CatalogError;
use cormorant_db::BackendError;
use thiserror::Error;

pub use branch::{new_branch_id, BranchContext, DEFAULT_BRANCH_ID};
pub use export::ExportOutcome;
pub use import::ImportOutcome;
pub use layout::{StorageLayout, TABLE_DATA_NAME};
pub use lock::{TableLockGuard, TableLockRegistry};
pub use project::{build_create_table_sql, ProjectStats, StorageManager, TableInfo};
pub use snapshot::snapshot_id;
pub use snapshot_config::{resolve_snapshot_config, retention_days, SnapshotTrigger};

/// Storage operation result type.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Storage errors, classified for the transport boundary.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Resource missing on disk or in the catalog
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate create, restore over a foreign table, PK violation
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Malformed input: bad primary key, unsafe filter, out-of-range limit
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Engine error
    #[error("Engine error: {0}")]
    Backend(#[from] BackendError),

    /// Catalog error
    #[error("Catalog error: {0}")]
    Catalog(CatalogError),
}

impl StorageError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

impl From<CatalogError> for StorageError {
    fn from(err: CatalogError) -> Self {
        // Preserve the classification the catalog already made.
        match err {
            CatalogError::NotFound(msg) => Self::NotFound(msg),
            CatalogError::Conflict(msg) => Self::Conflict(msg),
            other => Self::Catalog(other),
        }
    }
}
