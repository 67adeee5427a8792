//! Synchronous operation layer shared by both transports.
//!
//! The HTTP facade and the command dispatcher both route into these
//! functions, so semantics (auto snapshots, audit logging, counter
//! refresh) cannot drift between transports. Everything here blocks;
//! async handlers call through [`crate::state::blocking`].

pub mod api_keys;
pub mod branches;
pub mod files;
pub mod projects;
pub mod snapshots;
pub mod tables;
pub mod workspaces;

use cormorant_catalog::OperationEntry;

use crate::state::App;

/// Append an audit entry; a logging failure never fails the operation.
pub(crate) fn log_operation(app: &App, entry: OperationEntry) {
    if let Err(err) = app.catalog().log_operation(&entry) {
        tracing::warn!(error = %err, operation = %entry.operation, "failed to append operation log");
    }
}
