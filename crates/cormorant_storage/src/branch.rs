//! Branch resolution and copy-on-write.
//!
//! The literal branch id `default` always resolves to main. A dev branch
//! reads the branch-local copy when `branch_tables` tracks one, otherwise
//! main's current bytes (live view). The first write materializes the
//! table into the branch directory; `pull` removes the local copy and
//! restores the live view.

use std::path::PathBuf;

use tracing::{debug, info};
use uuid::Uuid;

use crate::project::StorageManager;
use crate::{Result, StorageError};

/// The sentinel branch id meaning "main".
pub const DEFAULT_BRANCH_ID: &str = "default";

/// Resolved branch context: a concrete project plus an optional dev
/// branch id (`None` means main).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchContext {
    pub project_id: String,
    pub branch_id: Option<String>,
}

impl BranchContext {
    pub fn main(project_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            branch_id: None,
        }
    }

    pub fn is_main(&self) -> bool {
        self.branch_id.is_none()
    }

    /// Refuse operations restricted to main (bucket deletion, snapshot
    /// CRUD and restore).
    pub fn require_main(&self, operation: &str) -> Result<()> {
        if let Some(branch_id) = &self.branch_id {
            return Err(StorageError::invalid_argument(format!(
                "Cannot {operation} from dev branches. Use default branch. (branch {branch_id})"
            )));
        }
        Ok(())
    }
}

/// Mint a new dev branch id: the 8-char prefix of a v4 UUID.
pub fn new_branch_id() -> String {
    Uuid::new_v4().to_string()[..8].to_string()
}

impl StorageManager {
    /// Resolve `(project, branch)` from the URL to a concrete context,
    /// validating both exist.
    pub fn resolve_branch(&self, project_id: &str, branch_id: &str) -> Result<BranchContext> {
        let project = self.catalog().get_project(project_id)?;
        if project.is_none() {
            return Err(StorageError::not_found(format!(
                "Project {project_id} not found"
            )));
        }
        if branch_id == DEFAULT_BRANCH_ID {
            return Ok(BranchContext::main(project_id));
        }
        let branch = self.catalog().get_branch(project_id, branch_id)?;
        if branch.is_none() {
            return Err(StorageError::not_found(format!(
                "Branch {branch_id} not found in project {project_id}"
            )));
        }
        Ok(BranchContext {
            project_id: project_id.to_string(),
            branch_id: Some(branch_id.to_string()),
        })
    }

    /// Path a read of this table resolves to: the branch-local copy iff
    /// tracked, otherwise main.
    pub fn read_table_path(
        &self,
        ctx: &BranchContext,
        bucket_name: &str,
        table_name: &str,
    ) -> Result<PathBuf> {
        if let Some(branch_id) = &ctx.branch_id {
            if self
                .catalog()
                .is_table_in_branch(branch_id, bucket_name, table_name)?
            {
                return Ok(self.layout().branch_table_path(
                    &ctx.project_id,
                    branch_id,
                    bucket_name,
                    table_name,
                ));
            }
        }
        Ok(self
            .layout()
            .table_path(&ctx.project_id, bucket_name, table_name))
    }

    /// Where a read is served from: `"branch"` iff a local copy is
    /// tracked, else `"main"`.
    pub fn table_source(
        &self,
        ctx: &BranchContext,
        bucket_name: &str,
        table_name: &str,
    ) -> Result<&'static str> {
        match &ctx.branch_id {
            None => Ok("main"),
            Some(branch_id) => {
                if self
                    .catalog()
                    .is_table_in_branch(branch_id, bucket_name, table_name)?
                {
                    Ok("branch")
                } else {
                    Ok("main")
                }
            }
        }
    }

    /// Path a write must target. For a dev branch this materializes the
    /// table first: copy main's file into the branch directory (atomic
    /// rename into place) and track it in `branch_tables`.
    ///
    /// Callers must hold the table lock.
    pub fn write_table_path(
        &self,
        ctx: &BranchContext,
        bucket_name: &str,
        table_name: &str,
    ) -> Result<PathBuf> {
        let Some(branch_id) = &ctx.branch_id else {
            return Ok(self
                .layout()
                .table_path(&ctx.project_id, bucket_name, table_name));
        };

        let branch_path =
            self.layout()
                .branch_table_path(&ctx.project_id, branch_id, bucket_name, table_name);
        if self
            .catalog()
            .is_table_in_branch(branch_id, bucket_name, table_name)?
        {
            return Ok(branch_path);
        }

        let main_path = self
            .layout()
            .table_path(&ctx.project_id, bucket_name, table_name);
        if !main_path.is_file() {
            return Err(StorageError::not_found(format!(
                "Table {table_name} not found in bucket {bucket_name}"
            )));
        }

        let bucket_dir =
            self.layout()
                .branch_bucket_dir(&ctx.project_id, branch_id, bucket_name);
        std::fs::create_dir_all(&bucket_dir)?;

        // Copy to a temp name, then rename into place so a crashed copy
        // never looks like a materialized table.
        let tmp_path = bucket_dir.join(format!("{table_name}.tmp"));
        let bytes = std::fs::copy(&main_path, &tmp_path)?;
        std::fs::rename(&tmp_path, &branch_path)?;

        self.catalog()
            .add_table_to_branch(branch_id, bucket_name, table_name)?;

        info!(
            project_id = %ctx.project_id,
            branch_id,
            bucket = bucket_name,
            table = table_name,
            bytes,
            "copy-on-write materialized branch table"
        );
        Ok(branch_path)
    }

    /// Remove the branch-local copy and its ledger row iff present, so
    /// reads go live from main again. Idempotent.
    ///
    /// Returns whether a local copy existed.
    pub fn pull_table(
        &self,
        ctx: &BranchContext,
        bucket_name: &str,
        table_name: &str,
    ) -> Result<bool> {
        let Some(branch_id) = &ctx.branch_id else {
            return Err(StorageError::invalid_argument(
                "pull is only meaningful on a dev branch",
            ));
        };
        let was_local = self
            .catalog()
            .is_table_in_branch(branch_id, bucket_name, table_name)?;

        let _lock = self
            .locks()
            .acquire(&ctx.project_id, bucket_name, table_name);
        let branch_path =
            self.layout()
                .branch_table_path(&ctx.project_id, branch_id, bucket_name, table_name);
        if branch_path.is_file() {
            std::fs::remove_file(&branch_path)?;
            crate::project::remove_side_files(&branch_path);
        }
        self.catalog()
            .remove_table_from_branch(branch_id, bucket_name, table_name)?;

        debug!(
            project_id = %ctx.project_id,
            branch_id,
            bucket = bucket_name,
            table = table_name,
            was_local,
            "pulled table to live view"
        );
        Ok(was_local)
    }

    /// Create the branch directory.
    pub fn create_branch_dir(&self, project_id: &str, branch_id: &str) -> Result<()> {
        std::fs::create_dir_all(self.layout().branch_dir(project_id, branch_id))?;
        Ok(())
    }

    /// Delete a branch directory and its ledger rows. Main is untouched.
    pub fn delete_branch_storage(&self, project_id: &str, branch_id: &str) -> Result<()> {
        let dir = self.layout().branch_dir(project_id, branch_id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        self.catalog().delete_branch(branch_id)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::test_support::{manager, users_columns};
    use cormorant_db::DbConnection;

    fn setup_branch(manager: &StorageManager) -> BranchContext {
        manager.create_project("p1", "One").unwrap();
        manager.create_bucket("p1", "in").unwrap();
        manager
            .create_table("p1", "in", "users", &users_columns(), &["id".to_string()])
            .unwrap();
        let path = manager.layout().table_path("p1", "in", "users");
        {
            let conn = DbConnection::open_rw(&path).unwrap();
            conn.execute_batch(
                "INSERT INTO main.data VALUES (1, 'A', 'a@x'), (2, 'B', 'b@x'), (3, 'C', 'c@x')",
            )
            .unwrap();
        }
        manager.catalog().create_branch("dev1", "p1", "dev", None).unwrap();
        manager.create_branch_dir("p1", "dev1").unwrap();
        manager.resolve_branch("p1", "dev1").unwrap()
    }

    #[test]
    fn test_resolve_default_is_main() {
        let (_dir, manager) = manager();
        manager.create_project("p1", "One").unwrap();
        let ctx = manager.resolve_branch("p1", "default").unwrap();
        assert!(ctx.is_main());
        assert!(ctx.require_main("delete buckets").is_ok());

        assert!(matches!(
            manager.resolve_branch("p1", "nope"),
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            manager.resolve_branch("ghost", "default"),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn test_live_view_then_cow() {
        let (_dir, manager) = manager();
        let ctx = setup_branch(&manager);

        // Live view: read resolves to main until the first write.
        let read_path = manager.read_table_path(&ctx, "in", "users").unwrap();
        assert_eq!(read_path, manager.layout().table_path("p1", "in", "users"));
        assert_eq!(manager.table_source(&ctx, "in", "users").unwrap(), "main");

        // Write: materializes a branch-local copy.
        let write_path = {
            let _lock = manager.locks().acquire("p1", "in", "users");
            manager.write_table_path(&ctx, "in", "users").unwrap()
        };
        assert_eq!(
            write_path,
            manager.layout().branch_table_path("p1", "dev1", "in", "users")
        );
        assert!(write_path.is_file());
        assert_eq!(manager.table_source(&ctx, "in", "users").unwrap(), "branch");

        // Delete a row on the branch; main keeps its three rows.
        {
            let conn = DbConnection::open_rw(&write_path).unwrap();
            conn.execute_batch("DELETE FROM main.data WHERE id = 1").unwrap();
        }
        let branch_conn = DbConnection::open_ro(&write_path).unwrap();
        assert_eq!(
            branch_conn.query_scalar_i64("SELECT COUNT(*) FROM main.data", &[]).unwrap(),
            2
        );
        drop(branch_conn);
        let main_conn =
            DbConnection::open_ro(&manager.layout().table_path("p1", "in", "users")).unwrap();
        assert_eq!(
            main_conn.query_scalar_i64("SELECT COUNT(*) FROM main.data", &[]).unwrap(),
            3
        );
    }

    #[test]
    fn test_pull_is_idempotent() {
        let (_dir, manager) = manager();
        let ctx = setup_branch(&manager);
        {
            let _lock = manager.locks().acquire("p1", "in", "users");
            manager.write_table_path(&ctx, "in", "users").unwrap();
        }
        assert_eq!(manager.table_source(&ctx, "in", "users").unwrap(), "branch");

        assert!(manager.pull_table(&ctx, "in", "users").unwrap());
        assert_eq!(manager.table_source(&ctx, "in", "users").unwrap(), "main");
        // Second pull: same end state, reports no local copy.
        assert!(!manager.pull_table(&ctx, "in", "users").unwrap());
        assert_eq!(manager.table_source(&ctx, "in", "users").unwrap(), "main");
    }

    #[test]
    fn test_delete_branch_leaves_main_untouched() {
        let (_dir, manager) = manager();
        let ctx = setup_branch(&manager);
        {
            let _lock = manager.locks().acquire("p1", "in", "users");
            manager.write_table_path(&ctx, "in", "users").unwrap();
        }

        manager.delete_branch_storage("p1", "dev1").unwrap();
        assert!(!manager.layout().branch_dir("p1", "dev1").exists());
        assert!(manager.layout().table_exists("p1", "in", "users"));
        assert!(manager.catalog().get_branch("p1", "dev1").unwrap().is_none());
    }

    #[test]
    fn test_require_main_guard() {
        let (_dir, manager) = manager();
        let ctx = setup_branch(&manager);
        let err = ctx.require_main("create snapshots").unwrap_err();
        assert!(matches!(err, StorageError::InvalidArgument(_)));
    }

    #[test]
    fn test_new_branch_id_shape() {
        let id = new_branch_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() || c == '-'));
    }
}
