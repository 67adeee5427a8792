//! Dev branch rows and branch-local table tracking.
//!
//! `branch_tables` is the copy-on-write ledger: a row exists iff the
//! branch has materialized its own copy of the table. Reads resolve
//! through this table; absence means live view of main.

use cormorant_db::{DbRow, DbValue};

use crate::{now_rfc3339, Catalog, CatalogError, Result};

#[derive(Debug, Clone)]
pub struct BranchRecord {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct BranchTableRecord {
    pub branch_id: String,
    pub bucket_name: String,
    pub table_name: String,
    pub copied_at: String,
}

fn row_to_branch(row: &DbRow) -> Result<BranchRecord> {
    Ok(BranchRecord {
        id: row.get(0)?,
        project_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        created_at: row.get(4)?,
    })
}

impl Catalog {
    pub fn create_branch(
        &self,
        branch_id: &str,
        project_id: &str,
        name: &str,
        description: Option<&str>,
    ) -> Result<BranchRecord> {
        let conn = self.conn();
        let duplicate = conn.query_optional(
            "SELECT id FROM branches WHERE project_id = ? AND name = ?",
            &[DbValue::from(project_id), DbValue::from(name)],
        )?;
        if duplicate.is_some() {
            return Err(CatalogError::conflict(format!(
                "Branch with name '{name}' already exists"
            )));
        }

        let now = now_rfc3339();
        conn.execute(
            r#"
            INSERT INTO branches (id, project_id, name, description, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
            &[
                DbValue::from(branch_id),
                DbValue::from(project_id),
                DbValue::from(name),
                DbValue::from(description),
                DbValue::from(now.clone()),
            ],
        )?;

        Ok(BranchRecord {
            id: branch_id.to_string(),
            project_id: project_id.to_string(),
            name: name.to_string(),
            description: description.map(str::to_string),
            created_at: now,
        })
    }

    /// Fetch a branch that must belong to the given project.
    pub fn get_branch(&self, project_id: &str, branch_id: &str) -> Result<Option<BranchRecord>> {
        let conn = self.conn();
        let row = conn.query_optional(
            r#"
            SELECT id, project_id, name, description, created_at
            FROM branches WHERE project_id = ? AND id = ?
            "#,
            &[DbValue::from(project_id), DbValue::from(branch_id)],
        )?;
        row.as_ref().map(row_to_branch).transpose()
    }

    pub fn list_branches(
        &self,
        project_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<BranchRecord>> {
        let conn = self.conn();
        let rows = conn.query_all(
            r#"
            SELECT id, project_id, name, description, created_at
            FROM branches WHERE project_id = ?
            ORDER BY created_at
            LIMIT ? OFFSET ?
            "#,
            &[
                DbValue::from(project_id),
                DbValue::from(limit),
                DbValue::from(offset),
            ],
        )?;
        rows.iter().map(row_to_branch).collect()
    }

    pub fn count_branches(&self, project_id: &str) -> Result<i64> {
        let conn = self.conn();
        Ok(conn.query_scalar_i64(
            "SELECT COUNT(*) FROM branches WHERE project_id = ?",
            &[DbValue::from(project_id)],
        )?)
    }

    /// Delete a branch and its branch_tables rows. Main is untouched.
    pub fn delete_branch(&self, branch_id: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "DELETE FROM branch_tables WHERE branch_id = ?",
            &[DbValue::from(branch_id)],
        )?;
        conn.execute(
            "DELETE FROM branches WHERE id = ?",
            &[DbValue::from(branch_id)],
        )?;
        Ok(())
    }

    // ========================================================================
    // Branch-local table tracking (copy-on-write ledger)
    // ========================================================================

    pub fn add_table_to_branch(
        &self,
        branch_id: &str,
        bucket_name: &str,
        table_name: &str,
    ) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            r#"
            INSERT OR REPLACE INTO branch_tables (branch_id, bucket_name, table_name, copied_at)
            VALUES (?, ?, ?, ?)
            "#,
            &[
                DbValue::from(branch_id),
                DbValue::from(bucket_name),
                DbValue::from(table_name),
                DbValue::from(now_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn remove_table_from_branch(
        &self,
        branch_id: &str,
        bucket_name: &str,
        table_name: &str,
    ) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "DELETE FROM branch_tables WHERE branch_id = ? AND bucket_name = ? AND table_name = ?",
            &[
                DbValue::from(branch_id),
                DbValue::from(bucket_name),
                DbValue::from(table_name),
            ],
        )?;
        Ok(())
    }

    pub fn is_table_in_branch(
        &self,
        branch_id: &str,
        bucket_name: &str,
        table_name: &str,
    ) -> Result<bool> {
        let conn = self.conn();
        let row = conn.query_optional(
            "SELECT 1 FROM branch_tables WHERE branch_id = ? AND bucket_name = ? AND table_name = ?",
            &[
                DbValue::from(branch_id),
                DbValue::from(bucket_name),
                DbValue::from(table_name),
            ],
        )?;
        Ok(row.is_some())
    }

    pub fn list_branch_tables(&self, branch_id: &str) -> Result<Vec<BranchTableRecord>> {
        let conn = self.conn();
        let rows = conn.query_all(
            r#"
            SELECT branch_id, bucket_name, table_name, copied_at
            FROM branch_tables WHERE branch_id = ?
            ORDER BY bucket_name, table_name
            "#,
            &[DbValue::from(branch_id)],
        )?;
        rows.iter()
            .map(|row| {
                Ok(BranchTableRecord {
                    branch_id: row.get(0)?,
                    bucket_name: row.get(1)?,
                    table_name: row.get(2)?,
                    copied_at: row.get(3)?,
                })
            })
            .collect()
    }

    /// Drop every branch_tables row for a table across all of the
    /// project's branches (used when the main table is deleted).
    pub fn remove_table_from_all_branches(
        &self,
        project_id: &str,
        bucket_name: &str,
        table_name: &str,
    ) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            r#"
            DELETE FROM branch_tables
            WHERE bucket_name = ? AND table_name = ?
              AND branch_id IN (SELECT id FROM branches WHERE project_id = ?)
            "#,
            &[
                DbValue::from(bucket_name),
                DbValue::from(table_name),
                DbValue::from(project_id),
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::open_test_catalog;
    use crate::CatalogError;

    #[test]
    fn test_branch_lifecycle() {
        let (_dir, catalog) = open_test_catalog();
        catalog.create_project("p1", "One").unwrap();
        let branch = catalog
            .create_branch("abc123", "p1", "dev", Some("feature work"))
            .unwrap();
        assert_eq!(branch.name, "dev");

        assert!(catalog.get_branch("p1", "abc123").unwrap().is_some());
        // Branch ids are project-scoped on lookup.
        assert!(catalog.get_branch("p2", "abc123").unwrap().is_none());

        catalog.delete_branch("abc123").unwrap();
        assert!(catalog.get_branch("p1", "abc123").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_branch_name_conflicts() {
        let (_dir, catalog) = open_test_catalog();
        catalog.create_project("p1", "One").unwrap();
        catalog.create_branch("b1", "p1", "dev", None).unwrap();
        let err = catalog.create_branch("b2", "p1", "dev", None).unwrap_err();
        assert!(matches!(err, CatalogError::Conflict(_)));
    }

    #[test]
    fn test_branch_table_ledger() {
        let (_dir, catalog) = open_test_catalog();
        catalog.create_project("p1", "One").unwrap();
        catalog.create_branch("b1", "p1", "dev", None).unwrap();

        assert!(!catalog.is_table_in_branch("b1", "in", "users").unwrap());
        catalog.add_table_to_branch("b1", "in", "users").unwrap();
        assert!(catalog.is_table_in_branch("b1", "in", "users").unwrap());

        // Re-adding is a no-op upsert, not an error.
        catalog.add_table_to_branch("b1", "in", "users").unwrap();
        assert_eq!(catalog.list_branch_tables("b1").unwrap().len(), 1);

        catalog.remove_table_from_branch("b1", "in", "users").unwrap();
        assert!(!catalog.is_table_in_branch("b1", "in", "users").unwrap());
        // Removing again stays silent (pull_table idempotency).
        catalog.remove_table_from_branch("b1", "in", "users").unwrap();
    }
}
