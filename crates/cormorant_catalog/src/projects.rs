//! Project rows.

use cormorant_db::{DbRow, DbValue};

use crate::{now_rfc3339, Catalog, CatalogError, Result};

/// Catalog record for a project.
#[derive(Debug, Clone)]
pub struct ProjectRecord {
    pub id: String,
    pub name: String,
    pub status: String,
    pub settings: Option<serde_json::Value>,
    pub bucket_count: i64,
    pub table_count: i64,
    pub size_bytes: i64,
    pub created_at: String,
    pub updated_at: String,
}

const PROJECT_COLUMNS: &str =
    "id, name, status, settings, bucket_count, table_count, size_bytes, created_at, updated_at";

fn row_to_project(row: &DbRow) -> Result<ProjectRecord> {
    let settings: Option<String> = row.get(3)?;
    let settings = match settings {
        Some(raw) => Some(serde_json::from_str(&raw)?),
        None => None,
    };
    Ok(ProjectRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        status: row.get(2)?,
        settings,
        bucket_count: row.get(4)?,
        table_count: row.get(5)?,
        size_bytes: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

impl Catalog {
    /// Insert a new project row. Fails with conflict when the id exists.
    pub fn create_project(&self, project_id: &str, name: &str) -> Result<ProjectRecord> {
        let conn = self.conn();
        let existing = conn.query_optional(
            "SELECT id FROM projects WHERE id = ?",
            &[DbValue::from(project_id)],
        )?;
        if existing.is_some() {
            return Err(CatalogError::conflict(format!(
                "Project {project_id} already exists"
            )));
        }

        let now = now_rfc3339();
        conn.execute(
            r#"
            INSERT INTO projects (id, name, status, created_at, updated_at)
            VALUES (?, ?, 'active', ?, ?)
            "#,
            &[
                DbValue::from(project_id),
                DbValue::from(name),
                DbValue::from(now.clone()),
                DbValue::from(now.clone()),
            ],
        )?;

        Ok(ProjectRecord {
            id: project_id.to_string(),
            name: name.to_string(),
            status: "active".to_string(),
            settings: None,
            bucket_count: 0,
            table_count: 0,
            size_bytes: 0,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub fn get_project(&self, project_id: &str) -> Result<Option<ProjectRecord>> {
        let conn = self.conn();
        let row = conn.query_optional(
            &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?"),
            &[DbValue::from(project_id)],
        )?;
        row.as_ref().map(row_to_project).transpose()
    }

    pub fn list_projects(&self, limit: i64, offset: i64) -> Result<Vec<ProjectRecord>> {
        let conn = self.conn();
        let rows = conn.query_all(
            &format!(
                "SELECT {PROJECT_COLUMNS} FROM projects ORDER BY created_at LIMIT ? OFFSET ?"
            ),
            &[DbValue::from(limit), DbValue::from(offset)],
        )?;
        rows.iter().map(row_to_project).collect()
    }

    pub fn count_projects(&self) -> Result<i64> {
        let conn = self.conn();
        Ok(conn.query_scalar_i64("SELECT COUNT(*) FROM projects", &[])?)
    }

    /// Refresh the filesystem-derived counters after a mutating operation.
    pub fn update_project_stats(
        &self,
        project_id: &str,
        bucket_count: i64,
        table_count: i64,
        size_bytes: i64,
    ) -> Result<()> {
        let conn = self.conn();
        let affected = conn.execute(
            r#"
            UPDATE projects
            SET bucket_count = ?, table_count = ?, size_bytes = ?, updated_at = ?
            WHERE id = ?
            "#,
            &[
                DbValue::from(bucket_count),
                DbValue::from(table_count),
                DbValue::from(size_bytes),
                DbValue::from(now_rfc3339()),
                DbValue::from(project_id),
            ],
        )?;
        if affected == 0 {
            return Err(CatalogError::not_found(format!(
                "Project {project_id} not found"
            )));
        }
        Ok(())
    }

    /// Update display name and/or settings blob.
    pub fn update_project(
        &self,
        project_id: &str,
        name: Option<&str>,
        settings: Option<&serde_json::Value>,
    ) -> Result<()> {
        let conn = self.conn();
        if let Some(name) = name {
            conn.execute(
                "UPDATE projects SET name = ?, updated_at = ? WHERE id = ?",
                &[
                    DbValue::from(name),
                    DbValue::from(now_rfc3339()),
                    DbValue::from(project_id),
                ],
            )?;
        }
        if let Some(settings) = settings {
            conn.execute(
                "UPDATE projects SET settings = ?, updated_at = ? WHERE id = ?",
                &[
                    DbValue::from(serde_json::to_string(settings)?),
                    DbValue::from(now_rfc3339()),
                    DbValue::from(project_id),
                ],
            )?;
        }
        Ok(())
    }

    /// Hard-delete a project row and every dependent row (cascade).
    pub fn delete_project(&self, project_id: &str) -> Result<()> {
        let conn = self.conn();
        let param = [DbValue::from(project_id)];
        conn.execute(
            "DELETE FROM branch_tables WHERE branch_id IN (SELECT id FROM branches WHERE project_id = ?)",
            &param,
        )?;
        conn.execute("DELETE FROM branches WHERE project_id = ?", &param)?;
        conn.execute("DELETE FROM api_keys WHERE project_id = ?", &param)?;
        conn.execute("DELETE FROM snapshots WHERE project_id = ?", &param)?;
        conn.execute("DELETE FROM files WHERE project_id = ?", &param)?;
        conn.execute(
            "DELETE FROM pgwire_sessions WHERE workspace_id IN (SELECT id FROM workspaces WHERE project_id = ?)",
            &param,
        )?;
        conn.execute("DELETE FROM workspaces WHERE project_id = ?", &param)?;
        conn.execute(
            "DELETE FROM snapshot_settings WHERE entity_id = ? OR entity_id LIKE ? || '/%'",
            &[DbValue::from(project_id), DbValue::from(project_id)],
        )?;
        conn.execute("DELETE FROM projects WHERE id = ?", &param)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::open_test_catalog;
    use crate::CatalogError;

    #[test]
    fn test_create_get_delete_project() {
        let (_dir, catalog) = open_test_catalog();
        let created = catalog.create_project("p1", "One").unwrap();
        assert_eq!(created.status, "active");

        let fetched = catalog.get_project("p1").unwrap().unwrap();
        assert_eq!(fetched.name, "One");
        assert_eq!(fetched.bucket_count, 0);

        catalog.delete_project("p1").unwrap();
        assert!(catalog.get_project("p1").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_project_conflicts() {
        let (_dir, catalog) = open_test_catalog();
        catalog.create_project("p1", "One").unwrap();
        let err = catalog.create_project("p1", "Again").unwrap_err();
        assert!(matches!(err, CatalogError::Conflict(_)));
    }

    #[test]
    fn test_update_project_stats() {
        let (_dir, catalog) = open_test_catalog();
        catalog.create_project("p1", "One").unwrap();
        catalog.update_project_stats("p1", 2, 5, 1024).unwrap();
        let project = catalog.get_project("p1").unwrap().unwrap();
        assert_eq!(project.bucket_count, 2);
        assert_eq!(project.table_count, 5);
        assert_eq!(project.size_bytes, 1024);

        let err = catalog.update_project_stats("ghost", 0, 0, 0).unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(_)));
    }

    #[test]
    fn test_cascade_delete_clears_dependents() {
        let (_dir, catalog) = open_test_catalog();
        catalog.create_project("p1", "One").unwrap();
        catalog.create_branch("b1", "p1", "dev", None).unwrap();
        catalog.add_table_to_branch("b1", "in", "users").unwrap();

        catalog.delete_project("p1").unwrap();
        assert!(catalog.get_branch("p1", "b1").unwrap().is_none());
        assert!(!catalog.is_table_in_branch("b1", "in", "users").unwrap());
    }
}
