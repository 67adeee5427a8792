//! Workspace rows backing the wire-session bridge.

use cormorant_db::{DbRow, DbValue};

use crate::{now_rfc3339, parse_rfc3339, Catalog, CatalogError, Result};

#[derive(Debug, Clone)]
pub struct WorkspaceRecord {
    pub id: String,
    pub project_id: String,
    pub branch_id: Option<String>,
    pub username: String,
    pub password_hash: String,
    /// Absolute path of the workspace's own database file.
    pub db_path: String,
    pub status: String,
    pub created_at: String,
    pub expires_at: Option<String>,
}

impl WorkspaceRecord {
    pub fn is_expired(&self) -> Result<bool> {
        match &self.expires_at {
            None => Ok(false),
            Some(expiry) => Ok(parse_rfc3339(expiry)? <= chrono::Utc::now()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

const WORKSPACE_COLUMNS: &str =
    "id, project_id, branch_id, username, password_hash, db_path, status, created_at, expires_at";

fn row_to_workspace(row: &DbRow) -> Result<WorkspaceRecord> {
    Ok(WorkspaceRecord {
        id: row.get(0)?,
        project_id: row.get(1)?,
        branch_id: row.get(2)?,
        username: row.get(3)?,
        password_hash: row.get(4)?,
        db_path: row.get(5)?,
        status: row.get(6)?,
        created_at: row.get(7)?,
        expires_at: row.get(8)?,
    })
}

impl Catalog {
    #[allow(clippy::too_many_arguments)]
    pub fn create_workspace(
        &self,
        id: &str,
        project_id: &str,
        branch_id: Option<&str>,
        username: &str,
        password_hash: &str,
        db_path: &str,
        expires_at: Option<&str>,
    ) -> Result<WorkspaceRecord> {
        let conn = self.conn();
        let duplicate = conn.query_optional(
            "SELECT id FROM workspaces WHERE username = ?",
            &[DbValue::from(username)],
        )?;
        if duplicate.is_some() {
            return Err(CatalogError::conflict(format!(
                "Workspace username '{username}' already exists"
            )));
        }

        let now = now_rfc3339();
        conn.execute(
            &format!(
                "INSERT INTO workspaces ({WORKSPACE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, 'active', ?, ?)"
            ),
            &[
                DbValue::from(id),
                DbValue::from(project_id),
                DbValue::from(branch_id),
                DbValue::from(username),
                DbValue::from(password_hash),
                DbValue::from(db_path),
                DbValue::from(now.clone()),
                DbValue::from(expires_at),
            ],
        )?;

        Ok(WorkspaceRecord {
            id: id.to_string(),
            project_id: project_id.to_string(),
            branch_id: branch_id.map(str::to_string),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            db_path: db_path.to_string(),
            status: "active".to_string(),
            created_at: now,
            expires_at: expires_at.map(str::to_string),
        })
    }

    pub fn get_workspace(&self, workspace_id: &str) -> Result<Option<WorkspaceRecord>> {
        let conn = self.conn();
        let row = conn.query_optional(
            &format!("SELECT {WORKSPACE_COLUMNS} FROM workspaces WHERE id = ?"),
            &[DbValue::from(workspace_id)],
        )?;
        row.as_ref().map(row_to_workspace).transpose()
    }

    pub fn get_workspace_by_username(&self, username: &str) -> Result<Option<WorkspaceRecord>> {
        let conn = self.conn();
        let row = conn.query_optional(
            &format!("SELECT {WORKSPACE_COLUMNS} FROM workspaces WHERE username = ?"),
            &[DbValue::from(username)],
        )?;
        row.as_ref().map(row_to_workspace).transpose()
    }

    pub fn update_workspace_password(
        &self,
        workspace_id: &str,
        password_hash: &str,
    ) -> Result<()> {
        let conn = self.conn();
        let affected = conn.execute(
            "UPDATE workspaces SET password_hash = ? WHERE id = ?",
            &[DbValue::from(password_hash), DbValue::from(workspace_id)],
        )?;
        if affected == 0 {
            return Err(CatalogError::not_found(format!(
                "Workspace {workspace_id} not found"
            )));
        }
        Ok(())
    }

    pub fn delete_workspace(&self, workspace_id: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "DELETE FROM pgwire_sessions WHERE workspace_id = ?",
            &[DbValue::from(workspace_id)],
        )?;
        conn.execute(
            "DELETE FROM workspaces WHERE id = ?",
            &[DbValue::from(workspace_id)],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::open_test_catalog;
    use crate::CatalogError;

    #[test]
    fn test_workspace_lifecycle() {
        let (_dir, catalog) = open_test_catalog();
        catalog
            .create_workspace("w1", "p1", None, "alice", "hash1", "/data/w1.duckdb", None)
            .unwrap();

        let by_name = catalog.get_workspace_by_username("alice").unwrap().unwrap();
        assert_eq!(by_name.id, "w1");
        assert!(by_name.is_active());
        assert!(!by_name.is_expired().unwrap());

        catalog.update_workspace_password("w1", "hash2").unwrap();
        let updated = catalog.get_workspace("w1").unwrap().unwrap();
        assert_eq!(updated.password_hash, "hash2");

        catalog.delete_workspace("w1").unwrap();
        assert!(catalog.get_workspace("w1").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_username_conflicts() {
        let (_dir, catalog) = open_test_catalog();
        catalog
            .create_workspace("w1", "p1", None, "alice", "h", "/a", None)
            .unwrap();
        let err = catalog
            .create_workspace("w2", "p1", None, "alice", "h", "/b", None)
            .unwrap_err();
        assert!(matches!(err, CatalogError::Conflict(_)));
    }

    #[test]
    fn test_expired_workspace_detection() {
        let (_dir, catalog) = open_test_catalog();
        let past = crate::format_rfc3339(chrono::Utc::now() - chrono::Duration::hours(1));
        catalog
            .create_workspace("w1", "p1", None, "bob", "h", "/b", Some(&past))
            .unwrap();
        let ws = catalog.get_workspace("w1").unwrap().unwrap();
        assert!(ws.is_expired().unwrap());
    }
}
