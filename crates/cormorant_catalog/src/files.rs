//! File rows: staged uploads and permanent files.

use std::collections::HashMap;

use cormorant_db::{DbRow, DbValue};

use crate::{now_rfc3339, Catalog, Result};

#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: String,
    pub project_id: String,
    pub name: String,
    /// Path relative to the files root.
    pub path: String,
    pub size_bytes: i64,
    pub checksum_sha256: Option<String>,
    pub content_type: Option<String>,
    pub is_staged: bool,
    pub created_at: String,
    pub expires_at: Option<String>,
    pub tags: HashMap<String, String>,
}

const FILE_COLUMNS: &str = "id, project_id, name, path, size_bytes, checksum_sha256, content_type, is_staged, created_at, expires_at, tags";

fn row_to_file(row: &DbRow) -> Result<FileRecord> {
    let tags_raw: String = row.get(10)?;
    Ok(FileRecord {
        id: row.get(0)?,
        project_id: row.get(1)?,
        name: row.get(2)?,
        path: row.get(3)?,
        size_bytes: row.get(4)?,
        checksum_sha256: row.get(5)?,
        content_type: row.get(6)?,
        is_staged: row.get(7)?,
        created_at: row.get(8)?,
        expires_at: row.get(9)?,
        tags: serde_json::from_str(&tags_raw)?,
    })
}

impl Catalog {
    pub fn create_file_record(&self, record: &FileRecord) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            &format!("INSERT INTO files ({FILE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"),
            &[
                DbValue::from(record.id.as_str()),
                DbValue::from(record.project_id.as_str()),
                DbValue::from(record.name.as_str()),
                DbValue::from(record.path.as_str()),
                DbValue::from(record.size_bytes),
                DbValue::from(record.checksum_sha256.as_deref()),
                DbValue::from(record.content_type.as_deref()),
                DbValue::from(record.is_staged),
                DbValue::from(record.created_at.as_str()),
                DbValue::from(record.expires_at.as_deref()),
                DbValue::from(serde_json::to_string(&record.tags)?),
            ],
        )?;
        Ok(())
    }

    pub fn get_file(&self, project_id: &str, file_id: &str) -> Result<Option<FileRecord>> {
        let conn = self.conn();
        let row = conn.query_optional(
            &format!("SELECT {FILE_COLUMNS} FROM files WHERE project_id = ? AND id = ?"),
            &[DbValue::from(project_id), DbValue::from(file_id)],
        )?;
        row.as_ref().map(row_to_file).transpose()
    }

    /// Find a file row by its relative path (S3 surface lookup).
    pub fn find_file_by_path(&self, project_id: &str, path: &str) -> Result<Option<FileRecord>> {
        let conn = self.conn();
        let row = conn.query_optional(
            &format!("SELECT {FILE_COLUMNS} FROM files WHERE project_id = ? AND path = ?"),
            &[DbValue::from(project_id), DbValue::from(path)],
        )?;
        row.as_ref().map(row_to_file).transpose()
    }

    pub fn list_files(
        &self,
        project_id: &str,
        is_staged: Option<bool>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<FileRecord>> {
        let conn = self.conn();
        let (sql, params): (String, Vec<DbValue>) = match is_staged {
            Some(flag) => (
                format!(
                    "SELECT {FILE_COLUMNS} FROM files WHERE project_id = ? AND is_staged = ? \
                     ORDER BY created_at DESC LIMIT ? OFFSET ?"
                ),
                vec![
                    DbValue::from(project_id),
                    DbValue::from(flag),
                    DbValue::from(limit),
                    DbValue::from(offset),
                ],
            ),
            None => (
                format!(
                    "SELECT {FILE_COLUMNS} FROM files WHERE project_id = ? \
                     ORDER BY created_at DESC LIMIT ? OFFSET ?"
                ),
                vec![
                    DbValue::from(project_id),
                    DbValue::from(limit),
                    DbValue::from(offset),
                ],
            ),
        };
        let rows = conn.query_all(&sql, &params)?;
        rows.iter().map(row_to_file).collect()
    }

    pub fn count_files(&self, project_id: &str) -> Result<i64> {
        let conn = self.conn();
        Ok(conn.query_scalar_i64(
            "SELECT COUNT(*) FROM files WHERE project_id = ?",
            &[DbValue::from(project_id)],
        )?)
    }

    /// Flip a staged row to permanent after finalization, updating its
    /// path and tags.
    pub fn finalize_file(
        &self,
        file_id: &str,
        path: &str,
        tags: &HashMap<String, String>,
    ) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            r#"
            UPDATE files
            SET is_staged = false, path = ?, tags = ?, expires_at = NULL, created_at = ?
            WHERE id = ?
            "#,
            &[
                DbValue::from(path),
                DbValue::from(serde_json::to_string(tags)?),
                DbValue::from(now_rfc3339()),
                DbValue::from(file_id),
            ],
        )?;
        Ok(())
    }

    pub fn delete_file(&self, file_id: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute("DELETE FROM files WHERE id = ?", &[DbValue::from(file_id)])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::open_test_catalog;

    fn sample(id: &str, staged: bool) -> FileRecord {
        FileRecord {
            id: id.to_string(),
            project_id: "p1".to_string(),
            name: "data.csv".to_string(),
            path: format!("project_p1/staging/{id}_data.csv"),
            size_bytes: 42,
            checksum_sha256: Some("abc".to_string()),
            content_type: Some("text/csv".to_string()),
            is_staged: staged,
            created_at: now_rfc3339(),
            expires_at: None,
            tags: HashMap::new(),
        }
    }

    #[test]
    fn test_file_crud() {
        let (_dir, catalog) = open_test_catalog();
        catalog.create_file_record(&sample("f1", true)).unwrap();
        catalog.create_file_record(&sample("f2", false)).unwrap();

        let fetched = catalog.get_file("p1", "f1").unwrap().unwrap();
        assert!(fetched.is_staged);
        assert!(catalog.get_file("p2", "f1").unwrap().is_none());

        let staged = catalog.list_files("p1", Some(true), 100, 0).unwrap();
        assert_eq!(staged.len(), 1);
        assert_eq!(catalog.count_files("p1").unwrap(), 2);

        catalog.delete_file("f1").unwrap();
        assert!(catalog.get_file("p1", "f1").unwrap().is_none());
    }

    #[test]
    fn test_finalize_file() {
        let (_dir, catalog) = open_test_catalog();
        catalog.create_file_record(&sample("f1", true)).unwrap();

        let mut tags = HashMap::new();
        tags.insert("type".to_string(), "import".to_string());
        catalog
            .finalize_file("f1", "project_p1/2026/08/01/f1_data.csv", &tags)
            .unwrap();

        let record = catalog.get_file("p1", "f1").unwrap().unwrap();
        assert!(!record.is_staged);
        assert_eq!(record.tags["type"], "import");
        assert!(record.path.contains("2026/08/01"));
    }
}
