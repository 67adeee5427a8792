//! Snapshot settings overlays.
//!
//! Each scope stores only its own delta; the resolver in the storage
//! layer merges system -> project -> bucket -> table on demand.

use cormorant_db::DbValue;
use cormorant_protocol::SnapshotConfigPatch;

use crate::{now_rfc3339, Catalog, Result};

/// Entity id for a settings scope: `pid`, `pid/bucket`, or
/// `pid/bucket/table`.
pub fn settings_entity_id(
    project_id: &str,
    bucket_name: Option<&str>,
    table_name: Option<&str>,
) -> (&'static str, String) {
    match (bucket_name, table_name) {
        (Some(bucket), Some(table)) => ("table", format!("{project_id}/{bucket}/{table}")),
        (Some(bucket), None) => ("bucket", format!("{project_id}/{bucket}")),
        _ => ("project", project_id.to_string()),
    }
}

impl Catalog {
    pub fn get_snapshot_settings(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<SnapshotConfigPatch>> {
        let conn = self.conn();
        let row = conn.query_optional(
            "SELECT config FROM snapshot_settings WHERE entity_type = ? AND entity_id = ?",
            &[DbValue::from(entity_type), DbValue::from(entity_id)],
        )?;
        match row {
            Some(row) => {
                let raw: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    pub fn put_snapshot_settings(
        &self,
        entity_type: &str,
        entity_id: &str,
        patch: &SnapshotConfigPatch,
    ) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            r#"
            INSERT OR REPLACE INTO snapshot_settings (entity_type, entity_id, config, updated_at)
            VALUES (?, ?, ?, ?)
            "#,
            &[
                DbValue::from(entity_type),
                DbValue::from(entity_id),
                DbValue::from(serde_json::to_string(patch)?),
                DbValue::from(now_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn delete_snapshot_settings(&self, entity_type: &str, entity_id: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "DELETE FROM snapshot_settings WHERE entity_type = ? AND entity_id = ?",
            &[DbValue::from(entity_type), DbValue::from(entity_id)],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::open_test_catalog;
    use cormorant_protocol::SnapshotRetentionPatch;

    #[test]
    fn test_entity_id_shapes() {
        assert_eq!(settings_entity_id("p1", None, None), ("project", "p1".into()));
        assert_eq!(
            settings_entity_id("p1", Some("in"), None),
            ("bucket", "p1/in".into())
        );
        assert_eq!(
            settings_entity_id("p1", Some("in"), Some("users")),
            ("table", "p1/in/users".into())
        );
    }

    #[test]
    fn test_settings_store_roundtrip() {
        let (_dir, catalog) = open_test_catalog();
        let patch = SnapshotConfigPatch {
            retention: Some(SnapshotRetentionPatch {
                manual_days: Some(30),
                auto_days: None,
            }),
            ..Default::default()
        };

        assert!(catalog.get_snapshot_settings("project", "p1").unwrap().is_none());
        catalog.put_snapshot_settings("project", "p1", &patch).unwrap();

        let stored = catalog
            .get_snapshot_settings("project", "p1")
            .unwrap()
            .unwrap();
        assert_eq!(stored.retention.unwrap().manual_days, Some(30));
        // Only the delta is stored, not the merged value.
        assert!(stored.enabled.is_none());

        catalog.delete_snapshot_settings("project", "p1").unwrap();
        assert!(catalog.get_snapshot_settings("project", "p1").unwrap().is_none());
    }
}
