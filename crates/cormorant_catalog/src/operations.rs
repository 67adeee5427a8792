//! Append-only operation log.
//!
//! Records a total order of completed operations per project: the
//! sequence-backed id is monotonic, the timestamp is informational.

use cormorant_db::{DbRow, DbValue};

use crate::{now_rfc3339, Catalog, Result};

/// One audit entry.
#[derive(Debug, Clone, Default)]
pub struct OperationEntry {
    pub operation: String,
    pub status: String,
    pub project_id: Option<String>,
    pub request_id: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub details: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub duration_ms: Option<i64>,
}

impl OperationEntry {
    pub fn new(operation: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            status: status.into(),
            ..Default::default()
        }
    }

    pub fn project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn resource(mut self, kind: impl Into<String>, id: impl Into<String>) -> Self {
        self.resource_type = Some(kind.into());
        self.resource_id = Some(id.into());
        self
    }

    pub fn request(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn duration_ms(mut self, ms: i64) -> Self {
        self.duration_ms = Some(ms);
        self
    }
}

impl Catalog {
    pub fn log_operation(&self, entry: &OperationEntry) -> Result<()> {
        let details = entry
            .details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let conn = self.conn();
        conn.execute(
            r#"
            INSERT INTO operations_log
                (operation, status, project_id, request_id, resource_type,
                 resource_id, details, error_message, duration_ms, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            &[
                DbValue::from(entry.operation.as_str()),
                DbValue::from(entry.status.as_str()),
                DbValue::from(entry.project_id.as_deref()),
                DbValue::from(entry.request_id.as_deref()),
                DbValue::from(entry.resource_type.as_deref()),
                DbValue::from(entry.resource_id.as_deref()),
                DbValue::from(details),
                DbValue::from(entry.error_message.as_deref()),
                DbValue::from(entry.duration_ms),
                DbValue::from(now_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Recent operations for a project, newest first by monotonic id.
    pub fn list_operations(
        &self,
        project_id: &str,
        limit: i64,
    ) -> Result<Vec<(i64, String, String, String)>> {
        let conn = self.conn();
        let rows = conn.query_all(
            r#"
            SELECT id, operation, status, created_at
            FROM operations_log WHERE project_id = ?
            ORDER BY id DESC LIMIT ?
            "#,
            &[DbValue::from(project_id), DbValue::from(limit)],
        )?;
        rows.iter()
            .map(|row: &DbRow| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::open_test_catalog;

    #[test]
    fn test_log_order_is_monotonic() {
        let (_dir, catalog) = open_test_catalog();
        for op in ["create_bucket", "create_table", "delete_table"] {
            catalog
                .log_operation(
                    &OperationEntry::new(op, "success")
                        .project("p1")
                        .resource("table", "in.users")
                        .duration_ms(12),
                )
                .unwrap();
        }

        let entries = catalog.list_operations("p1", 10).unwrap();
        assert_eq!(entries.len(), 3);
        // Newest first, ids strictly decreasing.
        assert!(entries[0].0 > entries[1].0 && entries[1].0 > entries[2].0);
        assert_eq!(entries[0].1, "delete_table");
    }
}
