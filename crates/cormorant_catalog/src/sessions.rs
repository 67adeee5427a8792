//! Wire-protocol session rows.
//!
//! Lifecycle: `active` -> one of `idle_timeout`, `user_disconnect`,
//! `error`. `query_count` only ever increases.

use cormorant_db::{DbRow, DbValue};

use crate::{format_rfc3339, now_rfc3339, Catalog, CatalogError, Result};

#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub session_id: String,
    pub workspace_id: String,
    pub client_ip: Option<String>,
    pub started_at: String,
    pub last_activity_at: String,
    pub query_count: i64,
    pub status: String,
}

const SESSION_COLUMNS: &str =
    "session_id, workspace_id, client_ip, started_at, last_activity_at, query_count, status";

fn row_to_session(row: &DbRow) -> Result<SessionRecord> {
    Ok(SessionRecord {
        session_id: row.get(0)?,
        workspace_id: row.get(1)?,
        client_ip: row.get(2)?,
        started_at: row.get(3)?,
        last_activity_at: row.get(4)?,
        query_count: row.get(5)?,
        status: row.get(6)?,
    })
}

impl Catalog {
    pub fn create_session(
        &self,
        session_id: &str,
        workspace_id: &str,
        client_ip: Option<&str>,
    ) -> Result<SessionRecord> {
        let conn = self.conn();
        let now = now_rfc3339();
        conn.execute(
            &format!(
                "INSERT INTO pgwire_sessions ({SESSION_COLUMNS}) VALUES (?, ?, ?, ?, ?, 0, 'active')"
            ),
            &[
                DbValue::from(session_id),
                DbValue::from(workspace_id),
                DbValue::from(client_ip),
                DbValue::from(now.clone()),
                DbValue::from(now.clone()),
            ],
        )?;
        Ok(SessionRecord {
            session_id: session_id.to_string(),
            workspace_id: workspace_id.to_string(),
            client_ip: client_ip.map(str::to_string),
            started_at: now.clone(),
            last_activity_at: now,
            query_count: 0,
            status: "active".to_string(),
        })
    }

    pub fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let conn = self.conn();
        let row = conn.query_optional(
            &format!("SELECT {SESSION_COLUMNS} FROM pgwire_sessions WHERE session_id = ?"),
            &[DbValue::from(session_id)],
        )?;
        row.as_ref().map(row_to_session).transpose()
    }

    pub fn update_session_activity(
        &self,
        session_id: &str,
        increment_queries: bool,
    ) -> Result<()> {
        let conn = self.conn();
        let sql = if increment_queries {
            "UPDATE pgwire_sessions SET last_activity_at = ?, query_count = query_count + 1 WHERE session_id = ?"
        } else {
            "UPDATE pgwire_sessions SET last_activity_at = ? WHERE session_id = ?"
        };
        let affected = conn.execute(
            sql,
            &[DbValue::from(now_rfc3339()), DbValue::from(session_id)],
        )?;
        if affected == 0 {
            return Err(CatalogError::not_found(format!(
                "Session {session_id} not found"
            )));
        }
        Ok(())
    }

    pub fn close_session(&self, session_id: &str, status: &str) -> Result<()> {
        let conn = self.conn();
        let affected = conn.execute(
            "UPDATE pgwire_sessions SET status = ?, last_activity_at = ? WHERE session_id = ?",
            &[
                DbValue::from(status),
                DbValue::from(now_rfc3339()),
                DbValue::from(session_id),
            ],
        )?;
        if affected == 0 {
            return Err(CatalogError::not_found(format!(
                "Session {session_id} not found"
            )));
        }
        Ok(())
    }

    pub fn list_sessions(
        &self,
        workspace_id: Option<&str>,
        status: Option<&str>,
    ) -> Result<Vec<SessionRecord>> {
        let mut sql = format!("SELECT {SESSION_COLUMNS} FROM pgwire_sessions WHERE 1=1");
        let mut params = Vec::new();
        if let Some(workspace_id) = workspace_id {
            sql.push_str(" AND workspace_id = ?");
            params.push(DbValue::from(workspace_id));
        }
        if let Some(status) = status {
            sql.push_str(" AND status = ?");
            params.push(DbValue::from(status));
        }
        sql.push_str(" ORDER BY started_at DESC");

        let conn = self.conn();
        let rows = conn.query_all(&sql, &params)?;
        rows.iter().map(row_to_session).collect()
    }

    pub fn count_active_sessions(&self, workspace_id: &str) -> Result<i64> {
        let conn = self.conn();
        Ok(conn.query_scalar_i64(
            "SELECT COUNT(*) FROM pgwire_sessions WHERE workspace_id = ? AND status = 'active'",
            &[DbValue::from(workspace_id)],
        )?)
    }

    /// Mark active sessions idle when their last activity is older than
    /// the threshold. Returns the number swept.
    pub fn cleanup_stale_sessions(&self, idle_seconds: i64) -> Result<i64> {
        let cutoff = chrono::Utc::now() - chrono::Duration::seconds(idle_seconds);
        let conn = self.conn();
        let affected = conn.execute(
            "UPDATE pgwire_sessions SET status = 'idle_timeout' \
             WHERE status = 'active' AND last_activity_at < ?",
            &[DbValue::from(format_rfc3339(cutoff))],
        )?;
        Ok(affected as i64)
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::open_test_catalog;

    #[test]
    fn test_session_lifecycle() {
        let (_dir, catalog) = open_test_catalog();
        catalog.create_session("s1", "w1", Some("10.0.0.1")).unwrap();

        catalog.update_session_activity("s1", true).unwrap();
        catalog.update_session_activity("s1", true).unwrap();
        catalog.update_session_activity("s1", false).unwrap();

        let session = catalog.get_session("s1").unwrap().unwrap();
        assert_eq!(session.query_count, 2);
        assert_eq!(session.status, "active");

        catalog.close_session("s1", "user_disconnect").unwrap();
        let closed = catalog.get_session("s1").unwrap().unwrap();
        assert_eq!(closed.status, "user_disconnect");
    }

    #[test]
    fn test_count_and_filter() {
        let (_dir, catalog) = open_test_catalog();
        catalog.create_session("s1", "w1", None).unwrap();
        catalog.create_session("s2", "w1", None).unwrap();
        catalog.create_session("s3", "w2", None).unwrap();
        catalog.close_session("s2", "error").unwrap();

        assert_eq!(catalog.count_active_sessions("w1").unwrap(), 1);
        assert_eq!(catalog.list_sessions(Some("w1"), None).unwrap().len(), 2);
        assert_eq!(
            catalog.list_sessions(None, Some("active")).unwrap().len(),
            2
        );
    }

    #[test]
    fn test_cleanup_stale_only_touches_active() {
        let (_dir, catalog) = open_test_catalog();
        catalog.create_session("s1", "w1", None).unwrap();
        catalog.close_session("s1", "user_disconnect").unwrap();
        catalog.create_session("s2", "w1", None).unwrap();

        // Nothing is older than an hour yet.
        assert_eq!(catalog.cleanup_stale_sessions(3600).unwrap(), 0);
        // With a zero-second threshold the active session sweeps.
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(catalog.cleanup_stale_sessions(0).unwrap(), 1);
        let swept = catalog.get_session("s2").unwrap().unwrap();
        assert_eq!(swept.status, "idle_timeout");
        // Closed sessions keep their terminal status.
        let closed = catalog.get_session("s1").unwrap().unwrap();
        assert_eq!(closed.status, "user_disconnect");
    }
}
