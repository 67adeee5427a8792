//! Idempotency entries.
//!
//! Keyed by the caller-supplied `X-Idempotency-Key` header value. The key
//! space is global, not per-project, because keys are caller-scoped
//! secrets. Expired rows behave as absent on lookup; a sweep helper
//! removes them in bulk.

use cormorant_db::{DbRow, DbValue};

use crate::{now_rfc3339, Catalog, Result};

#[derive(Debug, Clone)]
pub struct IdempotencyRecord {
    pub key: String,
    pub method: String,
    pub endpoint: String,
    pub request_hash: Option<String>,
    pub response_status: i64,
    pub response_body: Option<String>,
    pub created_at: String,
    pub expires_at: String,
}

fn row_to_record(row: &DbRow) -> Result<IdempotencyRecord> {
    Ok(IdempotencyRecord {
        key: row.get(0)?,
        method: row.get(1)?,
        endpoint: row.get(2)?,
        request_hash: row.get(3)?,
        response_status: row.get(4)?,
        response_body: row.get(5)?,
        created_at: row.get(6)?,
        expires_at: row.get(7)?,
    })
}

impl Catalog {
    /// Look up a cached response. Expired entries are deleted and treated
    /// as a miss.
    pub fn get_idempotency_entry(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        let conn = self.conn();
        let row = conn.query_optional(
            r#"
            SELECT key, method, endpoint, request_hash, response_status,
                   response_body, created_at, expires_at
            FROM idempotency_keys WHERE key = ?
            "#,
            &[DbValue::from(key)],
        )?;
        let Some(row) = row else {
            return Ok(None);
        };
        let record = row_to_record(&row)?;
        if record.expires_at.as_str() <= now_rfc3339().as_str() {
            conn.execute(
                "DELETE FROM idempotency_keys WHERE key = ?",
                &[DbValue::from(key)],
            )?;
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Persist a response for replay. Overwrites any previous (expired)
    /// row under the same key.
    #[allow(clippy::too_many_arguments)]
    pub fn store_idempotency_entry(
        &self,
        key: &str,
        method: &str,
        endpoint: &str,
        request_hash: Option<&str>,
        response_status: i64,
        response_body: Option<&str>,
        ttl_seconds: i64,
    ) -> Result<()> {
        let now = chrono::Utc::now();
        let expires = now + chrono::Duration::seconds(ttl_seconds);
        let conn = self.conn();
        conn.execute(
            r#"
            INSERT OR REPLACE INTO idempotency_keys
                (key, method, endpoint, request_hash, response_status,
                 response_body, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            &[
                DbValue::from(key),
                DbValue::from(method),
                DbValue::from(endpoint),
                DbValue::from(request_hash),
                DbValue::from(response_status),
                DbValue::from(response_body),
                DbValue::from(crate::format_rfc3339(now)),
                DbValue::from(crate::format_rfc3339(expires)),
            ],
        )?;
        Ok(())
    }

    /// Delete every expired entry; returns the number removed.
    pub fn sweep_expired_idempotency_entries(&self) -> Result<i64> {
        let conn = self.conn();
        let affected = conn.execute(
            "DELETE FROM idempotency_keys WHERE expires_at <= ?",
            &[DbValue::from(now_rfc3339())],
        )?;
        Ok(affected as i64)
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::open_test_catalog;

    #[test]
    fn test_store_and_replay() {
        let (_dir, catalog) = open_test_catalog();
        catalog
            .store_idempotency_entry(
                "k1",
                "POST",
                "/projects",
                Some("bodyhash"),
                201,
                Some(r#"{"id":"p1"}"#),
                600,
            )
            .unwrap();

        let hit = catalog.get_idempotency_entry("k1").unwrap().unwrap();
        assert_eq!(hit.method, "POST");
        assert_eq!(hit.response_status, 201);
        assert_eq!(hit.response_body.as_deref(), Some(r#"{"id":"p1"}"#));

        assert!(catalog.get_idempotency_entry("nope").unwrap().is_none());
    }

    #[test]
    fn test_expired_entries_behave_as_absent() {
        let (_dir, catalog) = open_test_catalog();
        catalog
            .store_idempotency_entry("k1", "POST", "/projects", None, 201, None, -5)
            .unwrap();
        assert!(catalog.get_idempotency_entry("k1").unwrap().is_none());
    }

    #[test]
    fn test_sweep_expired() {
        let (_dir, catalog) = open_test_catalog();
        catalog
            .store_idempotency_entry("live", "POST", "/a", None, 200, None, 600)
            .unwrap();
        catalog
            .store_idempotency_entry("dead", "POST", "/b", None, 200, None, -5)
            .unwrap();

        assert_eq!(catalog.sweep_expired_idempotency_entries().unwrap(), 1);
        assert!(catalog.get_idempotency_entry("live").unwrap().is_some());
    }
}
