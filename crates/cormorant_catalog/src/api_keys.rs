//! API key rows.
//!
//! Only the SHA-256 hash of a key is stored; `key_prefix` is the
//! structured, non-secret part used in listings and logs.

use cormorant_db::{DbRow, DbValue};
use cormorant_protocol::http_types::KeyScope;

use crate::{now_rfc3339, parse_rfc3339, Catalog, CatalogError, Result};

#[derive(Debug, Clone)]
pub struct ApiKeyRecord {
    pub id: String,
    pub project_id: String,
    pub scope: KeyScope,
    pub branch_id: Option<String>,
    pub key_hash: String,
    pub key_prefix: String,
    pub description: Option<String>,
    pub created_at: String,
    pub expires_at: Option<String>,
    pub revoked: bool,
}

impl ApiKeyRecord {
    /// Active means not revoked and not past its expiry.
    pub fn is_active(&self, now: &str) -> bool {
        if self.revoked {
            return false;
        }
        match &self.expires_at {
            Some(expiry) => expiry.as_str() > now,
            None => true,
        }
    }
}

const KEY_COLUMNS: &str = "id, project_id, scope, branch_id, key_hash, key_prefix, description, created_at, expires_at, revoked";

fn row_to_key(row: &DbRow) -> Result<ApiKeyRecord> {
    let scope_raw: String = row.get(2)?;
    let scope = KeyScope::parse(&scope_raw)
        .ok_or_else(|| CatalogError::invalid_state(format!("Unknown key scope '{scope_raw}'")))?;
    Ok(ApiKeyRecord {
        id: row.get(0)?,
        project_id: row.get(1)?,
        scope,
        branch_id: row.get(3)?,
        key_hash: row.get(4)?,
        key_prefix: row.get(5)?,
        description: row.get(6)?,
        created_at: row.get(7)?,
        expires_at: row.get(8)?,
        revoked: row.get(9)?,
    })
}

impl Catalog {
    #[allow(clippy::too_many_arguments)]
    pub fn create_api_key(
        &self,
        id: &str,
        project_id: &str,
        scope: KeyScope,
        branch_id: Option<&str>,
        key_hash: &str,
        key_prefix: &str,
        description: Option<&str>,
        expires_at: Option<&str>,
    ) -> Result<ApiKeyRecord> {
        let conn = self.conn();
        let now = now_rfc3339();
        conn.execute(
            r#"
            INSERT INTO api_keys
                (id, project_id, scope, branch_id, key_hash, key_prefix,
                 description, created_at, expires_at, revoked)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, false)
            "#,
            &[
                DbValue::from(id),
                DbValue::from(project_id),
                DbValue::from(scope.as_str()),
                DbValue::from(branch_id),
                DbValue::from(key_hash),
                DbValue::from(key_prefix),
                DbValue::from(description),
                DbValue::from(now.clone()),
                DbValue::from(expires_at),
            ],
        )?;

        Ok(ApiKeyRecord {
            id: id.to_string(),
            project_id: project_id.to_string(),
            scope,
            branch_id: branch_id.map(str::to_string),
            key_hash: key_hash.to_string(),
            key_prefix: key_prefix.to_string(),
            description: description.map(str::to_string),
            created_at: now,
            expires_at: expires_at.map(str::to_string),
            revoked: false,
        })
    }

    pub fn get_api_key(&self, project_id: &str, key_id: &str) -> Result<Option<ApiKeyRecord>> {
        let conn = self.conn();
        let row = conn.query_optional(
            &format!("SELECT {KEY_COLUMNS} FROM api_keys WHERE project_id = ? AND id = ?"),
            &[DbValue::from(project_id), DbValue::from(key_id)],
        )?;
        row.as_ref().map(row_to_key).transpose()
    }

    /// Lookup by the hash of a presented key (authentication path).
    pub fn find_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKeyRecord>> {
        let conn = self.conn();
        let row = conn.query_optional(
            &format!("SELECT {KEY_COLUMNS} FROM api_keys WHERE key_hash = ?"),
            &[DbValue::from(key_hash)],
        )?;
        row.as_ref().map(row_to_key).transpose()
    }

    pub fn list_api_keys(
        &self,
        project_id: &str,
        include_revoked: bool,
    ) -> Result<Vec<ApiKeyRecord>> {
        let conn = self.conn();
        let sql = if include_revoked {
            format!(
                "SELECT {KEY_COLUMNS} FROM api_keys WHERE project_id = ? ORDER BY created_at"
            )
        } else {
            format!(
                "SELECT {KEY_COLUMNS} FROM api_keys WHERE project_id = ? AND NOT revoked ORDER BY created_at"
            )
        };
        let rows = conn.query_all(&sql, &[DbValue::from(project_id)])?;
        rows.iter().map(row_to_key).collect()
    }

    /// Count active project-admin keys (lockout-prevention input).
    pub fn count_active_admin_keys(&self, project_id: &str) -> Result<i64> {
        let keys = self.list_api_keys(project_id, false)?;
        let now = now_rfc3339();
        Ok(keys
            .iter()
            .filter(|k| k.scope == KeyScope::ProjectAdmin && k.is_active(&now))
            .count() as i64)
    }

    /// Soft-revoke a key. Refused when it is the last active project-admin
    /// key of its project.
    pub fn revoke_api_key(&self, project_id: &str, key_id: &str) -> Result<ApiKeyRecord> {
        let record = self
            .get_api_key(project_id, key_id)?
            .ok_or_else(|| CatalogError::not_found(format!("API key {key_id} not found")))?;

        if record.scope == KeyScope::ProjectAdmin
            && !record.revoked
            && self.count_active_admin_keys(project_id)? <= 1
        {
            return Err(CatalogError::conflict(
                "Cannot revoke the last active project_admin key",
            ));
        }

        let conn = self.conn();
        conn.execute(
            "UPDATE api_keys SET revoked = true WHERE project_id = ? AND id = ?",
            &[DbValue::from(project_id), DbValue::from(key_id)],
        )?;
        Ok(ApiKeyRecord {
            revoked: true,
            ..record
        })
    }

    /// Remaining lifetime of a key in whole seconds, if it has an expiry.
    pub fn key_remaining_ttl_seconds(record: &ApiKeyRecord) -> Result<Option<i64>> {
        match &record.expires_at {
            None => Ok(None),
            Some(expiry) => {
                let expiry = parse_rfc3339(expiry)?;
                let remaining = (expiry - chrono::Utc::now()).num_seconds();
                Ok(Some(remaining.max(0)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::open_test_catalog;
    use cormorant_security::{generate_project_key, hash_key, key_prefix};

    fn insert_admin_key(catalog: &Catalog, project: &str, id: &str) -> String {
        let key = generate_project_key(project);
        catalog
            .create_api_key(
                id,
                project,
                KeyScope::ProjectAdmin,
                None,
                &hash_key(&key),
                &key_prefix(&key),
                None,
                None,
            )
            .unwrap();
        key
    }

    #[test]
    fn test_find_by_hash() {
        let (_dir, catalog) = open_test_catalog();
        let key = insert_admin_key(&catalog, "p1", "k1");

        let found = catalog.find_api_key_by_hash(&hash_key(&key)).unwrap().unwrap();
        assert_eq!(found.id, "k1");
        assert!(catalog.find_api_key_by_hash("deadbeef").unwrap().is_none());
    }

    #[test]
    fn test_last_admin_key_cannot_be_revoked() {
        let (_dir, catalog) = open_test_catalog();
        insert_admin_key(&catalog, "p1", "k1");

        let err = catalog.revoke_api_key("p1", "k1").unwrap_err();
        assert!(matches!(err, CatalogError::Conflict(_)));

        // With a second active admin key, revocation succeeds.
        insert_admin_key(&catalog, "p1", "k2");
        let revoked = catalog.revoke_api_key("p1", "k1").unwrap();
        assert!(revoked.revoked);

        // And now k2 is the last one again.
        let err = catalog.revoke_api_key("p1", "k2").unwrap_err();
        assert!(matches!(err, CatalogError::Conflict(_)));
    }

    #[test]
    fn test_branch_keys_do_not_count_as_admin() {
        let (_dir, catalog) = open_test_catalog();
        insert_admin_key(&catalog, "p1", "k1");
        catalog
            .create_api_key(
                "k2",
                "p1",
                KeyScope::BranchRead,
                Some("b1"),
                "hash",
                "proj_p1_branch_b1_read_...",
                None,
                None,
            )
            .unwrap();

        assert_eq!(catalog.count_active_admin_keys("p1").unwrap(), 1);
        // Branch keys can always be revoked.
        assert!(catalog.revoke_api_key("p1", "k2").unwrap().revoked);
    }

    #[test]
    fn test_list_filters_revoked() {
        let (_dir, catalog) = open_test_catalog();
        insert_admin_key(&catalog, "p1", "k1");
        insert_admin_key(&catalog, "p1", "k2");
        catalog.revoke_api_key("p1", "k1").unwrap();

        assert_eq!(catalog.list_api_keys("p1", false).unwrap().len(), 1);
        assert_eq!(catalog.list_api_keys("p1", true).unwrap().len(), 2);
    }
}
