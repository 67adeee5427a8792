//! API key formats, generation, parsing, and verification.
//!
//! Three formats are accepted:
//!
//! 1. Project admin (legacy): `proj_{project_id}_admin_{random_hex_32}`
//! 2. Branch admin: `proj_{project_id}_branch_{branch_id}_admin_{random_hex_32}`
//! 3. Branch read-only: `proj_{project_id}_branch_{branch_id}_read_{random_hex_32}`
//!
//! The random tail is 16 bytes of OS randomness, hex-encoded. Everything
//! before the tail is structured metadata and safe to log.

use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::constant_time_eq;

/// Scope encoded in a branch key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchKeyScope {
    Admin,
    Read,
}

impl BranchKeyScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Read => "read",
        }
    }
}

/// Components parsed out of a well-formed key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
    pub project_id: String,
    /// `None` for the legacy project-admin format.
    pub branch_id: Option<String>,
    pub scope: BranchKeyScope,
}

impl KeyInfo {
    pub fn is_admin(&self) -> bool {
        matches!(self.scope, BranchKeyScope::Admin)
    }
}

fn random_hex_tail() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Generate a new project admin key: `proj_{project_id}_admin_{hex}`.
pub fn generate_project_key(project_id: &str) -> String {
    let key = format!("proj_{}_admin_{}", project_id, random_hex_tail());
    debug!(project_id, key_prefix = %key_prefix(&key), "generated project admin key");
    key
}

/// Generate a new branch key: `proj_{pid}_branch_{bid}_{scope}_{hex}`.
pub fn generate_branch_key(project_id: &str, branch_id: &str, scope: BranchKeyScope) -> String {
    let key = format!(
        "proj_{}_branch_{}_{}_{}",
        project_id,
        branch_id,
        scope.as_str(),
        random_hex_tail()
    );
    debug!(
        project_id,
        branch_id,
        scope = scope.as_str(),
        key_prefix = %key_prefix(&key),
        "generated branch key"
    );
    key
}

/// Parse a key into its components. Returns `None` when the key matches
/// neither the legacy project format nor the branch format.
pub fn parse_key(key: &str) -> Option<KeyInfo> {
    let parts: Vec<&str> = key.split('_').collect();

    // Branch format: ["proj", pid, "branch", bid, scope, random]
    if parts.len() == 6 && parts[0] == "proj" && parts[2] == "branch" {
        let scope = match parts[4] {
            "admin" => BranchKeyScope::Admin,
            "read" => BranchKeyScope::Read,
            _ => return None,
        };
        return Some(KeyInfo {
            project_id: parts[1].to_string(),
            branch_id: Some(parts[3].to_string()),
            scope,
        });
    }

    // Legacy project admin format: ["proj", pid, "admin", random]
    if parts.len() == 4 && parts[0] == "proj" && parts[2] == "admin" {
        return Some(KeyInfo {
            project_id: parts[1].to_string(),
            branch_id: None,
            scope: BranchKeyScope::Admin,
        });
    }

    None
}

/// Safe prefix for listings and logs: everything before the random tail,
/// with a trailing ellipsis.
pub fn key_prefix(key: &str) -> String {
    let parts: Vec<&str> = key.split('_').collect();

    if parts.len() >= 6 && parts[2] == "branch" {
        return format!("{}_...", parts[..5].join("_"));
    }
    if parts.len() >= 4 {
        return format!("{}_...", parts[..3].join("_"));
    }
    if key.len() > 20 {
        format!("{}...", &key[..20])
    } else {
        format!("{key}...")
    }
}

/// One-way hash of a key (SHA-256, hex). Raw keys are never stored.
pub fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Verify a presented key against its stored hash in constant time.
pub fn verify_key_hash(key: &str, stored_hash: &str) -> bool {
    let computed = hash_key(key);
    constant_time_eq(computed.as_bytes(), stored_hash.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_project_key_format() {
        let key = generate_project_key("123");
        assert!(key.starts_with("proj_123_admin_"));
        let tail = key.rsplit('_').next().unwrap();
        assert_eq!(tail.len(), 32);
        assert!(tail.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generate_branch_key_format() {
        let admin = generate_branch_key("123", "456", BranchKeyScope::Admin);
        assert!(admin.starts_with("proj_123_branch_456_admin_"));

        let read = generate_branch_key("123", "456", BranchKeyScope::Read);
        assert!(read.starts_with("proj_123_branch_456_read_"));
    }

    #[test]
    fn test_parse_key_both_formats() {
        let legacy = parse_key("proj_123_admin_a1b2c3d4e5f6a7b8").unwrap();
        assert_eq!(legacy.project_id, "123");
        assert_eq!(legacy.branch_id, None);
        assert!(legacy.is_admin());

        let branch = parse_key("proj_123_branch_456_read_a1b2c3d4e5f6a7b8").unwrap();
        assert_eq!(branch.project_id, "123");
        assert_eq!(branch.branch_id.as_deref(), Some("456"));
        assert_eq!(branch.scope, BranchKeyScope::Read);

        assert!(parse_key("invalid_key").is_none());
        assert!(parse_key("proj_123_branch_456_owner_a1b2").is_none());
    }

    #[test]
    fn test_key_prefix() {
        assert_eq!(
            key_prefix("proj_123_admin_a1b2c3d4e5f6a7b8"),
            "proj_123_admin_..."
        );
        assert_eq!(
            key_prefix("proj_123_branch_456_admin_a1b2c3d4e5f6a7b8"),
            "proj_123_branch_456_admin_..."
        );
        assert_eq!(key_prefix("short"), "short...");
    }

    #[test]
    fn test_hash_and_verify() {
        let key = generate_project_key("p1");
        let stored = hash_key(&key);
        assert_eq!(stored.len(), 64);
        assert!(verify_key_hash(&key, &stored));
        assert!(!verify_key_hash("proj_p1_admin_0000", &stored));
    }

    #[test]
    fn test_distinct_keys_distinct_hashes() {
        let a = generate_project_key("p1");
        let b = generate_project_key("p1");
        assert_ne!(a, b);
        assert_ne!(hash_key(&a), hash_key(&b));
        assert_eq!(hash_key(&a), hash_key(&a));
    }
}
