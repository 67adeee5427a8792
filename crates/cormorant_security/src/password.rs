//! Workspace password hashing.
//!
//! The wire-session bridge stores SHA-256 hex digests of workspace
//! passwords and compares them with the same constant-time discipline as
//! API key hashes.

use sha2::{Digest, Sha256};

/// SHA-256 hex digest of a workspace password.
pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_password_stable() {
        let h1 = hash_password("hunter2");
        let h2 = hash_password("hunter2");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert_ne!(h1, hash_password("hunter3"));
    }
}
