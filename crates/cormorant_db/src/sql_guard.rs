//! Export filter guard.
//!
//! The export endpoint accepts a caller-supplied WHERE expression that is
//! spliced into a read-only COPY query. This guard is a coarse safety
//! net, not a grammar: it rejects statement terminators, comment tokens,
//! and DDL/DML keywords by substring scan after lowercasing. A proper
//! grammar-level gate is preferable but out of scope.

use std::error::Error;
use std::fmt;

const DANGEROUS_PATTERNS: &[&str] = &[
    ";", "--", "/*", "*/", "drop ", "truncate ", "alter ", "delete ", "insert ", "update ",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlGuardError {
    message: String,
    pattern: String,
}

impl SqlGuardError {
    fn new(pattern: &str) -> Self {
        Self {
            message: format!("Invalid WHERE clause: contains '{pattern}'"),
            pattern: pattern.to_string(),
        }
    }

    /// The denylisted token that triggered rejection.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

impl fmt::Display for SqlGuardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for SqlGuardError {}

/// Validate a WHERE filter expression against the denylist.
pub fn validate_where_filter(filter: &str) -> Result<(), SqlGuardError> {
    let lowered = filter.to_lowercase();
    for pattern in DANGEROUS_PATTERNS {
        if lowered.contains(pattern) {
            return Err(SqlGuardError::new(pattern));
        }
    }
    Ok(())
}
