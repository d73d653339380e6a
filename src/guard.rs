//! Lexical admission filter enforcing the read-only, SELECT-only policy.
//!
//! The scan is substring-based, not tokenized: a column named `updated_at`
//! trips UPDATE, and OFFSET trips SET. Accepted over-approximation; the
//! runner's read-only transaction enforces the policy at the engine level
//! behind it.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::Rejection;

const MIN_LEN: usize = 5;
const MAX_LEN: usize = 2000;

/// Mutating, DDL and session keywords that end the conversation immediately.
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "INSERT", "UPDATE", "ALTER", "CREATE", "TRUNCATE", "GRANT", "REVOKE",
    "COMMIT", "ROLLBACK", "SAVEPOINT", "SET", "LOCK", "UNLOCK", "CALL", "EXEC", "EXECUTE",
    "DECLARE",
];

static SUSPICIOUS_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i);\s*(DROP|DELETE|INSERT|UPDATE|ALTER)",
        r"(?i)UNION.*SELECT.*FROM",
        r"(?m)--.*$",
        r"/\*.*\*/",
        r"(?i)xp_cmdshell",
        r"(?i)sp_executesql",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("suspicious pattern must compile"))
    .collect()
});

/// Query text that passed admission. The runner accepts nothing else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedQuery(String);

impl ValidatedQuery {
    pub fn text(&self) -> &str {
        &self.0
    }
}

/// Admit or reject a raw query. The original, case-preserving text is what
/// comes back out; the guard filters, it never rewrites.
pub fn admit(query: &str) -> Result<ValidatedQuery, Rejection> {
    let trimmed = query.trim();
    let length = trimmed.chars().count();
    if length < MIN_LEN {
        return Err(Rejection::TooShort);
    }
    if length > MAX_LEN {
        return Err(Rejection::TooLong);
    }

    let normalized = trimmed.to_uppercase();
    for keyword in FORBIDDEN_KEYWORDS.iter().copied() {
        if normalized.contains(keyword) {
            return Err(Rejection::Forbidden(keyword));
        }
    }
    if !normalized.starts_with("SELECT") {
        return Err(Rejection::NotSelect);
    }
    if SUSPICIOUS_PATTERNS.iter().any(|p| p.is_match(trimmed)) {
        return Err(Rejection::Unsafe);
    }

    Ok(ValidatedQuery(trimmed.to_string()))
}
