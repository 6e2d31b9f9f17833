//! AccountId - opaque account key

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique key of a game account (QQ number or any provider id)
///
/// Immutable once a session exists for it. Numeric ids are stored in their
/// decimal string form so `42` and `"42"` name the same account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Create an account id from anything string-like
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Topic-safe form of the id (used for directory names)
    pub fn file_stem(&self) -> String {
        self.0
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AccountId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<u64> for AccountId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl AsRef<str> for AccountId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
