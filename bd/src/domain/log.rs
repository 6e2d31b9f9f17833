//! LogEntry - one user-facing session log line

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AccountId;

/// Severity of a session log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Immutable log entry, as pushed to observers in `botLog` events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub account_id: AccountId,
    pub time: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    /// Create an entry stamped with the current time
    pub fn new(account_id: AccountId, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            account_id,
            time: Utc::now(),
            level,
            message: message.into(),
        }
    }
}
