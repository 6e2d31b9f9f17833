//! AccountRecord - one persisted game account

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Platform used when a record does not name one
pub const DEFAULT_PLATFORM: &str = "qq";

/// Current time as Unix milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn default_platform() -> String {
    DEFAULT_PLATFORM.to_string()
}

/// A persisted account and its per-account bot configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AccountRecord {
    /// Account key (QQ number or other provider id)
    pub id: String,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Login platform
    #[serde(default = "default_platform")]
    pub platform: String,

    /// Auth code obtained by the last successful QR login
    #[serde(default)]
    pub auth_code: Option<String>,

    /// Start this bot when the daemon boots
    #[serde(default)]
    pub auto_start: bool,

    /// Opaque game configuration handed to the bot runner
    #[serde(default)]
    pub config: Value,

    /// Creation timestamp (Unix milliseconds)
    #[serde(default)]
    pub created_at: i64,

    /// Last update timestamp (Unix milliseconds)
    #[serde(default)]
    pub updated_at: i64,
}

impl AccountRecord {
    /// Create a new record with default platform and empty config
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: id.into(),
            name: name.into(),
            platform: default_platform(),
            auth_code: None,
            auto_start: false,
            config: Value::Null,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder: set the auto-start flag
    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    /// Builder: set the game configuration
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    /// Builder: set the platform
    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    /// Whether a usable auth code is stored
    pub fn has_auth_code(&self) -> bool {
        self.auth_code.as_deref().is_some_and(|c| !c.is_empty())
    }

    /// Bump the update timestamp
    pub fn touch(&mut self) {
        self.updated_at = now_ms();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_defaults() {
        let record = AccountRecord::new("10001", "main");
        assert_eq!(record.platform, "qq");
        assert!(!record.auto_start);
        assert!(!record.has_auth_code());
        assert_eq!(record.created_at, record.updated_at);
    }

    #[test]
    fn test_deserialize_minimal_record() {
        let record: AccountRecord = serde_json::from_str(r#"{"id": "42"}"#).unwrap();
        assert_eq!(record.id, "42");
        assert_eq!(record.platform, DEFAULT_PLATFORM);
        assert_eq!(record.config, Value::Null);
    }

    #[test]
    fn test_empty_auth_code_is_not_usable() {
        let mut record = AccountRecord::new("7", "alt");
        record.auth_code = Some(String::new());
        assert!(!record.has_auth_code());
        record.auth_code = Some("abc".to_string());
        assert!(record.has_auth_code());
    }

    #[test]
    fn test_serialized_keys_are_kebab_case() {
        let record = AccountRecord::new("1", "a").with_auto_start(true);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("auto-start"));
        assert!(json.contains("created-at"));
    }
}
