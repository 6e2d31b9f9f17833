//! BotDaemon configuration types and loading

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

/// Main BotDaemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level override (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Storage locations
    pub storage: StorageConfig,

    /// QR login polling
    pub login: LoginConfig,

    /// Per-session limits
    pub session: SessionConfig,

    /// Event hub sizing
    pub hub: HubConfig,

    /// Registry shutdown
    pub shutdown: ShutdownConfig,

    /// Auth provider endpoints
    pub provider: ProviderConfig,

    /// Bot runner
    pub runner: RunnerConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .botdaemon.yml
        let local_config = PathBuf::from(".botdaemon.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/botdaemon/botdaemon.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("botdaemon").join("botdaemon.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("botdaemon")
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Account file path
    #[serde(rename = "accounts-file")]
    pub accounts_file: PathBuf,

    /// Directory for per-account event logs
    #[serde(rename = "runs-dir")]
    pub runs_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let dir = data_dir();
        Self {
            accounts_file: dir.join("accounts.json"),
            runs_dir: dir.join("runs"),
        }
    }
}

/// QR login polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginConfig {
    /// Delay between scan-status polls
    #[serde(rename = "poll-interval-ms")]
    pub poll_interval_ms: u64,

    /// Wall-clock bound for one login attempt
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Maximum number of scan-status polls
    #[serde(rename = "max-poll-attempts")]
    pub max_poll_attempts: u32,

    /// Consecutive poll errors before the attempt fails
    #[serde(rename = "max-consecutive-errors")]
    pub max_consecutive_errors: u32,

    /// How long cancelLogin waits for the attempt to acknowledge
    #[serde(rename = "cancel-timeout-ms")]
    pub cancel_timeout_ms: u64,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            timeout_ms: 120_000,
            max_poll_attempts: 60,
            max_consecutive_errors: 5,
            cancel_timeout_ms: 5000,
        }
    }
}

impl LoginConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cancel_timeout(&self) -> Duration {
        Duration::from_millis(self.cancel_timeout_ms)
    }
}

/// Per-session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Log entries retained per session
    #[serde(rename = "log-capacity")]
    pub log_capacity: usize,

    /// Deadline after which stop aborts an unresponsive run task
    #[serde(rename = "force-stop-timeout-ms")]
    pub force_stop_timeout_ms: u64,

    /// Session command queue depth
    #[serde(rename = "command-buffer")]
    pub command_buffer: usize,

    /// Start the bot automatically after a successful QR login
    #[serde(rename = "start-after-login")]
    pub start_after_login: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            log_capacity: 1000,
            force_stop_timeout_ms: 5000,
            command_buffer: 64,
            start_after_login: false,
        }
    }
}

impl SessionConfig {
    pub fn force_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.force_stop_timeout_ms)
    }
}

/// Event hub configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Per-observer queue depth before the oldest events are dropped
    #[serde(rename = "observer-queue-capacity")]
    pub observer_queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            observer_queue_capacity: 1024,
        }
    }
}

/// Registry shutdown configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Global deadline for stopping every session
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { timeout_ms: 10_000 }
    }
}

impl ShutdownConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Auth provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Provider API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Base URL encoded in the QR code
    #[serde(rename = "qr-base-url")]
    pub qr_base_url: String,

    /// Game app id sent with the ticket exchange
    #[serde(rename = "app-id")]
    pub app_id: String,

    /// Client version header
    pub qua: String,

    /// User agent header
    #[serde(rename = "user-agent")]
    pub user_agent: String,

    /// Per-request timeout
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://q.qq.com".to_string(),
            qr_base_url: "https://h5.qzone.qq.com/qqq/code".to_string(),
            app_id: "1112386029".to_string(),
            qua: "V1_HT5_QDT_0.70.2209190_x64_0_DEV_D".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
                         Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
            timeout_ms: 15_000,
        }
    }
}

/// Bot runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Interval between heartbeat log lines
    #[serde(rename = "heartbeat-secs")]
    pub heartbeat_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self { heartbeat_secs: 30 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.login.poll_interval_ms, 2000);
        assert_eq!(config.login.timeout_ms, 120_000);
        assert_eq!(config.login.max_consecutive_errors, 5);
        assert_eq!(config.session.log_capacity, 1000);
        assert_eq!(config.session.force_stop_timeout_ms, 5000);
        assert!(!config.session.start_after_login);
        assert_eq!(config.hub.observer_queue_capacity, 1024);
        assert_eq!(config.provider.app_id, "1112386029");
        assert!(config.storage.accounts_file.ends_with("accounts.json"));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
log-level: debug
login:
  poll-interval-ms: 500
session:
  start-after-login: true
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.login.poll_interval_ms, 500);
        assert_eq!(config.login.timeout_ms, 120_000);
        assert!(config.session.start_after_login);
        assert_eq!(config.session.log_capacity, 1000);
    }

    #[test]
    fn test_load_explicit_path() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("bd.yml");
        fs::write(&path, "shutdown:\n  timeout-ms: 250\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.shutdown.timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let path = PathBuf::from("/nonexistent/botdaemon.yml");
        assert!(Config::load(Some(&path)).is_err());
    }
}
