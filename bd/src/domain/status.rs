//! Session and login status enums

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Lifecycle status of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created, not logged in and not running
    #[default]
    Idle,
    /// A QR login attempt is in flight
    LoggingIn,
    /// The bot run task is active
    Running,
    /// Stop requested, waiting for the run task or login to finish
    Stopping,
    /// Run task finished or was stopped
    Stopped,
    /// Unrecoverable fault; only an explicit reset leaves this state
    Error,
}

impl SessionStatus {
    /// Whether `start` is allowed from this status
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Idle | Self::Stopped)
    }

    /// Whether `startLogin` is allowed from this status
    pub fn can_login(&self) -> bool {
        matches!(self, Self::Idle | Self::Stopped)
    }

    /// Whether `stop` is allowed from this status
    pub fn can_stop(&self) -> bool {
        matches!(self, Self::Running | Self::LoggingIn)
    }

    /// Whether `reset` is allowed from this status
    pub fn can_reset(&self) -> bool {
        matches!(self, Self::Error | Self::Stopped)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::LoggingIn => "logging_in",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// State of one QR login attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoginState {
    /// Login code not yet obtained
    #[default]
    Requested,
    /// QR shown, polling for a scan
    AwaitingScan,
    /// Scan confirmed, exchanging the ticket
    Scanned,
    /// Auth code obtained
    Succeeded,
    /// Timed out before a scan
    Expired,
    /// Cancelled by request
    Cancelled,
    /// Provider failure, used code or exhausted retries
    Failed,
}

impl LoginState {
    /// Terminal states end the attempt
    pub fn is_terminal(&self) -> bool {
        debug!(?self, "LoginState::is_terminal: called");
        matches!(self, Self::Succeeded | Self::Expired | Self::Cancelled | Self::Failed)
    }

    /// Cancellation is only honoured before the scan is confirmed
    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::Requested | Self::AwaitingScan)
    }
}

impl fmt::Display for LoginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Requested => "requested",
            Self::AwaitingScan => "awaiting_scan",
            Self::Scanned => "scanned",
            Self::Succeeded => "succeeded",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_status_transitions_allowed() {
        assert!(SessionStatus::Idle.can_start());
        assert!(SessionStatus::Stopped.can_start());
        assert!(!SessionStatus::Running.can_start());
        assert!(!SessionStatus::Error.can_start());

        assert!(SessionStatus::Running.can_stop());
        assert!(SessionStatus::LoggingIn.can_stop());
        assert!(!SessionStatus::Idle.can_stop());

        assert!(SessionStatus::Error.can_reset());
        assert!(!SessionStatus::Running.can_reset());
    }

    #[test]
    fn test_login_terminal_states() {
        for state in [
            LoginState::Succeeded,
            LoginState::Expired,
            LoginState::Cancelled,
            LoginState::Failed,
        ] {
            assert!(state.is_terminal(), "{state} should be terminal");
            assert!(!state.is_cancellable());
        }
        assert!(!LoginState::AwaitingScan.is_terminal());
        assert!(LoginState::AwaitingScan.is_cancellable());
        assert!(!LoginState::Scanned.is_cancellable());
    }

    #[test]
    fn test_status_serde_snake_case() {
        let json = serde_json::to_string(&SessionStatus::LoggingIn).unwrap();
        assert_eq!(json, "\"logging_in\"");
        assert_eq!(SessionStatus::LoggingIn.to_string(), "logging_in");
    }
}
