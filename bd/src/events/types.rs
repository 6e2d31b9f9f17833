//! Event types for BotDaemon activity streaming
//!
//! These events are everything an observer can learn about a session:
//! - Log lines (`botLog`)
//! - Status transitions and runner state (`bot:statusChange`, `bot:stateUpdate`)
//! - QR login progress (`qr:*`)
//! - Run-time faults (`bot:error`)

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{AccountId, LogEntry, SessionStatus};
use crate::error::OrchestratorError;

/// Core event enum - the vocabulary of session activity
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum BotEvent {
    /// A session log line
    #[serde(rename = "botLog")]
    Log(LogEntry),

    /// Session status changed
    #[serde(rename = "bot:statusChange")]
    StatusChange { account_id: AccountId, status: SessionStatus },

    /// Opaque runner state (farm status, inventory, ...)
    #[serde(rename = "bot:stateUpdate")]
    StateUpdate { account_id: AccountId, state: Value },

    /// A login code was issued and the QR code is ready to scan
    #[serde(rename = "qr:ready")]
    QrReady {
        account_id: AccountId,
        login_code: String,
        qr_payload: String,
        /// `data:` URL of the rendered QR image, when rendering succeeded
        #[serde(default, skip_serializing_if = "Option::is_none")]
        qr_image: Option<String>,
    },

    /// The QR code was scanned
    #[serde(rename = "qr:scanned")]
    QrScanned { account_id: AccountId },

    /// Login finished with an auth code
    #[serde(rename = "qr:success")]
    QrSuccess { account_id: AccountId, auth_code: String },

    /// Login timed out before a scan
    #[serde(rename = "qr:expired")]
    QrExpired { account_id: AccountId },

    /// Login failed
    #[serde(rename = "qr:error")]
    QrError { account_id: AccountId, reason: String },

    /// Login was cancelled
    #[serde(rename = "qr:cancelled")]
    QrCancelled { account_id: AccountId },

    /// The run task faulted; the session is in Error until reset
    #[serde(rename = "bot:error")]
    BotError { account_id: AccountId, reason: String },
}

impl BotEvent {
    /// Account this event belongs to
    pub fn account_id(&self) -> &AccountId {
        match self {
            Self::Log(entry) => &entry.account_id,
            Self::StatusChange { account_id, .. }
            | Self::StateUpdate { account_id, .. }
            | Self::QrReady { account_id, .. }
            | Self::QrScanned { account_id }
            | Self::QrSuccess { account_id, .. }
            | Self::QrExpired { account_id }
            | Self::QrError { account_id, .. }
            | Self::QrCancelled { account_id }
            | Self::BotError { account_id, .. } => account_id,
        }
    }

    /// Event name as seen by observers
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Log(_) => "botLog",
            Self::StatusChange { .. } => "bot:statusChange",
            Self::StateUpdate { .. } => "bot:stateUpdate",
            Self::QrReady { .. } => "qr:ready",
            Self::QrScanned { .. } => "qr:scanned",
            Self::QrSuccess { .. } => "qr:success",
            Self::QrExpired { .. } => "qr:expired",
            Self::QrError { .. } => "qr:error",
            Self::QrCancelled { .. } => "qr:cancelled",
            Self::BotError { .. } => "bot:error",
        }
    }

    /// Error kind for a QR login that ended without an auth code
    ///
    /// `None` for success, cancellation and every non-terminal event.
    pub fn login_error(&self) -> Option<OrchestratorError> {
        match self {
            Self::QrExpired { account_id } => Some(OrchestratorError::Timeout(format!(
                "QR login for account {account_id} expired"
            ))),
            Self::QrError { reason, .. } => Some(OrchestratorError::ProviderProtocol(reason.clone())),
            _ => None,
        }
    }

    /// Whether this is a terminal QR login event
    pub fn is_login_terminal(&self) -> bool {
        matches!(
            self,
            Self::QrSuccess { .. } | Self::QrExpired { .. } | Self::QrError { .. } | Self::QrCancelled { .. }
        )
    }

    /// Topics this event is delivered on
    ///
    /// Every event goes to its account topic. Logs are mirrored to
    /// [`Topic::AllLogs`], everything else to [`Topic::StatusChanges`].
    pub fn topics(&self) -> [Topic; 2] {
        let scoped = Topic::Account(self.account_id().clone());
        match self {
            Self::Log(_) => [scoped, Topic::AllLogs],
            _ => [scoped, Topic::StatusChanges],
        }
    }
}

/// A hub topic
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    /// Every event of one account (`account:<id>`)
    Account(AccountId),
    /// Log lines of every account (`all-logs`)
    AllLogs,
    /// Every non-log event of every account (`status-changes`)
    StatusChanges,
}

impl Topic {
    /// Topic scoped to one account
    pub fn account(id: impl Into<AccountId>) -> Self {
        Self::Account(id.into())
    }

    /// Name a transport should use when forwarding `event` from this topic
    ///
    /// Log lines on the wildcard feed are `botLog:all` so a client subscribed
    /// to both scopes can tell them apart.
    pub fn wire_event_name(&self, event: &BotEvent) -> &'static str {
        match (self, event) {
            (Self::AllLogs, BotEvent::Log(_)) => "botLog:all",
            _ => event.event_name(),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Account(id) => write!(f, "account:{id}"),
            Self::AllLogs => f.write_str("all-logs"),
            Self::StatusChanges => f.write_str("status-changes"),
        }
    }
}

impl FromStr for Topic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all-logs" => Ok(Self::AllLogs),
            "status-changes" => Ok(Self::StatusChanges),
            _ => match s.strip_prefix("account:") {
                Some(id) if !id.is_empty() => Ok(Self::Account(AccountId::from(id))),
                _ => Err(format!("unknown topic: {s}")),
            },
        }
    }
}

/// Event with timestamp for JSONL logging
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventLogEntry {
    /// Timestamp of the event
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    /// The event
    pub event: BotEvent,
}

impl EventLogEntry {
    /// Create a new log entry with current timestamp
    pub fn new(event: BotEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LogLevel;

    fn id() -> AccountId {
        AccountId::from("42")
    }

    #[test]
    fn test_login_error_kinds() {
        let expired = BotEvent::QrExpired { account_id: id() }.login_error();
        assert_eq!(expired.map(|e| e.code()), Some("timeout"));

        let failed = BotEvent::QrError {
            account_id: id(),
            reason: "login code already used".to_string(),
        }
        .login_error();
        assert!(matches!(failed, Some(OrchestratorError::ProviderProtocol(r)) if r.contains("already used")));

        assert!(BotEvent::QrCancelled { account_id: id() }.login_error().is_none());
        assert!(BotEvent::QrScanned { account_id: id() }.login_error().is_none());
    }

    #[test]
    fn test_event_account_id() {
        let event = BotEvent::QrError {
            account_id: id(),
            reason: "used".to_string(),
        };
        assert_eq!(event.account_id(), &id());
        assert_eq!(event.event_name(), "qr:error");
        assert!(event.is_login_terminal());
    }

    #[test]
    fn test_status_change_serialization() {
        let event = BotEvent::StatusChange {
            account_id: id(),
            status: SessionStatus::Running,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "bot:statusChange");
        assert_eq!(json["accountId"], "42");
        assert_eq!(json["status"], "running");
    }

    #[test]
    fn test_log_event_flattens_entry() {
        let event = BotEvent::Log(LogEntry::new(id(), LogLevel::Info, "harvested"));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "botLog");
        assert_eq!(json["message"], "harvested");

        let back: BotEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_qr_ready_omits_missing_image() {
        let event = BotEvent::QrReady {
            account_id: id(),
            login_code: "abc".to_string(),
            qr_payload: "https://qr.test/abc".to_string(),
            qr_image: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["loginCode"], "abc");
        assert!(json.get("qrImage").is_none());
    }

    #[test]
    fn test_routing() {
        let log = BotEvent::Log(LogEntry::new(id(), LogLevel::Info, "x"));
        assert_eq!(log.topics(), [Topic::account("42"), Topic::AllLogs]);

        let expired = BotEvent::QrExpired { account_id: id() };
        assert_eq!(expired.topics(), [Topic::account("42"), Topic::StatusChanges]);
    }

    #[test]
    fn test_topic_round_trip_names() {
        for name in ["all-logs", "status-changes", "account:10001"] {
            let topic: Topic = name.parse().unwrap();
            assert_eq!(topic.to_string(), name);
        }
        assert!("account:".parse::<Topic>().is_err());
        assert!("logs".parse::<Topic>().is_err());
    }

    #[test]
    fn test_wire_event_name() {
        let log = BotEvent::Log(LogEntry::new(id(), LogLevel::Info, "x"));
        assert_eq!(Topic::AllLogs.wire_event_name(&log), "botLog:all");
        assert_eq!(Topic::account("42").wire_event_name(&log), "botLog");
    }

    #[test]
    fn test_event_log_entry_serialization() {
        let entry = EventLogEntry::new(BotEvent::QrScanned { account_id: id() });
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("ts"));
        assert!(json.contains("qr:scanned"));
    }
}
