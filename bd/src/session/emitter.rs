//! SessionEmitter - one session's handle onto its log buffer and the hub

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::domain::{AccountId, LogEntry, LogLevel, SessionStatus};
use crate::events::{BotEvent, EventHub};
use crate::login::LoginEvents;
use crate::qr;

use super::log_buffer::LogBuffer;

/// Handle for session components to emit events without owning the hub
///
/// Cheap to clone; shared by the session actor, its login attempt and its
/// run task. Events carry the bound account id automatically.
#[derive(Clone)]
pub struct SessionEmitter {
    account_id: AccountId,
    hub: EventHub,
    logs: Arc<LogBuffer>,
}

impl SessionEmitter {
    pub fn new(account_id: AccountId, hub: EventHub, logs: Arc<LogBuffer>) -> Self {
        debug!(%account_id, "SessionEmitter::new: creating emitter");
        Self { account_id, hub, logs }
    }

    /// Get the account id this emitter is bound to
    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    /// Shared log buffer
    pub fn logs(&self) -> &Arc<LogBuffer> {
        &self.logs
    }

    /// Emit a raw event
    pub fn emit(&self, event: BotEvent) {
        self.hub.publish_event(event);
    }

    /// Append a log entry, publish `botLog`, and mirror it to tracing
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let entry = LogEntry::new(self.account_id.clone(), level, message);
        match level {
            LogLevel::Debug => debug!(account_id = %self.account_id, "{}", entry.message),
            LogLevel::Info => info!(account_id = %self.account_id, "{}", entry.message),
            LogLevel::Warn => warn!(account_id = %self.account_id, "{}", entry.message),
            LogLevel::Error => error!(account_id = %self.account_id, "{}", entry.message),
        }
        let hub = &self.hub;
        self.logs
            .append_with(entry, |entry| hub.publish_event(BotEvent::Log(entry.clone())));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    // === Convenience methods ===

    /// Emit a status change event
    pub fn status_changed(&self, status: SessionStatus) {
        self.emit(BotEvent::StatusChange {
            account_id: self.account_id.clone(),
            status,
        });
    }

    /// Emit a runner state update
    pub fn state_update(&self, state: Value) {
        self.emit(BotEvent::StateUpdate {
            account_id: self.account_id.clone(),
            state,
        });
    }

    /// Emit a run-time fault
    pub fn bot_error(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.error(format!("bot error: {reason}"));
        self.emit(BotEvent::BotError {
            account_id: self.account_id.clone(),
            reason,
        });
    }
}

impl LoginEvents for SessionEmitter {
    fn qr_ready(&self, login_code: &str, qr_payload: &str) {
        let qr_image = match qr::render_data_url(qr_payload) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(account_id = %self.account_id, error = %e, "qr_ready: failed to render QR image");
                None
            }
        };
        self.info("QR code ready, waiting for scan");
        self.emit(BotEvent::QrReady {
            account_id: self.account_id.clone(),
            login_code: login_code.to_string(),
            qr_payload: qr_payload.to_string(),
            qr_image,
        });
    }

    fn qr_scanned(&self) {
        self.info("QR code scanned, exchanging ticket");
        self.emit(BotEvent::QrScanned {
            account_id: self.account_id.clone(),
        });
    }

    fn qr_success(&self, auth_code: &str) {
        self.info("QR login succeeded");
        self.emit(BotEvent::QrSuccess {
            account_id: self.account_id.clone(),
            auth_code: auth_code.to_string(),
        });
    }

    fn qr_expired(&self) {
        self.warn("QR code expired before it was scanned");
        self.emit(BotEvent::QrExpired {
            account_id: self.account_id.clone(),
        });
    }

    fn qr_error(&self, reason: &str) {
        self.error(format!("QR login failed: {reason}"));
        self.emit(BotEvent::QrError {
            account_id: self.account_id.clone(),
            reason: reason.to_string(),
        });
    }

    fn qr_cancelled(&self) {
        self.info("QR login cancelled");
        self.emit(BotEvent::QrCancelled {
            account_id: self.account_id.clone(),
        });
    }

    fn poll_error(&self, consecutive: u32, reason: &str) {
        self.warn(format!("scan status poll failed ({consecutive} in a row): {reason}"));
    }
}
