//! QR login - one account's login attempt as an explicit state machine
//!
//! ```text
//! Requested ──code──▶ AwaitingScan ──OK(ticket)──▶ Scanned ──exchange──▶ Succeeded
//!     │                   │  ▲  │                      │
//!     │                   │  └──┘ Wait / Error (< N)   └──fails──▶ Failed
//!     │                   ├── Used / N errors ──▶ Failed
//!     │                   └── deadline ──▶ Expired
//!     └── cancel (Requested or AwaitingScan only) ──▶ Cancelled
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::LoginConfig;
use crate::domain::{AccountId, LoginState};

mod machine;

pub use machine::LoginMachine;

/// Sink for the observable login transitions
pub trait LoginEvents: Send + Sync {
    fn qr_ready(&self, login_code: &str, qr_payload: &str);
    fn qr_scanned(&self);
    fn qr_success(&self, auth_code: &str);
    fn qr_expired(&self);
    fn qr_error(&self, reason: &str);
    fn qr_cancelled(&self);

    /// A poll failed but the attempt keeps going
    fn poll_error(&self, _consecutive: u32, _reason: &str) {}
}

/// Polling bounds for one attempt
#[derive(Debug, Clone)]
pub struct LoginSettings {
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub max_poll_attempts: u32,
    pub max_consecutive_errors: u32,
}

impl From<&LoginConfig> for LoginSettings {
    fn from(config: &LoginConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            timeout: config.timeout(),
            max_poll_attempts: config.max_poll_attempts.max(1),
            max_consecutive_errors: config.max_consecutive_errors.max(1),
        }
    }
}

impl Default for LoginSettings {
    fn default() -> Self {
        Self::from(&LoginConfig::default())
    }
}

/// How a login attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Succeeded { auth_code: String },
    Expired,
    Cancelled,
    Failed { reason: String },
}

impl LoginOutcome {
    /// Terminal state matching this outcome
    pub fn state(&self) -> LoginState {
        match self {
            Self::Succeeded { .. } => LoginState::Succeeded,
            Self::Expired => LoginState::Expired,
            Self::Cancelled => LoginState::Cancelled,
            Self::Failed { .. } => LoginState::Failed,
        }
    }
}

/// Caller-side handle on a running login attempt
#[derive(Debug, Clone)]
pub struct LoginHandle {
    account_id: AccountId,
    attempt_id: Uuid,
    cancel: CancellationToken,
    state_tx: Arc<watch::Sender<LoginState>>,
    state_rx: watch::Receiver<LoginState>,
}

impl LoginHandle {
    pub(crate) fn new(
        account_id: AccountId,
        cancel: CancellationToken,
        state_tx: Arc<watch::Sender<LoginState>>,
    ) -> Self {
        let state_rx = state_tx.subscribe();
        Self {
            account_id,
            attempt_id: Uuid::now_v7(),
            cancel,
            state_tx,
            state_rx,
        }
    }

    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    /// Unique id of this attempt
    pub fn attempt_id(&self) -> Uuid {
        self.attempt_id
    }

    /// Request cooperative cancellation without waiting for it
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Current state of the attempt
    pub fn state(&self) -> LoginState {
        *self.state_rx.borrow()
    }

    /// Wait until the attempt reaches a terminal state
    pub async fn wait(&self) -> LoginState {
        let mut rx = self.state_rx.clone();
        let reached = rx.wait_for(|s| s.is_terminal()).await.map(|s| *s);
        reached.unwrap_or_else(|_| *rx.borrow())
    }

    /// Record a terminal state for an attempt whose task was aborted
    pub(crate) fn force_state(&self, state: LoginState) {
        self.state_tx.send_replace(state);
    }
}
