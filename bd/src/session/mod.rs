//! Session - one account's runtime state behind an actor
//!
//! [`Session`] is the cheap, cloneable handle. Mutations (`start_login`,
//! `start`, `stop`, ...) are queued to the session's actor and applied one at
//! a time. Reads (`status`, `recent_logs`, `record`) go straight to shared
//! state and never wait behind a queued mutation.

use std::sync::Arc;
use std::time::Duration;

use botstore::AccountRecord;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::Config;
use crate::domain::{AccountId, LogEntry, LogLevel, LoginState, SessionStatus};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::events::EventHub;
use crate::login::{LoginHandle, LoginSettings};
use crate::provider::AuthProvider;
use crate::runner::BotRunner;
use crate::store::AccountStore;

mod actor;
mod emitter;
mod log_buffer;
mod messages;

pub use emitter::SessionEmitter;
pub use log_buffer::LogBuffer;

use actor::SessionActor;
use messages::SessionCommand;

/// Per-session limits and behaviour
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub login: LoginSettings,
    pub log_capacity: usize,
    pub command_buffer: usize,
    /// How long `cancel_login` waits for the attempt to acknowledge
    pub cancel_timeout: Duration,
    /// How long `stop` waits for the run task before aborting it
    pub force_stop_timeout: Duration,
    /// Start the bot as soon as a login succeeds
    pub start_after_login: bool,
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            login: LoginSettings::from(&config.login),
            log_capacity: config.session.log_capacity,
            command_buffer: config.session.command_buffer.max(1),
            cancel_timeout: config.login.cancel_timeout(),
            force_stop_timeout: config.session.force_stop_timeout(),
            start_after_login: config.session.start_after_login,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// Collaborators shared by every session
#[derive(Clone)]
pub struct SessionDeps {
    pub hub: EventHub,
    pub provider: Arc<dyn AuthProvider>,
    pub runner: Arc<dyn BotRunner>,
    pub store: Arc<dyn AccountStore>,
    pub settings: SessionSettings,
}

/// Handle to one account's session
#[derive(Clone)]
pub struct Session {
    account_id: AccountId,
    tx: mpsc::Sender<SessionCommand>,
    status_rx: watch::Receiver<SessionStatus>,
    record: Arc<RwLock<AccountRecord>>,
    emitter: SessionEmitter,
    cancel: CancellationToken,
    actor: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Session {
    /// Create the session for `record` and spawn its actor
    pub fn spawn(record: AccountRecord, deps: SessionDeps) -> Self {
        let account_id = AccountId::from(record.id.clone());
        debug!(%account_id, "Session::spawn: called");

        let logs = Arc::new(LogBuffer::new(deps.settings.log_capacity));
        let emitter = SessionEmitter::new(account_id.clone(), deps.hub.clone(), logs);
        let record = Arc::new(RwLock::new(record));
        let (status_tx, status_rx) = watch::channel(SessionStatus::Idle);
        let (tx, rx) = mpsc::channel(deps.settings.command_buffer.max(1));
        let cancel = CancellationToken::new();

        let actor = SessionActor::new(
            account_id.clone(),
            deps,
            emitter.clone(),
            record.clone(),
            status_tx,
            cancel.clone(),
            rx,
        );
        let join = tokio::spawn(actor.run());

        Self {
            account_id,
            tx,
            status_rx,
            record,
            emitter,
            cancel,
            actor: Arc::new(Mutex::new(Some(join))),
        }
    }

    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    /// Current status
    pub fn status(&self) -> SessionStatus {
        *self.status_rx.borrow()
    }

    /// Receiver that observes every status change
    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status_rx.clone()
    }

    /// Snapshot of the account record (config, auth code, flags)
    pub fn record(&self) -> AccountRecord {
        self.record.read().clone()
    }

    /// Whether two handles refer to the same session
    pub fn ptr_eq(&self, other: &Session) -> bool {
        self.tx.same_channel(&other.tx)
    }

    /// Begin a QR login; returns immediately with the attempt's handle
    pub async fn start_login(&self) -> OrchestratorResult<LoginHandle> {
        debug!(account_id = %self.account_id, "Session::start_login: called");
        self.request(|reply| SessionCommand::StartLogin { reply }).await
    }

    /// Cancel the active login and wait for its terminal state
    ///
    /// Returns `None` when no login was active.
    pub async fn cancel_login(&self) -> OrchestratorResult<Option<LoginState>> {
        debug!(account_id = %self.account_id, "Session::cancel_login: called");
        self.request(|reply| SessionCommand::CancelLogin { reply }).await
    }

    /// Launch the bot run task (from Idle or Stopped)
    pub async fn start(&self) -> OrchestratorResult<()> {
        debug!(account_id = %self.account_id, "Session::start: called");
        self.request(|reply| SessionCommand::Start { reply }).await
    }

    /// Stop the run task or login attempt; always reaches Stopped
    pub async fn stop(&self) -> OrchestratorResult<()> {
        debug!(account_id = %self.account_id, "Session::stop: called");
        self.request(|reply| SessionCommand::Stop { reply }).await
    }

    /// Return to Idle from Error or Stopped
    pub async fn reset(&self) -> OrchestratorResult<()> {
        debug!(account_id = %self.account_id, "Session::reset: called");
        self.request(|reply| SessionCommand::Reset { reply }).await
    }

    /// Replace the game configuration used by the next run
    pub async fn update_config(&self, config: Value) -> OrchestratorResult<()> {
        self.request(|reply| SessionCommand::UpdateConfig { config, reply }).await
    }

    /// Replace the account record, keeping the current auth code if the new one has none
    pub async fn update_record(&self, record: AccountRecord) -> OrchestratorResult<()> {
        self.request(|reply| SessionCommand::UpdateRecord { record, reply }).await
    }

    /// Append a log entry; never fails
    pub fn append_log(&self, level: LogLevel, message: impl Into<String>) {
        self.emitter.log(level, message);
    }

    /// The last `limit` log entries, most recent last
    pub fn recent_logs(&self, limit: usize) -> Vec<LogEntry> {
        self.emitter.logs().recent(limit)
    }

    /// Stop whatever is active and end the actor; idempotent
    pub async fn close(&self) {
        debug!(account_id = %self.account_id, "Session::close: called");
        let (reply, rx) = oneshot::channel();
        if self.tx.send(SessionCommand::Close { reply }).await.is_ok() {
            let _ = rx.await;
        }
        let join = self.actor.lock().take();
        if let Some(join) = join {
            let _ = join.await;
        }
    }

    /// Tear the session down without waiting: cancel every task and abort the actor
    pub fn abort(&self) {
        debug!(account_id = %self.account_id, "Session::abort: called");
        self.cancel.cancel();
        if let Some(join) = self.actor.lock().take() {
            join.abort();
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<OrchestratorResult<T>>) -> SessionCommand,
    ) -> OrchestratorResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| OrchestratorError::ChannelClosed)?;
        rx.await.map_err(|_| OrchestratorError::ChannelClosed)?
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("account_id", &self.account_id)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::runner::{RunContext, RunError};
    use async_trait::async_trait;

    /// Runs until cancelled
    pub struct IdleRunner;

    #[async_trait]
    impl BotRunner for IdleRunner {
        async fn run(&self, ctx: RunContext) -> Result<(), RunError> {
            ctx.info("idle runner started");
            ctx.cancelled().await;
            Ok(())
        }
    }

    /// Ignores cancellation entirely
    pub struct StubbornRunner;

    #[async_trait]
    impl BotRunner for StubbornRunner {
        async fn run(&self, _ctx: RunContext) -> Result<(), RunError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    /// Fails right away
    pub struct FailingRunner;

    #[async_trait]
    impl BotRunner for FailingRunner {
        async fn run(&self, _ctx: RunContext) -> Result<(), RunError> {
            Err(RunError::Failed("game server rejected the session".to_string()))
        }
    }

    /// Panics right away
    pub struct PanickingRunner;

    #[async_trait]
    impl BotRunner for PanickingRunner {
        async fn run(&self, _ctx: RunContext) -> Result<(), RunError> {
            panic!("runner exploded");
        }
    }

    pub fn fast_settings() -> SessionSettings {
        SessionSettings {
            login: LoginSettings {
                poll_interval: Duration::from_millis(5),
                timeout: Duration::from_secs(5),
                max_poll_attempts: 10_000,
                max_consecutive_errors: 3,
            },
            log_capacity: 1000,
            command_buffer: 16,
            cancel_timeout: Duration::from_millis(500),
            force_stop_timeout: Duration::from_millis(100),
            start_after_login: false,
        }
    }

    /// Wait (bounded) until the session reports `status`
    pub async fn wait_for_status(session: &Session, status: SessionStatus) {
        let mut rx = session.watch_status();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == status))
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {status}, still {}", session.status()))
            .unwrap();
    }
}
