//! Bot runner - the work a logged-in session performs
//!
//! The game protocol itself lives behind [`BotRunner`]. A session hands the
//! runner a [`RunContext`] and treats the returned future as opaque: `Ok`
//! means the bot stopped cleanly, `Err` or a panic is a fault that puts the
//! session into Error.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::RunnerConfig;
use crate::domain::{AccountId, LogLevel};
use crate::session::SessionEmitter;

/// Errors that end a run
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    #[error("Bot failed: {0}")]
    Failed(String),

    #[error("Bot panicked: {0}")]
    Panicked(String),

    #[error("No auth code; log in first")]
    MissingAuthCode,
}

/// Everything a runner gets from its session
#[derive(Clone)]
pub struct RunContext {
    account_id: AccountId,
    auth_code: Option<String>,
    config: Value,
    cancel: CancellationToken,
    emitter: SessionEmitter,
}

impl RunContext {
    pub fn new(
        account_id: AccountId,
        auth_code: Option<String>,
        config: Value,
        cancel: CancellationToken,
        emitter: SessionEmitter,
    ) -> Self {
        Self {
            account_id,
            auth_code,
            config,
            cancel,
            emitter,
        }
    }

    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    pub fn auth_code(&self) -> Option<&str> {
        self.auth_code.as_deref().filter(|c| !c.is_empty())
    }

    /// The auth code, or `MissingAuthCode`
    pub fn require_auth_code(&self) -> Result<&str, RunError> {
        self.auth_code().ok_or(RunError::MissingAuthCode)
    }

    /// Per-account game configuration
    pub fn config(&self) -> &Value {
        &self.config
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the session asks the run to stop
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Append to the session log
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emitter.log(level, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emitter.info(message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emitter.warn(message);
    }

    /// Publish opaque runner state (`bot:stateUpdate`)
    pub fn state_update(&self, state: Value) {
        self.emitter.state_update(state);
    }
}

/// Business logic of a logged-in bot
#[async_trait]
pub trait BotRunner: Send + Sync {
    /// Run until `ctx` is cancelled or the bot fails
    async fn run(&self, ctx: RunContext) -> Result<(), RunError>;
}

/// Minimal runner that keeps a session alive and reports a heartbeat
pub struct HeartbeatRunner {
    interval: Duration,
}

impl HeartbeatRunner {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    pub fn from_config(config: &RunnerConfig) -> Self {
        Self::new(Duration::from_secs(config.heartbeat_secs))
    }
}

#[async_trait]
impl BotRunner for HeartbeatRunner {
    async fn run(&self, ctx: RunContext) -> Result<(), RunError> {
        debug!(account_id = %ctx.account_id(), "HeartbeatRunner::run: called");
        ctx.require_auth_code()?;
        ctx.info("bot started");

        let started = Instant::now();
        let mut beats: u64 = 0;
        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {
                    beats += 1;
                    ctx.log(LogLevel::Debug, format!("heartbeat #{beats}"));
                    ctx.state_update(json!({
                        "heartbeats": beats,
                        "uptimeSecs": started.elapsed().as_secs(),
                    }));
                }
            }
        }

        ctx.info(format!("bot stopping after {beats} heartbeats"));
        Ok(())
    }
}
