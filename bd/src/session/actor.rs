//! SessionActor - the single writer of one session's state
//!
//! Every mutating operation arrives as a [`SessionCommand`] and is handled to
//! completion before the next one, so status transitions for an account are
//! strictly ordered. Login attempts and bot runs are separate tasks that
//! report back on the completion channel.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use botstore::AccountRecord;
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::SessionDeps;
use super::emitter::SessionEmitter;
use super::messages::{Completion, SessionCommand};
use crate::domain::{AccountId, LoginState, SessionStatus};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::login::{LoginEvents, LoginHandle, LoginMachine, LoginOutcome};
use crate::runner::{RunContext, RunError};

struct ActiveLogin {
    handle: LoginHandle,
    join: JoinHandle<Result<LoginOutcome, String>>,
}

struct ActiveRun {
    generation: u64,
    cancel: CancellationToken,
    join: JoinHandle<Result<(), RunError>>,
}

pub(crate) struct SessionActor {
    account_id: AccountId,
    deps: SessionDeps,
    emitter: SessionEmitter,
    record: Arc<RwLock<AccountRecord>>,
    status_tx: watch::Sender<SessionStatus>,
    /// Parent of every login and run token; cancelled when the session is torn down
    session_cancel: CancellationToken,
    active_login: Option<ActiveLogin>,
    run: Option<ActiveRun>,
    generation: u64,
    commands: mpsc::Receiver<SessionCommand>,
    done_tx: mpsc::UnboundedSender<Completion>,
    done_rx: mpsc::UnboundedReceiver<Completion>,
}

impl SessionActor {
    pub(crate) fn new(
        account_id: AccountId,
        deps: SessionDeps,
        emitter: SessionEmitter,
        record: Arc<RwLock<AccountRecord>>,
        status_tx: watch::Sender<SessionStatus>,
        session_cancel: CancellationToken,
        commands: mpsc::Receiver<SessionCommand>,
    ) -> Self {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        Self {
            account_id,
            deps,
            emitter,
            record,
            status_tx,
            session_cancel,
            active_login: None,
            run: None,
            generation: 0,
            commands,
            done_tx,
            done_rx,
        }
    }

    /// Actor loop; ends on `Close` or when every handle is dropped
    pub(crate) async fn run(mut self) {
        debug!(account_id = %self.account_id, "SessionActor::run: started");
        loop {
            tokio::select! {
                biased;
                Some(done) = self.done_rx.recv() => self.handle_completion(done).await,
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Close { reply }) => {
                        self.close().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!(account_id = %self.account_id, "SessionActor: all handles dropped");
                        self.close().await;
                        break;
                    }
                },
            }
        }
        debug!(account_id = %self.account_id, "SessionActor::run: exited");
    }

    fn status(&self) -> SessionStatus {
        *self.status_tx.borrow()
    }

    fn set_status(&self, status: SessionStatus) {
        let previous = self.status_tx.send_replace(status);
        if previous != status {
            info!(account_id = %self.account_id, from = %previous, to = %status, "session status changed");
            self.emitter.status_changed(status);
        }
    }

    fn invalid(&self, op: &'static str) -> OrchestratorError {
        OrchestratorError::InvalidState {
            account_id: self.account_id.clone(),
            status: self.status(),
            op,
        }
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::StartLogin { reply } => {
                let _ = reply.send(self.start_login());
            }
            SessionCommand::CancelLogin { reply } => {
                let _ = reply.send(Ok(self.cancel_login().await));
            }
            SessionCommand::Start { reply } => {
                let _ = reply.send(self.start());
            }
            SessionCommand::Stop { reply } => {
                let _ = reply.send(self.stop().await);
            }
            SessionCommand::Reset { reply } => {
                let _ = reply.send(self.reset());
            }
            SessionCommand::UpdateConfig { config, reply } => {
                let _ = reply.send(self.update_config(config));
            }
            SessionCommand::UpdateRecord { record, reply } => {
                let _ = reply.send(self.update_record(record));
            }
            SessionCommand::Close { reply } => {
                // Handled by the loop; kept exhaustive
                let _ = reply.send(());
            }
        }
    }

    async fn handle_completion(&mut self, done: Completion) {
        match done {
            Completion::LoginFinished { attempt_id, outcome } => {
                let current = self.active_login.as_ref().map(|a| a.handle.attempt_id());
                if current != Some(attempt_id) {
                    debug!(%attempt_id, "SessionActor: ignoring stale login completion");
                    return;
                }
                let Some(active) = self.active_login.take() else {
                    return;
                };
                match outcome {
                    Ok(outcome) => {
                        self.finish_login(outcome, true).await;
                    }
                    Err(reason) => self.login_fault(&active.handle, reason),
                }
            }
            Completion::RunFinished { generation, result } => {
                if self.run.as_ref().map(|r| r.generation) != Some(generation) {
                    debug!(generation, "SessionActor: ignoring stale run completion");
                    return;
                }
                self.run = None;
                match result {
                    Ok(()) => {
                        self.emitter.info("bot finished");
                        self.set_status(SessionStatus::Stopped);
                    }
                    Err(e) => self.fault(e.to_string()),
                }
            }
        }
    }

    fn start_login(&mut self) -> OrchestratorResult<LoginHandle> {
        debug!(account_id = %self.account_id, "SessionActor::start_login: called");
        if self.active_login.is_some() {
            return Err(OrchestratorError::AlreadyLoggingIn(self.account_id.clone()));
        }
        match self.status() {
            SessionStatus::Running => return Err(OrchestratorError::AlreadyRunning(self.account_id.clone())),
            status if status.can_login() => {}
            _ => return Err(self.invalid("log in")),
        }

        let (machine, handle) = LoginMachine::new(
            self.account_id.clone(),
            self.deps.provider.clone(),
            self.emitter.clone(),
            self.deps.settings.login.clone(),
            self.session_cancel.child_token(),
        );
        let attempt_id = handle.attempt_id();
        let done = self.done_tx.clone();

        self.set_status(SessionStatus::LoggingIn);
        self.emitter.info("starting QR login");
        let join = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(machine.run())
                .catch_unwind()
                .await
                .map_err(|panic| format!("login task panicked: {}", panic_message(panic.as_ref())));
            let _ = done.send(Completion::LoginFinished {
                attempt_id,
                outcome: outcome.clone(),
            });
            outcome
        });

        self.active_login = Some(ActiveLogin {
            handle: handle.clone(),
            join,
        });
        Ok(handle)
    }

    async fn cancel_login(&mut self) -> Option<LoginState> {
        debug!(account_id = %self.account_id, "SessionActor::cancel_login: called");
        let active = self.active_login.take()?;
        let handle = active.handle.clone();
        handle.cancel();
        match self.reap_login(active).await {
            Ok(outcome) => Some(self.finish_login(outcome, true).await),
            Err(reason) => {
                self.login_fault(&handle, reason);
                Some(LoginState::Failed)
            }
        }
    }

    /// Wait (bounded) for a cancelled attempt to reach its terminal state
    ///
    /// `Err` means the login task crashed instead of finishing.
    async fn reap_login(&self, active: ActiveLogin) -> Result<LoginOutcome, String> {
        let ActiveLogin { handle, mut join } = active;
        match timeout(self.deps.settings.cancel_timeout, &mut join).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(format!("login task failed: {e}")),
            Err(_) => {
                warn!(account_id = %self.account_id, "login attempt ignored cancellation, aborting");
                join.abort();
                handle.force_state(LoginState::Cancelled);
                self.emitter.qr_cancelled();
                Ok(LoginOutcome::Cancelled)
            }
        }
    }

    /// A crashed login attempt: the attempt fails and the session faults
    fn login_fault(&mut self, handle: &LoginHandle, reason: String) {
        handle.force_state(LoginState::Failed);
        self.emitter.qr_error(&reason);
        self.fault(reason);
    }

    /// Apply a finished attempt; `settle` moves the session out of LoggingIn
    async fn finish_login(&mut self, outcome: LoginOutcome, settle: bool) -> LoginState {
        let state = outcome.state();
        debug!(account_id = %self.account_id, %state, settle, "SessionActor::finish_login: called");

        let succeeded = if let LoginOutcome::Succeeded { auth_code } = outcome {
            self.record.write().auth_code = Some(auth_code.clone());
            if let Err(e) = self.deps.store.save_auth_code(&self.account_id, Some(auth_code)).await {
                warn!(account_id = %self.account_id, error = %e, "failed to persist auth code");
                self.emitter.warn(format!("auth code not saved: {e}"));
            }
            true
        } else {
            false
        };

        if settle && self.status() == SessionStatus::LoggingIn {
            if succeeded && self.deps.settings.start_after_login {
                self.launch_run();
            } else {
                self.set_status(SessionStatus::Idle);
            }
        }
        state
    }

    fn start(&mut self) -> OrchestratorResult<()> {
        debug!(account_id = %self.account_id, "SessionActor::start: called");
        match self.status() {
            SessionStatus::Running => Err(OrchestratorError::AlreadyRunning(self.account_id.clone())),
            status if status.can_start() => {
                self.launch_run();
                Ok(())
            }
            _ => Err(self.invalid("start")),
        }
    }

    fn launch_run(&mut self) {
        self.generation += 1;
        let generation = self.generation;
        let cancel = self.session_cancel.child_token();
        let record = self.record.read().clone();
        let ctx = RunContext::new(
            self.account_id.clone(),
            record.auth_code,
            record.config,
            cancel.clone(),
            self.emitter.clone(),
        );
        let runner = self.deps.runner.clone();
        let done = self.done_tx.clone();

        self.set_status(SessionStatus::Running);
        let join = tokio::spawn(async move {
            let result = match AssertUnwindSafe(runner.run(ctx)).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => Err(RunError::Panicked(panic_message(panic.as_ref()))),
            };
            let _ = done.send(Completion::RunFinished {
                generation,
                result: result.clone(),
            });
            result
        });
        self.run = Some(ActiveRun {
            generation,
            cancel,
            join,
        });
    }

    async fn stop(&mut self) -> OrchestratorResult<()> {
        debug!(account_id = %self.account_id, "SessionActor::stop: called");
        if !self.status().can_stop() {
            return Err(self.invalid("stop"));
        }

        let login = self.active_login.take();
        let run = self.run.take();
        self.set_status(SessionStatus::Stopping);

        if let Some(active) = login {
            let handle = active.handle.clone();
            handle.cancel();
            match self.reap_login(active).await {
                Ok(outcome) => {
                    self.finish_login(outcome, false).await;
                }
                Err(reason) => {
                    // The stop still completes; the crash is reported but does not fault
                    warn!(account_id = %self.account_id, %reason, "login task crashed while stopping");
                    handle.force_state(LoginState::Failed);
                    self.emitter.qr_error(&reason);
                    self.emitter.bot_error(reason);
                }
            }
        }
        if let Some(run) = run {
            self.reap_run(run).await;
        }

        self.set_status(SessionStatus::Stopped);
        Ok(())
    }

    /// Cancel a run and wait for it up to the forced-stop deadline
    async fn reap_run(&self, run: ActiveRun) {
        let ActiveRun { cancel, mut join, .. } = run;
        cancel.cancel();
        let deadline = self.deps.settings.force_stop_timeout;
        match timeout(deadline, &mut join).await {
            Ok(Ok(Ok(()))) => self.emitter.info("bot stopped"),
            Ok(Ok(Err(e))) => self.emitter.warn(format!("bot exited with error while stopping: {e}")),
            Ok(Err(e)) => self.emitter.warn(format!("bot task failed while stopping: {e}")),
            Err(_) => {
                join.abort();
                self.emitter
                    .warn(format!("bot did not stop within {}ms, aborted", deadline.as_millis()));
            }
        }
    }

    fn reset(&mut self) -> OrchestratorResult<()> {
        debug!(account_id = %self.account_id, "SessionActor::reset: called");
        if !self.status().can_reset() {
            return Err(self.invalid("reset"));
        }
        self.set_status(SessionStatus::Idle);
        Ok(())
    }

    fn update_config(&mut self, config: Value) -> OrchestratorResult<()> {
        let mut record = self.record.write();
        record.config = config;
        record.touch();
        Ok(())
    }

    fn update_record(&mut self, mut record: AccountRecord) -> OrchestratorResult<()> {
        let mut current = self.record.write();
        if record.auth_code.is_none() {
            record.auth_code = current.auth_code.take();
        }
        record.id = current.id.clone();
        *current = record;
        Ok(())
    }

    /// Unrecoverable run-time fault: Error until reset
    fn fault(&mut self, reason: String) {
        warn!(account_id = %self.account_id, %reason, "session fault");
        self.set_status(SessionStatus::Error);
        self.emitter.bot_error(reason);
    }

    async fn close(&mut self) {
        debug!(account_id = %self.account_id, "SessionActor::close: called");
        if self.status().can_stop() {
            let _ = self.stop().await;
        }
        self.session_cancel.cancel();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
