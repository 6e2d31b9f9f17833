//! LoginMachine - drives one QR login attempt to a terminal state
//!
//! The machine suspends only at provider calls and the poll-interval sleep.
//! Each of those races the attempt's cancellation token, so a cancel request
//! is honoured at the next suspension point. The ticket exchange after a
//! confirmed scan is not cancellable.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{Instant, sleep_until, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{LoginEvents, LoginHandle, LoginOutcome, LoginSettings};
use crate::domain::{AccountId, LoginState};
use crate::provider::{AuthProvider, ScanStatus};

/// One login attempt
pub struct LoginMachine<E> {
    account_id: AccountId,
    provider: Arc<dyn AuthProvider>,
    events: E,
    settings: LoginSettings,
    cancel: CancellationToken,
    state_tx: Arc<watch::Sender<LoginState>>,
    polls: u32,
    consecutive_errors: u32,
}

impl<E: LoginEvents> LoginMachine<E> {
    /// Create an attempt in `Requested` and the handle that controls it
    ///
    /// `cancel` is usually a child of the owning session's token so tearing
    /// the session down stops the attempt as well.
    pub fn new(
        account_id: AccountId,
        provider: Arc<dyn AuthProvider>,
        events: E,
        settings: LoginSettings,
        cancel: CancellationToken,
    ) -> (Self, LoginHandle) {
        debug!(%account_id, ?settings, "LoginMachine::new: called");
        let (state_tx, _) = watch::channel(LoginState::Requested);
        let state_tx = Arc::new(state_tx);
        let handle = LoginHandle::new(account_id.clone(), cancel.clone(), state_tx.clone());
        let machine = Self {
            account_id,
            provider,
            events,
            settings,
            cancel,
            state_tx,
            polls: 0,
            consecutive_errors: 0,
        };
        (machine, handle)
    }

    /// Run the attempt to completion
    pub async fn run(mut self) -> LoginOutcome {
        debug!(account_id = %self.account_id, "LoginMachine::run: called");
        let deadline = Instant::now() + self.settings.timeout;

        // Requested
        let code = match self.guard(self.provider.request_login_code()).await {
            None => return self.cancelled(),
            Some(Err(e)) => return self.fail(format!("failed to get login code: {e}")),
            Some(Ok(code)) => code,
        };

        self.transition(LoginState::AwaitingScan);
        self.events.qr_ready(&code.login_code, &code.qr_payload);

        // AwaitingScan
        loop {
            if self.polls >= self.settings.max_poll_attempts {
                debug!(polls = self.polls, "LoginMachine::run: poll budget exhausted");
                return self.expire();
            }
            if Instant::now() >= deadline {
                return self.expire();
            }

            self.polls += 1;
            let polled = self
                .guard(timeout_at(deadline, self.provider.poll_scan_status(&code.login_code)))
                .await;
            let result = match polled {
                None => return self.cancelled(),
                Some(Err(_elapsed)) => return self.expire(),
                Some(Ok(result)) => result,
            };

            match result {
                Ok(ScanStatus::Wait) => {
                    debug!(poll = self.polls, "LoginMachine::run: still waiting for scan");
                    self.consecutive_errors = 0;
                }
                Ok(ScanStatus::Ok { ticket }) => return self.exchange(&ticket).await,
                Ok(ScanStatus::Used) => return self.fail("login code already used".to_string()),
                Ok(ScanStatus::Error(reason)) => {
                    if let Some(outcome) = self.poll_failed(&reason) {
                        return outcome;
                    }
                }
                Err(e) => {
                    if let Some(outcome) = self.poll_failed(&e.to_string()) {
                        return outcome;
                    }
                }
            }

            let wake = (Instant::now() + self.settings.poll_interval).min(deadline);
            if self.guard(sleep_until(wake)).await.is_none() {
                return self.cancelled();
            }
        }
    }

    /// Race `fut` against cancellation; `None` means cancelled
    async fn guard<T>(&self, fut: impl Future<Output = T>) -> Option<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            value = fut => Some(value),
        }
    }

    /// Scanned: exchange the ticket for an auth code
    async fn exchange(&mut self, ticket: &str) -> LoginOutcome {
        self.transition(LoginState::Scanned);
        self.events.qr_scanned();

        match self.provider.exchange_ticket(ticket).await {
            Ok(auth_code) => {
                self.transition(LoginState::Succeeded);
                info!(account_id = %self.account_id, "LoginMachine: login succeeded");
                self.events.qr_success(&auth_code);
                LoginOutcome::Succeeded { auth_code }
            }
            Err(e) => self.fail(format!("ticket exchange failed: {e}")),
        }
    }

    fn poll_failed(&mut self, reason: &str) -> Option<LoginOutcome> {
        self.consecutive_errors += 1;
        warn!(
            account_id = %self.account_id,
            consecutive = self.consecutive_errors,
            %reason,
            "LoginMachine: scan status poll failed"
        );
        self.events.poll_error(self.consecutive_errors, reason);
        if self.consecutive_errors >= self.settings.max_consecutive_errors {
            Some(self.fail(format!(
                "{} consecutive poll errors, last: {reason}",
                self.consecutive_errors
            )))
        } else {
            None
        }
    }

    fn transition(&self, state: LoginState) {
        debug!(account_id = %self.account_id, %state, "LoginMachine::transition");
        self.state_tx.send_replace(state);
    }

    fn cancelled(&self) -> LoginOutcome {
        self.transition(LoginState::Cancelled);
        self.events.qr_cancelled();
        LoginOutcome::Cancelled
    }

    fn expire(&self) -> LoginOutcome {
        self.transition(LoginState::Expired);
        self.events.qr_expired();
        LoginOutcome::Expired
    }

    fn fail(&self, reason: String) -> LoginOutcome {
        self.transition(LoginState::Failed);
        self.events.qr_error(&reason);
        LoginOutcome::Failed { reason }
    }
}
