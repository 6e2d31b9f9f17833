//! Scripted auth provider for unit tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::{AuthProvider, LoginCode, ProviderError, ScanStatus};

/// One scripted poll response
#[derive(Debug, Clone)]
pub enum PollStep {
    Status(ScanStatus),
    TransportError,
}

/// Auth provider that replays a fixed script
///
/// Once the poll script is exhausted every further poll returns `Wait`.
pub struct ScriptedProvider {
    login_code: Option<String>,
    polls: Mutex<VecDeque<PollStep>>,
    auth_code: Option<String>,
    poll_count: AtomicUsize,
    exchange_count: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(login_code: &str, polls: Vec<PollStep>, auth_code: &str) -> Self {
        debug!(%login_code, polls = polls.len(), "ScriptedProvider::new: called");
        Self {
            login_code: Some(login_code.to_string()),
            polls: Mutex::new(polls.into()),
            auth_code: Some(auth_code.to_string()),
            poll_count: AtomicUsize::new(0),
            exchange_count: AtomicUsize::new(0),
        }
    }

    /// Provider whose login-code request fails
    pub fn failing_login_code() -> Self {
        Self {
            login_code: None,
            ..Self::new("", vec![], "")
        }
    }

    /// Provider whose ticket exchange fails
    pub fn failing_exchange(login_code: &str, polls: Vec<PollStep>) -> Self {
        Self {
            auth_code: None,
            ..Self::new(login_code, polls, "")
        }
    }

    /// `n` Wait polls followed by OK(ticket)
    pub fn waits_then_ok(n: usize, ticket: &str) -> Vec<PollStep> {
        let mut steps = vec![PollStep::Status(ScanStatus::Wait); n];
        steps.push(PollStep::Status(ScanStatus::Ok {
            ticket: ticket.to_string(),
        }));
        steps
    }

    pub fn poll_count(&self) -> usize {
        self.poll_count.load(Ordering::SeqCst)
    }

    pub fn exchange_count(&self) -> usize {
        self.exchange_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthProvider for ScriptedProvider {
    async fn request_login_code(&self) -> Result<LoginCode, ProviderError> {
        debug!("ScriptedProvider::request_login_code: called");
        match &self.login_code {
            Some(code) => Ok(LoginCode {
                login_code: code.clone(),
                qr_payload: format!("https://qr.test/{code}"),
            }),
            None => Err(ProviderError::Protocol("login code unavailable".to_string())),
        }
    }

    async fn poll_scan_status(&self, _login_code: &str) -> Result<ScanStatus, ProviderError> {
        self.poll_count.fetch_add(1, Ordering::SeqCst);
        let step = self.polls.lock().pop_front();
        debug!(?step, "ScriptedProvider::poll_scan_status: replaying");
        match step {
            Some(PollStep::Status(status)) => Ok(status),
            Some(PollStep::TransportError) => Err(ProviderError::Http {
                status: 503,
                endpoint: "poll".to_string(),
            }),
            None => Ok(ScanStatus::Wait),
        }
    }

    async fn exchange_ticket(&self, _ticket: &str) -> Result<String, ProviderError> {
        debug!("ScriptedProvider::exchange_ticket: called");
        self.exchange_count.fetch_add(1, Ordering::SeqCst);
        self.auth_code
            .clone()
            .ok_or_else(|| ProviderError::Protocol("ticket rejected".to_string()))
    }
}
