//! Orchestrator error types
//!
//! Precondition violations are returned synchronously from facade calls.
//! Asynchronous outcomes (login expiry, run faults) are reported as events.

use thiserror::Error;

use crate::domain::{AccountId, SessionStatus};
use crate::provider::ProviderError;

/// Errors returned by session, registry and orchestrator operations
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Account {0} already has a login in progress")]
    AlreadyLoggingIn(AccountId),

    #[error("Account {0} is already running")]
    AlreadyRunning(AccountId),

    #[error("Cannot {op} account {account_id} while {status}")]
    InvalidState {
        account_id: AccountId,
        status: SessionStatus,
        op: &'static str,
    },

    #[error("Account not found: {0}")]
    NotFound(AccountId),

    #[error("Auth provider transport error: {0}")]
    ProviderTransport(String),

    #[error("Auth provider protocol error: {0}")]
    ProviderProtocol(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Internal fault: {0}")]
    InternalFault(String),

    #[error("Session channel closed")]
    ChannelClosed,

    #[error("Store error: {0}")]
    Store(String),
}

impl OrchestratorError {
    /// Stable machine-readable code for transport layers
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyLoggingIn(_) => "already_logging_in",
            Self::AlreadyRunning(_) => "already_running",
            Self::InvalidState { .. } => "invalid_state",
            Self::NotFound(_) => "not_found",
            Self::ProviderTransport(_) => "provider_transport",
            Self::ProviderProtocol(_) => "provider_protocol",
            Self::Timeout(_) => "timeout",
            Self::InternalFault(_) => "internal_fault",
            Self::ChannelClosed => "channel_closed",
            Self::Store(_) => "store",
        }
    }
}

impl From<ProviderError> for OrchestratorError {
    fn from(e: ProviderError) -> Self {
        if e.is_retryable() {
            Self::ProviderTransport(e.to_string())
        } else {
            Self::ProviderProtocol(e.to_string())
        }
    }
}

impl From<botstore::StoreError> for OrchestratorError {
    fn from(e: botstore::StoreError) -> Self {
        match e {
            botstore::StoreError::NotFound(id) => Self::NotFound(AccountId::from(id)),
            other => Self::Store(other.to_string()),
        }
    }
}

/// Result alias for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
