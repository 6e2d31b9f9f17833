//! Session actor messages

use botstore::AccountRecord;
use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::domain::LoginState;
use crate::error::OrchestratorResult;
use crate::login::{LoginHandle, LoginOutcome};
use crate::runner::RunError;

/// Commands sent to a session actor
#[derive(Debug)]
pub(crate) enum SessionCommand {
    StartLogin {
        reply: oneshot::Sender<OrchestratorResult<LoginHandle>>,
    },
    CancelLogin {
        reply: oneshot::Sender<OrchestratorResult<Option<LoginState>>>,
    },
    Start {
        reply: oneshot::Sender<OrchestratorResult<()>>,
    },
    Stop {
        reply: oneshot::Sender<OrchestratorResult<()>>,
    },
    Reset {
        reply: oneshot::Sender<OrchestratorResult<()>>,
    },
    UpdateConfig {
        config: Value,
        reply: oneshot::Sender<OrchestratorResult<()>>,
    },
    UpdateRecord {
        record: AccountRecord,
        reply: oneshot::Sender<OrchestratorResult<()>>,
    },
    /// Stop whatever is active and end the actor
    Close { reply: oneshot::Sender<()> },
}

/// Notices from the session's own worker tasks
///
/// Sent on an unbounded channel so a finishing worker never waits on a busy
/// actor. Ids let the actor ignore notices from attempts it already reaped.
/// A login `Err` carries the panic message of a crashed attempt.
#[derive(Debug)]
pub(crate) enum Completion {
    LoginFinished {
        attempt_id: Uuid,
        outcome: Result<LoginOutcome, String>,
    },
    RunFinished { generation: u64, result: Result<(), RunError> },
}
