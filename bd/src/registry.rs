//! SessionRegistry - account id to live session map
//!
//! The registry owns every [`Session`] handle. Lookups take a short read lock
//! on the map and never touch session state; session work happens after the
//! lock is released.

use std::collections::HashMap;
use std::time::Duration;

use botstore::AccountRecord;
use futures::future::join_all;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::domain::{AccountId, SessionStatus};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::session::{Session, SessionDeps};

/// Per-account results of [`SessionRegistry::auto_start`]
#[derive(Debug, Default)]
pub struct AutoStartReport {
    pub started: Vec<AccountId>,
    pub failed: Vec<(AccountId, OrchestratorError)>,
}

impl AutoStartReport {
    pub fn attempted(&self) -> usize {
        self.started.len() + self.failed.len()
    }
}

/// Map of live sessions plus the collaborators new sessions are built with
pub struct SessionRegistry {
    sessions: RwLock<HashMap<AccountId, Session>>,
    deps: SessionDeps,
    shutdown_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(deps: SessionDeps, shutdown_timeout: Duration) -> Self {
        debug!(?shutdown_timeout, "SessionRegistry::new: called");
        Self {
            sessions: RwLock::new(HashMap::new()),
            deps,
            shutdown_timeout,
        }
    }

    pub fn deps(&self) -> &SessionDeps {
        &self.deps
    }

    /// Return the session for `record.id`, creating it if needed
    pub fn get_or_create(&self, record: AccountRecord) -> Session {
        let account_id = AccountId::from(record.id.as_str());
        if let Some(session) = self.sessions.read().get(&account_id) {
            return session.clone();
        }

        let mut sessions = self.sessions.write();
        sessions
            .entry(account_id)
            .or_insert_with(|| {
                debug!(account_id = %record.id, "SessionRegistry::get_or_create: creating session");
                Session::spawn(record, self.deps.clone())
            })
            .clone()
    }

    pub fn get(&self, account_id: &AccountId) -> Option<Session> {
        self.sessions.read().get(account_id).cloned()
    }

    /// Like [`get`](Self::get) but unknown accounts are an error
    pub fn require(&self, account_id: &AccountId) -> OrchestratorResult<Session> {
        self.get(account_id)
            .ok_or_else(|| OrchestratorError::NotFound(account_id.clone()))
    }

    /// Stop the session (if active) and drop it from the registry
    pub async fn remove(&self, account_id: &AccountId) -> OrchestratorResult<()> {
        debug!(%account_id, "SessionRegistry::remove: called");
        let session = self.require(account_id)?;
        session.close().await;

        let mut sessions = self.sessions.write();
        if sessions.get(account_id).is_some_and(|s| s.ptr_eq(&session)) {
            sessions.remove(account_id);
        }
        info!(%account_id, "session removed");
        Ok(())
    }

    /// Snapshot of every session's status, ordered by account id
    pub fn list(&self) -> Vec<(AccountId, SessionStatus)> {
        let mut list: Vec<_> = self
            .sessions
            .read()
            .iter()
            .map(|(id, session)| (id.clone(), session.status()))
            .collect();
        list.sort_by(|a, b| a.0.cmp(&b.0));
        list
    }

    /// Every live session, ordered by account id
    pub fn sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<_> = self.sessions.read().values().cloned().collect();
        sessions.sort_by(|a, b| a.account_id().cmp(b.account_id()));
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Start every persisted account matching `predicate`
    ///
    /// Accounts start concurrently. A failure is recorded in the report and
    /// never prevents the remaining accounts from starting.
    pub async fn auto_start<F>(&self, predicate: F) -> OrchestratorResult<AutoStartReport>
    where
        F: Fn(&AccountRecord) -> bool,
    {
        debug!("SessionRegistry::auto_start: called");
        let accounts = self.deps.store.load_accounts().await?;

        let starts = accounts.into_iter().filter(|record| predicate(record)).map(|record| {
            let session = self.get_or_create(record);
            async move {
                let result = session.start().await;
                (session.account_id().clone(), result)
            }
        });

        let mut report = AutoStartReport::default();
        for (account_id, result) in join_all(starts).await {
            match result {
                Ok(()) => report.started.push(account_id),
                Err(e) => {
                    warn!(%account_id, error = %e, "auto-start failed");
                    report.failed.push((account_id, e));
                }
            }
        }
        info!(
            started = report.started.len(),
            failed = report.failed.len(),
            "auto-start complete"
        );
        Ok(report)
    }

    /// Stop every session concurrently and empty the registry
    ///
    /// Sessions still running when the global deadline passes are aborted.
    /// Returns how many sessions were shut down; calling it again returns 0.
    pub async fn shutdown(&self) -> usize {
        let sessions: Vec<Session> = self.sessions.write().drain().map(|(_, s)| s).collect();
        let count = sessions.len();
        debug!(count, "SessionRegistry::shutdown: called");
        if count == 0 {
            return 0;
        }
        info!("Shutting down {} sessions", count);

        let closes = join_all(sessions.iter().map(|session| session.close()));
        if tokio::time::timeout(self.shutdown_timeout, closes).await.is_err() {
            warn!(
                "Aborting sessions still stopping after {}ms",
                self.shutdown_timeout.as_millis()
            );
            for session in &sessions {
                session.abort();
            }
        }

        info!("Session registry shut down");
        count
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish()
    }
}
