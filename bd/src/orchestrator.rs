//! Orchestrator - the facade the transport layer calls
//!
//! Each operation maps onto one registry or session call. The orchestrator
//! holds no state of its own beyond the registry, hub and store it was
//! built with.

use std::sync::Arc;

use botstore::AccountRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::Config;
use crate::domain::{AccountId, LogEntry, LoginState, SessionStatus};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::events::{EventHub, ObserverId, Subscription, Topic};
use crate::login::LoginHandle;
use crate::provider::{AuthProvider, QqAuthClient};
use crate::registry::{AutoStartReport, SessionRegistry};
use crate::runner::{BotRunner, HeartbeatRunner};
use crate::session::{Session, SessionDeps, SessionSettings};
use crate::store::{AccountStore, FileAccountStore};

/// Log entries returned by `get_logs` when no limit is given
pub const DEFAULT_LOG_LIMIT: usize = 200;

/// One row of `list_accounts`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub id: AccountId,
    pub name: String,
    pub status: SessionStatus,
    pub auto_start: bool,
    pub has_auth_code: bool,
}

impl AccountSummary {
    fn of(session: &Session) -> Self {
        let record = session.record();
        Self {
            id: session.account_id().clone(),
            name: record.name.clone(),
            status: session.status(),
            auto_start: record.auto_start,
            has_auth_code: record.has_auth_code(),
        }
    }
}

struct Inner {
    registry: SessionRegistry,
    hub: EventHub,
    store: Arc<dyn AccountStore>,
}

/// Process-wide session orchestrator
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn builder(config: &Config) -> OrchestratorBuilder {
        OrchestratorBuilder::from_config(config)
    }

    pub fn hub(&self) -> &EventHub {
        &self.inner.hub
    }

    pub fn store(&self) -> &Arc<dyn AccountStore> {
        &self.inner.store
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    pub fn session(&self, account_id: &AccountId) -> Option<Session> {
        self.inner.registry.get(account_id)
    }

    /// Create a session for every persisted account; returns how many exist
    pub async fn load_accounts(&self) -> OrchestratorResult<usize> {
        debug!("Orchestrator::load_accounts: called");
        let accounts = self.inner.store.load_accounts().await?;
        let count = accounts.len();
        for record in accounts {
            self.inner.registry.get_or_create(record);
        }
        info!("Loaded {} accounts", count);
        Ok(count)
    }

    /// Summary of every known session, ordered by account id
    pub fn list_accounts(&self) -> Vec<AccountSummary> {
        self.inner.registry.sessions().iter().map(AccountSummary::of).collect()
    }

    /// Most recent log entries for one account, oldest first
    pub fn get_logs(&self, account_id: &AccountId, limit: Option<usize>) -> OrchestratorResult<Vec<LogEntry>> {
        let session = self.inner.registry.require(account_id)?;
        Ok(session.recent_logs(limit.unwrap_or(DEFAULT_LOG_LIMIT)))
    }

    pub async fn start_bot(&self, account_id: &AccountId) -> OrchestratorResult<()> {
        debug!(%account_id, "Orchestrator::start_bot: called");
        self.inner.registry.require(account_id)?.start().await
    }

    pub async fn stop_bot(&self, account_id: &AccountId) -> OrchestratorResult<()> {
        debug!(%account_id, "Orchestrator::stop_bot: called");
        self.inner.registry.require(account_id)?.stop().await
    }

    /// Begin a QR login; progress and outcome arrive as `qr:*` events
    pub async fn start_login(&self, account_id: &AccountId) -> OrchestratorResult<LoginHandle> {
        debug!(%account_id, "Orchestrator::start_login: called");
        self.inner.registry.require(account_id)?.start_login().await
    }

    pub async fn cancel_login(&self, account_id: &AccountId) -> OrchestratorResult<Option<LoginState>> {
        debug!(%account_id, "Orchestrator::cancel_login: called");
        self.inner.registry.require(account_id)?.cancel_login().await
    }

    /// Explicit recovery from Error (or Stopped) back to Idle
    pub async fn reset_bot(&self, account_id: &AccountId) -> OrchestratorResult<()> {
        debug!(%account_id, "Orchestrator::reset_bot: called");
        self.inner.registry.require(account_id)?.reset().await
    }

    /// Start every persisted account flagged for auto-start
    pub async fn auto_start_bots(&self) -> OrchestratorResult<AutoStartReport> {
        debug!("Orchestrator::auto_start_bots: called");
        self.inner.registry.auto_start(|record| record.auto_start).await
    }

    /// Stop every session and empty the registry; idempotent
    pub async fn shutdown(&self) -> usize {
        debug!("Orchestrator::shutdown: called");
        self.inner.registry.shutdown().await
    }

    /// Persist an account and make sure it has a session
    pub async fn add_account(&self, record: AccountRecord) -> OrchestratorResult<Session> {
        let account_id = AccountId::from(record.id.as_str());
        debug!(%account_id, "Orchestrator::add_account: called");
        self.inner.store.upsert_account(record.clone()).await?;

        let existed = self.inner.registry.get(&account_id);
        let session = self.inner.registry.get_or_create(record.clone());
        if existed.is_some() {
            session.update_record(record).await?;
        }
        Ok(session)
    }

    /// Remove the session (stopping it first) and delete the persisted account
    pub async fn remove_account(&self, account_id: &AccountId) -> OrchestratorResult<()> {
        debug!(%account_id, "Orchestrator::remove_account: called");
        let had_session = match self.inner.registry.remove(account_id).await {
            Ok(()) => true,
            Err(OrchestratorError::NotFound(_)) => false,
            Err(e) => return Err(e),
        };
        let deleted = self.inner.store.delete_account(account_id).await?;
        if !had_session && !deleted {
            return Err(OrchestratorError::NotFound(account_id.clone()));
        }
        Ok(())
    }

    /// Persist a new game config and hand it to the session's next run
    pub async fn update_account_config(&self, account_id: &AccountId, config: Value) -> OrchestratorResult<()> {
        debug!(%account_id, "Orchestrator::update_account_config: called");
        self.inner.store.save_account_config(account_id, config.clone()).await?;
        if let Some(session) = self.inner.registry.get(account_id) {
            session.update_config(config).await?;
        }
        Ok(())
    }

    pub async fn set_auto_start(&self, account_id: &AccountId, auto_start: bool) -> OrchestratorResult<()> {
        debug!(%account_id, auto_start, "Orchestrator::set_auto_start: called");
        self.inner.store.set_auto_start(account_id, auto_start).await?;
        if let Some(session) = self.inner.registry.get(account_id) {
            let mut record = session.record();
            record.auto_start = auto_start;
            session.update_record(record).await?;
        }
        Ok(())
    }

    pub fn subscribe(&self, observer: impl Into<ObserverId>, topic: Topic) -> Subscription {
        self.inner.hub.subscribe(observer, topic)
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        self.inner.hub.unsubscribe(subscription);
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.inner.registry)
            .finish()
    }
}

/// Builder for [`Orchestrator`]; unset collaborators come from the config
pub struct OrchestratorBuilder {
    config: Config,
    hub: Option<EventHub>,
    provider: Option<Arc<dyn AuthProvider>>,
    runner: Option<Arc<dyn BotRunner>>,
    store: Option<Arc<dyn AccountStore>>,
    settings: Option<SessionSettings>,
}

impl OrchestratorBuilder {
    pub fn from_config(config: &Config) -> Self {
        Self {
            config: config.clone(),
            hub: None,
            provider: None,
            runner: None,
            store: None,
            settings: None,
        }
    }

    pub fn hub(mut self, hub: EventHub) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn AuthProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn runner(mut self, runner: Arc<dyn BotRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn store(mut self, store: Arc<dyn AccountStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Override the session settings derived from the config
    pub fn settings(mut self, settings: SessionSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn build(self) -> OrchestratorResult<Orchestrator> {
        debug!("OrchestratorBuilder::build: called");
        let config = self.config;

        let hub = self
            .hub
            .unwrap_or_else(|| EventHub::new(config.hub.observer_queue_capacity));
        let provider: Arc<dyn AuthProvider> = match self.provider {
            Some(provider) => provider,
            None => Arc::new(QqAuthClient::from_config(&config.provider)?),
        };
        let runner = self
            .runner
            .unwrap_or_else(|| Arc::new(HeartbeatRunner::from_config(&config.runner)));
        let store: Arc<dyn AccountStore> = match self.store {
            Some(store) => store,
            None => Arc::new(FileAccountStore::open(&config.storage.accounts_file)?),
        };
        let settings = self.settings.unwrap_or_else(|| SessionSettings::from(&config));

        let deps = SessionDeps {
            hub: hub.clone(),
            provider,
            runner,
            store: store.clone(),
            settings,
        };
        let registry = SessionRegistry::new(deps, config.shutdown.timeout());

        Ok(Orchestrator {
            inner: Arc::new(Inner { registry, hub, store }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::BotEvent;
    use crate::provider::mock::ScriptedProvider;
    use crate::session::test_support::*;
    use crate::store::MemoryStore;

    fn orchestrator(provider: ScriptedProvider, accounts: Vec<AccountRecord>) -> Orchestrator {
        Orchestrator::builder(&Config::default())
            .provider(Arc::new(provider))
            .runner(Arc::new(IdleRunner))
            .store(Arc::new(MemoryStore::with_accounts(accounts)))
            .settings(fast_settings())
            .build()
            .unwrap()
    }

    fn id(s: &str) -> AccountId {
        AccountId::from(s)
    }

    #[tokio::test]
    async fn test_load_and_list_accounts() {
        let orch = orchestrator(
            ScriptedProvider::new("abc", vec![], "xyz"),
            vec![
                AccountRecord::new("2", "second").with_auto_start(true),
                AccountRecord::new("1", "first"),
            ],
        );
        assert_eq!(orch.load_accounts().await.unwrap(), 2);

        let list = orch.list_accounts();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, id("1"));
        assert_eq!(list[0].status, SessionStatus::Idle);
        assert!(list[1].auto_start);
        assert!(!list[1].has_auth_code);
    }

    #[tokio::test]
    async fn test_unknown_account_is_not_found() {
        let orch = orchestrator(ScriptedProvider::new("abc", vec![], "xyz"), vec![]);
        assert!(matches!(orch.start_bot(&id("9")).await, Err(OrchestratorError::NotFound(_))));
        assert!(matches!(orch.stop_bot(&id("9")).await, Err(OrchestratorError::NotFound(_))));
        assert!(matches!(orch.start_login(&id("9")).await, Err(OrchestratorError::NotFound(_))));
        assert!(matches!(orch.cancel_login(&id("9")).await, Err(OrchestratorError::NotFound(_))));
        assert!(matches!(orch.get_logs(&id("9"), None), Err(OrchestratorError::NotFound(_))));
        assert!(matches!(orch.remove_account(&id("9")).await, Err(OrchestratorError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_login_persists_auth_code() {
        let orch = orchestrator(
            ScriptedProvider::new("abc", ScriptedProvider::waits_then_ok(1, "t1"), "xyz"),
            vec![AccountRecord::new("42", "farm")],
        );
        orch.load_accounts().await.unwrap();
        let mut events = orch.subscribe("test", Topic::account("42"));

        let handle = orch.start_login(&id("42")).await.unwrap();
        assert_eq!(handle.wait().await, LoginState::Succeeded);
        wait_for_status(&orch.session(&id("42")).unwrap(), SessionStatus::Idle).await;

        let stored = orch.store().get_account(&id("42")).await.unwrap().unwrap();
        assert_eq!(stored.auth_code.as_deref(), Some("xyz"));
        assert!(orch.list_accounts()[0].has_auth_code);

        let mut success = None;
        while let Some(event) = events.try_recv() {
            if let BotEvent::QrSuccess { auth_code, .. } = event {
                success = Some(auth_code);
            }
        }
        assert_eq!(success.as_deref(), Some("xyz"));
    }

    #[tokio::test]
    async fn test_get_logs_default_and_limit() {
        let orch = orchestrator(ScriptedProvider::new("abc", vec![], "xyz"), vec![]);
        let session = orch.add_account(AccountRecord::new("1", "a")).await.unwrap();
        for i in 0..250 {
            session.append_log(crate::domain::LogLevel::Info, format!("line {i}"));
        }

        let logs = orch.get_logs(&id("1"), None).unwrap();
        assert_eq!(logs.len(), DEFAULT_LOG_LIMIT);
        assert_eq!(logs.last().unwrap().message, "line 249");
        assert_eq!(orch.get_logs(&id("1"), Some(3)).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_add_account_refreshes_existing_session() {
        let orch = orchestrator(ScriptedProvider::new("abc", vec![], "xyz"), vec![]);
        let first = orch.add_account(AccountRecord::new("1", "a")).await.unwrap();
        let second = orch.add_account(AccountRecord::new("1", "renamed")).await.unwrap();

        assert!(first.ptr_eq(&second));
        assert_eq!(second.record().name, "renamed");
        assert_eq!(orch.list_accounts().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_account() {
        let orch = orchestrator(ScriptedProvider::new("abc", vec![], "xyz"), vec![]);
        let session = orch.add_account(AccountRecord::new("1", "a")).await.unwrap();
        orch.start_bot(&id("1")).await.unwrap();

        orch.remove_account(&id("1")).await.unwrap();

        assert_eq!(session.status(), SessionStatus::Stopped);
        assert!(orch.session(&id("1")).is_none());
        assert!(orch.store().get_account(&id("1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_config_and_auto_start() {
        let orch = orchestrator(ScriptedProvider::new("abc", vec![], "xyz"), vec![]);
        let session = orch.add_account(AccountRecord::new("1", "a")).await.unwrap();

        orch.update_account_config(&id("1"), serde_json::json!({"crop": "rice"}))
            .await
            .unwrap();
        orch.set_auto_start(&id("1"), true).await.unwrap();

        assert_eq!(session.record().config["crop"], "rice");
        assert!(session.record().auto_start);
        let stored = orch.store().get_account(&id("1")).await.unwrap().unwrap();
        assert_eq!(stored.config["crop"], "rice");
        assert!(stored.auto_start);
    }

    #[tokio::test]
    async fn test_auto_start_bots_and_shutdown() {
        let orch = orchestrator(
            ScriptedProvider::new("abc", vec![], "xyz"),
            vec![
                AccountRecord::new("1", "a").with_auto_start(true),
                AccountRecord::new("2", "b"),
            ],
        );
        orch.load_accounts().await.unwrap();

        let report = orch.auto_start_bots().await.unwrap();
        assert_eq!(report.started, vec![id("1")]);
        assert_eq!(orch.session(&id("1")).unwrap().status(), SessionStatus::Running);
        assert_eq!(orch.session(&id("2")).unwrap().status(), SessionStatus::Idle);

        assert_eq!(orch.shutdown().await, 2);
        assert_eq!(orch.shutdown().await, 0);
        assert!(orch.list_accounts().is_empty());
    }

    #[tokio::test]
    async fn test_reset_after_stop() {
        let orch = orchestrator(ScriptedProvider::new("abc", vec![], "xyz"), vec![]);
        orch.add_account(AccountRecord::new("1", "a")).await.unwrap();
        orch.start_bot(&id("1")).await.unwrap();
        orch.stop_bot(&id("1")).await.unwrap();

        orch.reset_bot(&id("1")).await.unwrap();
        assert_eq!(orch.list_accounts()[0].status, SessionStatus::Idle);
    }
}
