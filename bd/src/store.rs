//! Account persistence seam
//!
//! Sessions touch persistence only at creation, config-update and
//! login-success boundaries, never inside the polling path.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use botstore::{AccountBook, AccountRecord, StoreResult};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::domain::AccountId;
use crate::error::{OrchestratorError, OrchestratorResult};

/// Persistence layer consumed by the orchestrator
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Every persisted account
    async fn load_accounts(&self) -> OrchestratorResult<Vec<AccountRecord>>;

    async fn get_account(&self, id: &AccountId) -> OrchestratorResult<Option<AccountRecord>>;

    /// Insert or replace an account
    async fn upsert_account(&self, record: AccountRecord) -> OrchestratorResult<()>;

    async fn save_account_config(&self, id: &AccountId, config: Value) -> OrchestratorResult<()>;

    /// Store (or clear) the auth code from the last successful login
    async fn save_auth_code(&self, id: &AccountId, auth_code: Option<String>) -> OrchestratorResult<()>;

    async fn set_auto_start(&self, id: &AccountId, auto_start: bool) -> OrchestratorResult<()>;

    /// Delete an account; `false` if it did not exist
    async fn delete_account(&self, id: &AccountId) -> OrchestratorResult<bool>;
}

/// [`AccountStore`] backed by a `botstore` account file
#[derive(Debug, Clone)]
pub struct FileAccountStore {
    book: AccountBook,
}

impl FileAccountStore {
    pub fn open(path: impl AsRef<Path>) -> OrchestratorResult<Self> {
        debug!(path = %path.as_ref().display(), "FileAccountStore::open: called");
        Ok(Self {
            book: AccountBook::open(path)?,
        })
    }

    /// Run a blocking book operation off the async runtime
    async fn blocking<T, F>(&self, f: F) -> OrchestratorResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&AccountBook) -> StoreResult<T> + Send + 'static,
    {
        let book = self.book.clone();
        tokio::task::spawn_blocking(move || f(&book))
            .await
            .map_err(|e| OrchestratorError::InternalFault(format!("store task failed: {e}")))?
            .map_err(OrchestratorError::from)
    }
}

#[async_trait]
impl AccountStore for FileAccountStore {
    async fn load_accounts(&self) -> OrchestratorResult<Vec<AccountRecord>> {
        self.blocking(|book| book.load_accounts()).await
    }

    async fn get_account(&self, id: &AccountId) -> OrchestratorResult<Option<AccountRecord>> {
        let id = id.to_string();
        self.blocking(move |book| book.get(&id)).await
    }

    async fn upsert_account(&self, record: AccountRecord) -> OrchestratorResult<()> {
        self.blocking(move |book| book.upsert(record)).await
    }

    async fn save_account_config(&self, id: &AccountId, config: Value) -> OrchestratorResult<()> {
        let id = id.to_string();
        self.blocking(move |book| book.save_account_config(&id, config)).await
    }

    async fn save_auth_code(&self, id: &AccountId, auth_code: Option<String>) -> OrchestratorResult<()> {
        let id = id.to_string();
        self.blocking(move |book| book.set_auth_code(&id, auth_code)).await
    }

    async fn set_auto_start(&self, id: &AccountId, auto_start: bool) -> OrchestratorResult<()> {
        let id = id.to_string();
        self.blocking(move |book| book.set_auto_start(&id, auto_start)).await
    }

    async fn delete_account(&self, id: &AccountId) -> OrchestratorResult<bool> {
        let id = id.to_string();
        self.blocking(move |book| book.delete(&id)).await
    }
}

/// In-memory [`AccountStore`] for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryStore {
    accounts: RwLock<BTreeMap<String, AccountRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_accounts(accounts: impl IntoIterator<Item = AccountRecord>) -> Self {
        Self {
            accounts: RwLock::new(accounts.into_iter().map(|a| (a.id.clone(), a)).collect()),
        }
    }

    fn update(&self, id: &AccountId, f: impl FnOnce(&mut AccountRecord)) -> OrchestratorResult<()> {
        let mut accounts = self.accounts.write();
        let record = accounts
            .get_mut(id.as_str())
            .ok_or_else(|| OrchestratorError::NotFound(id.clone()))?;
        f(record);
        record.touch();
        Ok(())
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn load_accounts(&self) -> OrchestratorResult<Vec<AccountRecord>> {
        Ok(self.accounts.read().values().cloned().collect())
    }

    async fn get_account(&self, id: &AccountId) -> OrchestratorResult<Option<AccountRecord>> {
        Ok(self.accounts.read().get(id.as_str()).cloned())
    }

    async fn upsert_account(&self, record: AccountRecord) -> OrchestratorResult<()> {
        self.accounts.write().insert(record.id.clone(), record);
        Ok(())
    }

    async fn save_account_config(&self, id: &AccountId, config: Value) -> OrchestratorResult<()> {
        self.update(id, |record| record.config = config)
    }

    async fn save_auth_code(&self, id: &AccountId, auth_code: Option<String>) -> OrchestratorResult<()> {
        self.update(id, |record| record.auth_code = auth_code)
    }

    async fn set_auto_start(&self, id: &AccountId, auto_start: bool) -> OrchestratorResult<()> {
        self.update(id, |record| record.auto_start = auto_start)
    }

    async fn delete_account(&self, id: &AccountId) -> OrchestratorResult<bool> {
        Ok(self.accounts.write().remove(id.as_str()).is_some())
    }
}
