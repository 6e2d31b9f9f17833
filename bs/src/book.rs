//! AccountBook - the JSON account file and its lock
//!
//! Every operation takes an exclusive `fs2` lock on a sibling `.lock` file,
//! reads the document, applies the change and (only when something changed)
//! writes it back via temp file + rename so readers never see a torn file.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::FORMAT_VERSION;
use crate::error::{StoreError, StoreResult};
use crate::record::{AccountRecord, now_ms};

/// On-disk document
#[derive(Debug, Default, Serialize, Deserialize)]
struct AccountFile {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    accounts: Vec<AccountRecord>,
}

impl AccountFile {
    fn find_mut(&mut self, id: &str) -> StoreResult<&mut AccountRecord> {
        self.accounts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

/// Handle to an account file on disk
#[derive(Debug, Clone)]
pub struct AccountBook {
    path: PathBuf,
    lock_path: PathBuf,
}

impl AccountBook {
    /// Open (creating if needed) the account file at `path`
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        debug!("AccountBook::open: {}", path.display());

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let mut lock_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);

        let book = Self { path, lock_path };
        if !book.path.exists() {
            info!("Creating account file at {}", book.path.display());
            book.with_lock(|_| Ok(((), true)))?;
        }
        Ok(book)
    }

    /// Path of the account file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every stored account, ordered by id
    pub fn load_accounts(&self) -> StoreResult<Vec<AccountRecord>> {
        let mut accounts = self.with_lock(|file| Ok((file.accounts.clone(), false)))?;
        accounts.sort_by(|a, b| a.id.cmp(&b.id));
        debug!("AccountBook::load_accounts: {} accounts", accounts.len());
        Ok(accounts)
    }

    /// Get one account by id
    pub fn get(&self, id: &str) -> StoreResult<Option<AccountRecord>> {
        self.with_lock(|file| Ok((file.accounts.iter().find(|a| a.id == id).cloned(), false)))
    }

    /// Insert a new account or replace an existing one (keeping its creation time)
    pub fn upsert(&self, mut record: AccountRecord) -> StoreResult<()> {
        debug!("AccountBook::upsert: {}", record.id);
        self.with_lock(move |file| {
            record.updated_at = now_ms();
            match file.accounts.iter_mut().find(|a| a.id == record.id) {
                Some(existing) => {
                    record.created_at = existing.created_at;
                    *existing = record;
                }
                None => file.accounts.push(record),
            }
            Ok(((), true))
        })
    }

    /// Replace the game configuration of an existing account
    pub fn save_account_config(&self, id: &str, config: Value) -> StoreResult<()> {
        debug!("AccountBook::save_account_config: {id}");
        self.with_lock(|file| {
            let account = file.find_mut(id)?;
            account.config = config;
            account.touch();
            Ok(((), true))
        })
    }

    /// Store (or clear) the auth code of an existing account
    pub fn set_auth_code(&self, id: &str, auth_code: Option<String>) -> StoreResult<()> {
        debug!("AccountBook::set_auth_code: {id}");
        self.with_lock(|file| {
            let account = file.find_mut(id)?;
            account.auth_code = auth_code;
            account.touch();
            Ok(((), true))
        })
    }

    /// Toggle auto-start for an existing account
    pub fn set_auto_start(&self, id: &str, auto_start: bool) -> StoreResult<()> {
        debug!("AccountBook::set_auto_start: {id} -> {auto_start}");
        self.with_lock(|file| {
            let account = file.find_mut(id)?;
            account.auto_start = auto_start;
            account.touch();
            Ok(((), true))
        })
    }

    /// Delete an account, returning whether it existed
    pub fn delete(&self, id: &str) -> StoreResult<bool> {
        debug!("AccountBook::delete: {id}");
        self.with_lock(|file| {
            let before = file.accounts.len();
            file.accounts.retain(|a| a.id != id);
            let removed = file.accounts.len() != before;
            Ok((removed, removed))
        })
    }

    /// Run `f` against the document under the exclusive lock.
    ///
    /// `f` returns its value and whether the document must be written back.
    fn with_lock<T>(&self, f: impl FnOnce(&mut AccountFile) -> StoreResult<(T, bool)>) -> StoreResult<T> {
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)?;
        lock.lock_exclusive()?;

        let result = self.read().and_then(|mut file| {
            let (value, dirty) = f(&mut file)?;
            if dirty {
                self.write(&mut file)?;
            }
            Ok(value)
        });

        if let Err(e) = FileExt::unlock(&lock) {
            warn!("Failed to release lock {}: {}", self.lock_path.display(), e);
        }
        result
    }

    fn read(&self) -> StoreResult<AccountFile> {
        if !self.path.exists() {
            return Ok(AccountFile {
                version: FORMAT_VERSION,
                accounts: Vec::new(),
            });
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(AccountFile {
                version: FORMAT_VERSION,
                accounts: Vec::new(),
            });
        }
        let file: AccountFile = serde_json::from_str(&content)?;
        if file.version > FORMAT_VERSION {
            return Err(StoreError::UnsupportedVersion {
                found: file.version,
                supported: FORMAT_VERSION,
            });
        }
        Ok(file)
    }

    fn write(&self, file: &mut AccountFile) -> StoreResult<()> {
        file.version = FORMAT_VERSION;
        let json = serde_json::to_string_pretty(file)?;

        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(json.as_bytes())?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}
