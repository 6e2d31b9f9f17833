//! BotStore - file-backed account persistence
//!
//! Stores every managed game account as one JSON document so the daemon can
//! reload accounts (and their auth codes) across restarts.
//!
//! # Layout
//!
//! ```text
//! ~/.local/share/botdaemon/
//! ├── accounts.json       # all account records
//! └── accounts.json.lock  # advisory lock shared by every writer
//! ```
//!
//! # Example
//!
//! ```ignore
//! use botstore::{AccountBook, AccountRecord};
//!
//! let book = AccountBook::open("accounts.json")?;
//! book.upsert(AccountRecord::new("10001", "farm-alt").with_auto_start(true))?;
//! let auto = book.load_accounts()?.into_iter().filter(|a| a.auto_start);
//! ```

mod book;
mod error;
mod record;

pub use book::AccountBook;
pub use error::{StoreError, StoreResult};
pub use record::{AccountRecord, DEFAULT_PLATFORM, now_ms};

/// Current on-disk format version
pub const FORMAT_VERSION: u32 = 1;
