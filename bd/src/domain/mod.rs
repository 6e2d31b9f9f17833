//! Domain types for BotDaemon
//!
//! Account identifiers, session/login status enums and log entries. These are
//! plain values shared by every other module and carried inside events.

mod id;
mod log;
mod status;

pub use id::AccountId;
pub use log::{LogEntry, LogLevel};
pub use status::{LoginState, SessionStatus};
