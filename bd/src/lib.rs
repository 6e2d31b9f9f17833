//! BotDaemon - Concurrent QR-login bot session orchestrator
//!
//! BotDaemon keeps many independent game-account sessions ("bots") alive at
//! once. Each session logs in through the QQ QR-code flow, runs its bot while
//! logged in, and streams status and log events to any number of observers.
//!
//! # Core Concepts
//!
//! - **One actor per account**: every [`Session`] is a tokio task that owns
//!   its mutable state and serializes commands sent to it
//! - **At most one login**: a session refuses a second QR login while one is
//!   in flight
//! - **Cooperative cancellation**: logins and bot runs stop at their next
//!   suspension point; a deadline forces progress if they don't
//! - **Non-blocking fan-out**: the [`EventHub`] never lets a slow observer
//!   stall a session
//!
//! # Modules
//!
//! - [`login`] - QR login state machine
//! - [`session`] - per-account actor, log buffer and emitter
//! - [`registry`] - account id to session map, auto-start and shutdown
//! - [`events`] - topics, events, hub and the JSONL event logger
//! - [`orchestrator`] - the facade the transport layer calls
//! - [`provider`] - auth provider trait and the QQ HTTP client
//! - [`qr`] - QR rendering
//! - [`runner`] - bot runner trait and the heartbeat runner
//! - [`store`] - account persistence seam
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod login;
pub mod orchestrator;
pub mod provider;
pub mod qr;
pub mod registry;
pub mod runner;
pub mod session;
pub mod store;

// Re-export commonly used types
pub use config::Config;
pub use domain::{AccountId, LogEntry, LogLevel, LoginState, SessionStatus};
pub use error::{OrchestratorError, OrchestratorResult};
pub use events::{
    BotEvent, EventHub, EventLogEntry, EventLogger, ObserverId, Subscription, Topic, read_account_events,
    spawn_event_logger,
};
pub use login::{LoginHandle, LoginMachine, LoginOutcome, LoginSettings};
pub use orchestrator::{AccountSummary, Orchestrator, OrchestratorBuilder};
pub use provider::{AuthProvider, LoginCode, ProviderError, QqAuthClient, ScanStatus};
pub use registry::{AutoStartReport, SessionRegistry};
pub use runner::{BotRunner, HeartbeatRunner, RunContext, RunError};
pub use session::{LogBuffer, Session, SessionDeps, SessionEmitter, SessionSettings};
pub use store::{AccountStore, FileAccountStore, MemoryStore};
