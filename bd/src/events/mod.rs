//! Event Hub Architecture for session observability
//!
//! Sessions publish every observable action as a [`BotEvent`]. Observers
//! (socket clients, the CLI, the JSONL logger) subscribe per topic.
//!
//! # Architecture
//!
//! ```text
//!   Session 42        Session 7         Session N
//!   (actor, login,    (actor, login,    ...
//!    run task)         run task)
//!        │                 │
//!        └────────┬────────┘
//!                 ↓  publish_event (never blocks)
//! ┌──────────────────────────────────────────────┐
//! │                  EVENT HUB                    │
//! │     one tokio broadcast channel per topic     │
//! │  account:<id> │ all-logs │ status-changes     │
//! └──────────────────────────────────────────────┘
//!        ↓                 ↓                ↓
//!   per-account       dashboard log     event logger
//!   viewer            feed              (.jsonl)
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let hub = EventHub::new(1024);
//! let mut sub = hub.subscribe("socket-1", Topic::account("42"));
//! while let Some(event) = sub.recv().await {
//!     println!("{}: {:?}", event.event_name(), event);
//! }
//! ```

mod hub;
mod logger;
mod types;

pub use hub::{DEFAULT_OBSERVER_CAPACITY, EventHub, ObserverId, Subscription};
pub use logger::{EVENT_LOGGER_OBSERVER, EventLogger, read_account_events, spawn_event_logger};
pub use types::{BotEvent, EventLogEntry, Topic};
