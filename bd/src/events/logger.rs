//! Event Logger - persists events to JSONL files
//!
//! The EventLogger subscribes to the hub's wildcard topics and writes every
//! event to a per-account JSONL file for history and the `bd logs` command.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::hub::{EventHub, Subscription};
use super::types::{BotEvent, EventLogEntry, Topic};
use crate::domain::{AccountId, SessionStatus};

/// Observer id the logger subscribes under
pub const EVENT_LOGGER_OBSERVER: &str = "event-logger";

/// Event logger that writes events to JSONL files
///
/// Events are written to `{runs_dir}/{account-id}/events.jsonl`
pub struct EventLogger {
    /// Base directory for per-account event logs
    runs_dir: PathBuf,
    /// Open file writers per account
    writers: HashMap<AccountId, BufWriter<File>>,
}

impl EventLogger {
    /// Create a new event logger
    pub fn new(runs_dir: impl AsRef<Path>) -> Self {
        let runs_dir = runs_dir.as_ref().to_path_buf();
        debug!(?runs_dir, "EventLogger::new: creating logger");
        Self {
            runs_dir,
            writers: HashMap::new(),
        }
    }

    /// Write an event to its account's log file
    pub fn write_event(&mut self, event: &BotEvent) -> eyre::Result<()> {
        let account_id = event.account_id();
        debug!(%account_id, event = event.event_name(), "EventLogger::write_event");

        if !self.writers.contains_key(account_id) {
            // Create directory and file for a new account
            let account_dir = self.runs_dir.join(account_id.file_stem());
            fs::create_dir_all(&account_dir)?;

            let log_path = account_dir.join("events.jsonl");
            debug!(?log_path, "EventLogger: creating new log file");

            let file = OpenOptions::new().create(true).append(true).open(&log_path)?;
            self.writers.insert(account_id.clone(), BufWriter::new(file));
        }
        let Some(writer) = self.writers.get_mut(account_id) else {
            return Ok(());
        };

        // Write event as JSON line
        let entry = EventLogEntry::new(event.clone());
        let json = serde_json::to_string(&entry)?;
        writeln!(writer, "{}", json)?;
        writer.flush()?;

        Ok(())
    }

    /// Close the writer for an account (e.g., when its bot stops)
    pub fn close_account(&mut self, account_id: &AccountId) {
        debug!(%account_id, "EventLogger::close_account");
        if let Some(mut writer) = self.writers.remove(account_id) {
            let _ = writer.flush();
        }
    }

    fn handle(&mut self, event: BotEvent) {
        let account_id = event.account_id().clone();
        let finished = matches!(
            event,
            BotEvent::StatusChange {
                status: SessionStatus::Stopped | SessionStatus::Error,
                ..
            }
        );

        if let Err(e) = self.write_event(&event) {
            error!(%account_id, error = %e, "EventLogger: failed to write event");
        }

        if finished {
            self.close_account(&account_id);
        }
    }

    /// Run the logger until cancelled or the hub closes
    ///
    /// Takes its subscriptions ready-made so nothing published between
    /// spawning and the first poll is missed; see [`spawn_event_logger`].
    pub async fn run(mut self, mut logs: Subscription, mut status: Subscription, cancel: CancellationToken) {
        debug!("EventLogger::run: starting event logger");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("EventLogger: cancelled, shutting down");
                    break;
                }
                event = logs.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
                event = status.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
            }
        }

        // Drain what is already buffered so the final transitions are kept
        while let Some(event) = status.try_recv() {
            self.handle(event);
        }
        while let Some(event) = logs.try_recv() {
            self.handle(event);
        }

        let dropped = logs.dropped() + status.dropped();
        if dropped > 0 {
            warn!(dropped, "EventLogger: events were dropped while lagging");
        }

        // Flush all remaining writers
        for (account_id, mut writer) in self.writers.drain() {
            debug!(%account_id, "EventLogger: flushing writer on shutdown");
            let _ = writer.flush();
        }
    }
}

/// Read events from an account's log file
pub fn read_account_events(runs_dir: impl AsRef<Path>, account_id: &AccountId) -> eyre::Result<Vec<EventLogEntry>> {
    let log_path = runs_dir.as_ref().join(account_id.file_stem()).join("events.jsonl");
    debug!(?log_path, "read_account_events: reading log file");

    if !log_path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(&log_path)?;
    let mut entries = Vec::new();

    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<EventLogEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                warn!(line, error = %e, "read_account_events: failed to parse line");
            }
        }
    }

    debug!(count = entries.len(), "read_account_events: loaded entries");
    Ok(entries)
}

/// Spawn the event logger as a background task
pub fn spawn_event_logger(
    hub: EventHub,
    runs_dir: impl AsRef<Path>,
    cancel: CancellationToken,
) -> eyre::Result<tokio::task::JoinHandle<()>> {
    fs::create_dir_all(runs_dir.as_ref())?;
    let logger = EventLogger::new(runs_dir);
    let logs = hub.subscribe(EVENT_LOGGER_OBSERVER, Topic::AllLogs);
    let status = hub.subscribe(EVENT_LOGGER_OBSERVER, Topic::StatusChanges);
    Ok(tokio::spawn(async move {
        logger.run(logs, status, cancel).await;
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LogEntry, LogLevel};
    use tempfile::tempdir;

    fn id(s: &str) -> AccountId {
        AccountId::from(s)
    }

    #[test]
    fn test_event_logger_creation() {
        let temp = tempdir().unwrap();
        let logger = EventLogger::new(temp.path());
        assert!(logger.writers.is_empty());
    }

    #[test]
    fn test_write_event() {
        let temp = tempdir().unwrap();
        let mut logger = EventLogger::new(temp.path());

        logger.write_event(&BotEvent::QrScanned { account_id: id("42") }).unwrap();

        let log_path = temp.path().join("42").join("events.jsonl");
        assert!(log_path.exists());

        let content = fs::read_to_string(&log_path).unwrap();
        assert!(content.contains("qr:scanned"));
        assert!(content.contains("42"));
    }

    #[test]
    fn test_multiple_accounts() {
        let temp = tempdir().unwrap();
        let mut logger = EventLogger::new(temp.path());

        logger.write_event(&BotEvent::QrScanned { account_id: id("1") }).unwrap();
        logger.write_event(&BotEvent::QrExpired { account_id: id("2") }).unwrap();

        assert!(temp.path().join("1").join("events.jsonl").exists());
        assert!(temp.path().join("2").join("events.jsonl").exists());
    }

    #[test]
    fn test_read_account_events() {
        let temp = tempdir().unwrap();
        let mut logger = EventLogger::new(temp.path());

        logger
            .write_event(&BotEvent::Log(LogEntry::new(id("7"), LogLevel::Info, "hello")))
            .unwrap();
        logger
            .write_event(&BotEvent::StatusChange {
                account_id: id("7"),
                status: SessionStatus::Running,
            })
            .unwrap();

        let entries = read_account_events(temp.path(), &id("7")).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event.event_name(), "botLog");
        assert_eq!(entries[1].event.event_name(), "bot:statusChange");
    }

    #[test]
    fn test_read_nonexistent_account() {
        let temp = tempdir().unwrap();
        let entries = read_account_events(temp.path(), &id("nobody")).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_stop_closes_writer() {
        let temp = tempdir().unwrap();
        let mut logger = EventLogger::new(temp.path());

        logger.handle(BotEvent::QrScanned { account_id: id("3") });
        assert!(logger.writers.contains_key(&id("3")));

        logger.handle(BotEvent::StatusChange {
            account_id: id("3"),
            status: SessionStatus::Stopped,
        });
        assert!(!logger.writers.contains_key(&id("3")));
    }

    #[tokio::test]
    async fn test_run_persists_hub_events() {
        let temp = tempdir().unwrap();
        let hub = EventHub::new(16);
        let cancel = CancellationToken::new();
        let handle = spawn_event_logger(hub.clone(), temp.path(), cancel.clone()).unwrap();
        assert_eq!(hub.subscriber_count(&Topic::StatusChanges), 1);

        // Published before the logger task has been polled even once
        hub.publish_event(BotEvent::QrExpired { account_id: id("9") });
        hub.publish_event(BotEvent::Log(LogEntry::new(id("9"), LogLevel::Warn, "late")));
        cancel.cancel();
        handle.await.unwrap();

        let entries = read_account_events(temp.path(), &id("9")).unwrap();
        assert_eq!(entries.len(), 2);
    }
}
