//! LogBuffer - bounded per-session log ring

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::domain::LogEntry;

/// Bounded, ordered log buffer with FIFO eviction
///
/// Readers and writers share one short critical section; nothing inside it
/// awaits, so `recent` never waits on more than a single append.
#[derive(Debug)]
pub struct LogBuffer {
    capacity: usize,
    entries: Mutex<VecDeque<LogEntry>>,
}

impl LogBuffer {
    /// Create a buffer retaining at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Append an entry, evicting the oldest past capacity
    pub fn append(&self, entry: LogEntry) {
        self.append_with(entry, |_| {});
    }

    /// Append an entry and run `publish` before releasing the lock
    ///
    /// Publishing under the lock makes delivery order equal append order when
    /// several tasks log for the same session. `publish` must not block.
    pub fn append_with(&self, entry: LogEntry, publish: impl FnOnce(&LogEntry)) {
        let mut entries = self.entries.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        publish(&entry);
        entries.push_back(entry);
    }

    /// The last `limit` entries, oldest first and most recent last
    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        let entries = self.entries.lock();
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }
}
