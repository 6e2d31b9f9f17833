//! Event Hub - topic-scoped pub/sub for session events
//!
//! Each topic is a tokio broadcast channel created on first subscribe and
//! dropped when its last subscriber goes away. Broadcast channels give every
//! subscriber its own bounded window: a slow observer lags and loses the
//! oldest events, while publishers never wait.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::types::{BotEvent, Topic};

/// Default per-observer queue depth
pub const DEFAULT_OBSERVER_CAPACITY: usize = 1024;

/// Identifier of a subscribing observer (socket id, CLI, logger, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(String);

impl ObserverId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObserverId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ObserverId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

struct TopicChannel {
    tx: broadcast::Sender<BotEvent>,
    generation: u64,
}

struct HubInner {
    capacity: usize,
    topics: RwLock<HashMap<Topic, TopicChannel>>,
    subscriptions: RwLock<HashMap<u64, (ObserverId, Topic)>>,
    next_id: AtomicU64,
}

/// Central event hub
///
/// Cheap to clone; all clones share the same topics. The subscriber set is
/// guarded by its own locks, independent of any session state.
#[derive(Clone)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

impl EventHub {
    /// Create a hub whose observers each buffer up to `capacity` events
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventHub::new: creating event hub");
        Self {
            inner: Arc::new(HubInner {
                capacity: capacity.max(1),
                topics: RwLock::new(HashMap::new()),
                subscriptions: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Publish an event on one topic
    ///
    /// Fire-and-forget: with no subscribers the event is dropped.
    pub fn publish(&self, topic: &Topic, event: BotEvent) {
        let topics = self.inner.topics.read();
        if let Some(channel) = topics.get(topic) {
            // Ignore send errors (no live receivers is OK)
            let _ = channel.tx.send(event);
        }
    }

    /// Publish an event on every topic it routes to
    pub fn publish_event(&self, event: BotEvent) {
        debug!(
            event = event.event_name(),
            account_id = %event.account_id(),
            "EventHub::publish_event"
        );
        let [scoped, wildcard] = event.topics();
        self.publish(&scoped, event.clone());
        self.publish(&wildcard, event);
    }

    /// Subscribe `observer` to `topic`
    ///
    /// Only events published after this call are received.
    pub fn subscribe(&self, observer: impl Into<ObserverId>, topic: Topic) -> Subscription {
        let observer = observer.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(%observer, %topic, id, "EventHub::subscribe: new subscriber");

        let (rx, generation) = {
            let mut topics = self.inner.topics.write();
            let channel = topics.entry(topic.clone()).or_insert_with(|| TopicChannel {
                tx: broadcast::channel(self.inner.capacity).0,
                generation: id,
            });
            (channel.tx.subscribe(), channel.generation)
        };
        self.inner
            .subscriptions
            .write()
            .insert(id, (observer.clone(), topic.clone()));

        Subscription {
            id,
            observer,
            topic,
            generation,
            rx,
            dropped: 0,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a subscription
    pub fn unsubscribe(&self, subscription: Subscription) {
        debug!(id = subscription.id, "EventHub::unsubscribe");
        drop(subscription);
    }

    /// Number of live subscribers on a topic
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.inner
            .topics
            .read()
            .get(topic)
            .map(|c| c.tx.receiver_count())
            .unwrap_or(0)
    }

    /// Snapshot of every live subscription
    pub fn subscriptions(&self) -> Vec<(ObserverId, Topic)> {
        let mut subs: Vec<_> = self.inner.subscriptions.read().values().cloned().collect();
        subs.sort();
        subs
    }

    /// Close every topic; subscribers drain what is buffered and then end
    pub fn close(&self) {
        debug!("EventHub::close: closing all topics");
        self.inner.topics.write().clear();
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_OBSERVER_CAPACITY)
    }
}

impl fmt::Debug for EventHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHub")
            .field("capacity", &self.inner.capacity)
            .field("topics", &self.inner.topics.read().len())
            .finish()
    }
}

/// A live subscription; dropping it unsubscribes
pub struct Subscription {
    id: u64,
    observer: ObserverId,
    topic: Topic,
    generation: u64,
    rx: broadcast::Receiver<BotEvent>,
    dropped: u64,
    hub: Weak<HubInner>,
}

impl Subscription {
    pub fn observer(&self) -> &ObserverId {
        &self.observer
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Events this subscriber lost to overflow so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Receive the next event, skipping past any overflow
    ///
    /// Returns `None` once the hub has closed the topic.
    pub async fn recv(&mut self) -> Option<BotEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => self.note_lag(n),
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(topic = %self.topic, "Subscription::recv: topic closed");
                    return None;
                }
            }
        }
    }

    /// Receive a buffered event without waiting
    pub fn try_recv(&mut self) -> Option<BotEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => self.note_lag(n),
                Err(_) => return None,
            }
        }
    }

    fn note_lag(&mut self, n: u64) {
        self.dropped += n;
        warn!(
            observer = %self.observer,
            topic = %self.topic,
            missed = n,
            "Subscription: observer lagged, oldest events dropped"
        );
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("observer", &self.observer)
            .field("topic", &self.topic)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(hub) = self.hub.upgrade() else {
            return;
        };
        hub.subscriptions.write().remove(&self.id);

        // Our receiver is still alive here, so a count of one means we are last
        let mut topics = hub.topics.write();
        if let Some(channel) = topics.get(&self.topic)
            && channel.generation == self.generation
            && channel.tx.receiver_count() <= 1
        {
            topics.remove(&self.topic);
        }
    }
}
