//! Ordered publish/subscribe fan-out for a single review.
//!
//! One bus exists per review. Publishing is synchronous and never fails:
//! the bus stamps the per-source sequence number, appends to the replay
//! history, and pushes the event into every subscriber's bounded queue.
//! A subscriber that cannot keep up is dropped rather than allowed to
//! stall the review.

use crate::events::types::{Event, EventKind};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Default per-subscriber queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default number of events retained for replay.
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// Receiving half of a subscription.
///
/// Dropping the stream ends the subscription; the bus notices the closed
/// queue on the next publish and removes the sender.
pub struct EventStream {
    id: u64,
    receiver: mpsc::Receiver<Arc<Event>>,
}

impl EventStream {
    /// Handle used to unsubscribe explicitly.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Receives the next event, or `None` once the bus side is gone.
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        self.receiver.recv().await
    }
}

struct BusInner {
    subscribers: HashMap<u64, mpsc::Sender<Arc<Event>>>,
    history: VecDeque<Arc<Event>>,
    sequences: HashMap<String, u64>,
}

/// In-process event bus with bounded subscriber queues.
pub struct EventBus {
    inner: Mutex<BusInner>,
    queue_capacity: usize,
    history_limit: usize,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY, DEFAULT_HISTORY_LIMIT)
    }
}

impl EventBus {
    /// Creates a bus. `history_limit` of 0 disables replay.
    pub fn new(queue_capacity: usize, history_limit: usize) -> Self {
        Self {
            inner: Mutex::new(BusInner {
                subscribers: HashMap::new(),
                history: VecDeque::new(),
                sequences: HashMap::new(),
            }),
            queue_capacity: queue_capacity.max(1),
            history_limit,
            next_id: AtomicU64::new(1),
        }
    }

    /// Publishes an event to every live subscriber.
    ///
    /// Stamps the per-source sequence number before fan-out, so for any
    /// one `source_id` the numbers observed downstream are strictly
    /// increasing from 1 with no gaps. Never blocks and never fails: a
    /// subscriber whose queue is full is dropped.
    pub fn publish(&self, mut event: Event) {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let seq = inner
            .sequences
            .entry(event.source_id.clone())
            .or_insert(0);
        *seq += 1;
        event.sequence = *seq;

        let event = Arc::new(event);

        if self.history_limit > 0 {
            inner.history.push_back(event.clone());
            while inner.history.len() > self.history_limit {
                inner.history.pop_front();
            }
        }

        inner.subscribers.retain(|id, tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(subscriber = id, "subscriber queue full, dropping subscriber");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(subscriber = id, "subscriber disconnected");
                false
            }
        });
    }

    /// Subscribes to events published after this call.
    pub fn subscribe(&self) -> EventStream {
        self.subscribe_inner(false)
    }

    /// Subscribes and replays the retained history first.
    ///
    /// Replayed events land in the same queue as live ones, so a consumer
    /// sees history followed by live events with no reordering. At most
    /// `queue_capacity` of the newest retained events are replayed.
    pub fn subscribe_with_history(&self) -> EventStream {
        self.subscribe_inner(true)
    }

    fn subscribe_inner(&self, with_history: bool) -> EventStream {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.queue_capacity);

        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if with_history {
            let skip = inner.history.len().saturating_sub(self.queue_capacity);
            for event in inner.history.iter().skip(skip) {
                if tx.try_send(event.clone()).is_err() {
                    break;
                }
            }
        }

        inner.subscribers.insert(id, tx);
        debug!(subscriber = id, with_history, "subscriber registered");
        EventStream { id, receiver: rx }
    }

    /// Removes a subscriber. Idempotent: unknown ids are ignored.
    pub fn unsubscribe(&self, id: u64) {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if inner.subscribers.remove(&id).is_some() {
            debug!(subscriber = id, "subscriber removed");
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        let inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.subscribers.len()
    }

    /// Snapshot of the retained history, oldest first.
    pub fn history(&self) -> Vec<Arc<Event>> {
        let inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.history.iter().cloned().collect()
    }

    /// Retained history filtered by kind and/or source.
    pub fn history_matching(
        &self,
        kind: Option<EventKind>,
        source_id: Option<&str>,
    ) -> Vec<Arc<Event>> {
        let inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner
            .history
            .iter()
            .filter(|event| kind.map_or(true, |k| event.event_type == k))
            .filter(|event| source_id.map_or(true, |s| event.source_id == s))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thinking(source: &str, chunk: &str) -> Event {
        Event::thinking(source, chunk)
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let bus = EventBus::default();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(thinking("security", "checking auth"));

        let got_a = a.recv().await.unwrap();
        let got_b = b.recv().await.unwrap();
        assert_eq!(got_a.payload["chunk"], "checking auth");
        assert_eq!(got_b.payload["chunk"], "checking auth");
    }

    #[tokio::test]
    async fn test_sequences_are_per_source_and_gapless() {
        let bus = EventBus::default();
        let mut stream = bus.subscribe();

        bus.publish(thinking("security", "a"));
        bus.publish(thinking("bug", "b"));
        bus.publish(thinking("security", "c"));
        bus.publish(thinking("security", "d"));

        let mut security = Vec::new();
        let mut bug = Vec::new();
        for _ in 0..4 {
            let event = stream.recv().await.unwrap();
            match event.source_id.as_str() {
                "security" => security.push(event.sequence),
                "bug" => bug.push(event.sequence),
                other => panic!("unexpected source {other}"),
            }
        }

        assert_eq!(security, vec![1, 2, 3]);
        assert_eq!(bug, vec![1]);
    }

    #[tokio::test]
    async fn test_late_subscriber_replays_history_then_live() {
        let bus = EventBus::default();
        bus.publish(thinking("security", "early-1"));
        bus.publish(thinking("security", "early-2"));

        let mut stream = bus.subscribe_with_history();
        bus.publish(thinking("security", "live"));

        let chunks: Vec<String> = {
            let mut out = Vec::new();
            for _ in 0..3 {
                let event = stream.recv().await.unwrap();
                out.push(event.payload["chunk"].as_str().unwrap().to_string());
            }
            out
        };
        assert_eq!(chunks, vec!["early-1", "early-2", "live"]);
    }

    #[tokio::test]
    async fn test_plain_subscribe_skips_history() {
        let bus = EventBus::default();
        bus.publish(thinking("security", "before"));

        let mut stream = bus.subscribe();
        bus.publish(thinking("security", "after"));

        let event = stream.recv().await.unwrap();
        assert_eq!(event.payload["chunk"], "after");
    }

    #[tokio::test]
    async fn test_slow_subscriber_is_dropped_not_blocking() {
        let bus = EventBus::new(2, 0);
        let _slow = bus.subscribe();
        let mut healthy = bus.subscribe();

        // Queue capacity is 2; the third publish overflows the idle
        // subscriber and removes it.
        bus.publish(thinking("security", "1"));
        bus.publish(thinking("security", "2"));

        // Drain the healthy stream so it has room.
        healthy.recv().await.unwrap();
        healthy.recv().await.unwrap();

        bus.publish(thinking("security", "3"));
        assert_eq!(bus.subscriber_count(), 1);

        let event = healthy.recv().await.unwrap();
        assert_eq!(event.payload["chunk"], "3");
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let bus = EventBus::default();
        let stream = bus.subscribe();
        let id = stream.id();
        assert_eq!(bus.subscriber_count(), 1);

        bus.unsubscribe(id);
        bus.unsubscribe(id);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_history_limit_evicts_oldest() {
        let bus = EventBus::new(16, 2);
        bus.publish(thinking("security", "1"));
        bus.publish(thinking("security", "2"));
        bus.publish(thinking("security", "3"));

        let history = bus.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].payload["chunk"], "2");
        assert_eq!(history[1].payload["chunk"], "3");
    }

    #[tokio::test]
    async fn test_history_filter_by_kind_and_source() {
        let bus = EventBus::default();
        bus.publish(thinking("security", "a"));
        bus.publish(Event::agent_started("bug", "scan"));
        bus.publish(thinking("bug", "b"));

        let thinking_only = bus.history_matching(Some(EventKind::Thinking), None);
        assert_eq!(thinking_only.len(), 2);

        let bug_only = bus.history_matching(None, Some("bug"));
        assert_eq!(bug_only.len(), 2);

        let bug_thinking = bus.history_matching(Some(EventKind::Thinking), Some("bug"));
        assert_eq!(bug_thinking.len(), 1);
        assert_eq!(bug_thinking[0].payload["chunk"], "b");
    }
}
