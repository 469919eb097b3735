// crates/server/src/jobs/hub.rs
//! In-memory publish/subscribe router for job log lines.
//!
//! One producer (the job's output reader) fans out to any number of SSE
//! observers. Each job id owns a bounded replay buffer of the most recent
//! lines plus the set of currently registered subscriber queues. Entries are
//! created lazily and live for the process lifetime.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use tokio::sync::mpsc;

/// Lines of replay buffer kept per job.
const DEFAULT_BUFFER_SIZE: usize = 200;
/// Capacity of each subscriber queue. A full queue drops lines for that
/// subscriber only — the producer is never blocked by a slow reader.
const SUBSCRIBER_QUEUE_CAPACITY: usize = 1000;

struct Subscriber {
    token: u64,
    tx: mpsc::Sender<String>,
}

#[derive(Default)]
struct HubEntry {
    buffer: VecDeque<String>,
    subscribers: Vec<Subscriber>,
    next_token: u64,
}

/// A live subscription: the queue to drain, the replay snapshot taken at
/// registration time (no line is missing from both), and the token used to
/// unsubscribe.
pub struct Subscription {
    pub token: u64,
    pub rx: mpsc::Receiver<String>,
    pub replay: Vec<String>,
}

/// Thread-safe log fan-out keyed by job id.
pub struct LogHub {
    inner: Mutex<HashMap<String, HubEntry>>,
    buffer_size: usize,
}

impl LogHub {
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            buffer_size,
        }
    }

    /// Append `line` to the job's replay buffer (oldest evicted first) and
    /// offer it to every registered subscriber without blocking.
    pub fn publish(&self, job_id: &str, line: &str) {
        let senders: Vec<mpsc::Sender<String>> = {
            let mut map = match self.inner.lock() {
                Ok(guard) => guard,
                Err(e) => {
                    tracing::error!("log hub lock poisoned on publish: {e}");
                    return;
                }
            };
            let entry = map.entry(job_id.to_string()).or_default();
            if entry.buffer.len() == self.buffer_size {
                entry.buffer.pop_front();
            }
            entry.buffer.push_back(line.to_string());
            entry.subscribers.iter().map(|s| s.tx.clone()).collect()
        };

        for tx in senders {
            // Full queue: skip this line for that subscriber.
            let _ = tx.try_send(line.to_string());
        }
    }

    /// Register a new subscriber queue and snapshot the replay buffer under
    /// one lock, so nothing published afterwards can fall between them.
    pub fn subscribe(&self, job_id: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        let (token, replay) = {
            let mut map = match self.inner.lock() {
                Ok(guard) => guard,
                Err(e) => {
                    tracing::error!("log hub lock poisoned on subscribe: {e}");
                    return Subscription {
                        token: 0,
                        rx,
                        replay: Vec::new(),
                    };
                }
            };
            let entry = map.entry(job_id.to_string()).or_default();
            let token = entry.next_token;
            entry.next_token += 1;
            entry.subscribers.push(Subscriber { token, tx });
            (token, entry.buffer.iter().cloned().collect())
        };
        Subscription { token, rx, replay }
    }

    /// Remove one subscriber queue. Safe to call more than once.
    pub fn unsubscribe(&self, job_id: &str, token: u64) {
        let mut map = match self.inner.lock() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::error!("log hub lock poisoned on unsubscribe: {e}");
                return;
            }
        };
        if let Some(entry) = map.get_mut(job_id) {
            entry.subscribers.retain(|s| s.token != token);
        }
    }

    /// Number of currently registered subscribers for a job.
    pub fn subscriber_count(&self, job_id: &str) -> usize {
        match self.inner.lock() {
            Ok(map) => map.get(job_id).map(|e| e.subscribers.len()).unwrap_or(0),
            Err(e) => {
                tracing::error!("log hub lock poisoned: {e}");
                0
            }
        }
    }
}

impl Default for LogHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn publish_then_subscribe_replays_buffer() {
        let hub = LogHub::with_buffer_size(8);
        hub.publish("job1", "line1");
        hub.publish("job1", "line2");

        let sub = hub.subscribe("job1");
        assert_eq!(sub.replay, vec!["line1".to_string(), "line2".to_string()]);
    }

    #[tokio::test]
    async fn subscribe_then_publish_delivers_live() {
        let hub = LogHub::new();
        let mut sub = hub.subscribe("job1");
        assert!(sub.replay.is_empty());

        hub.publish("job1", "line1");
        hub.publish("job1", "line2");
        hub.publish("job1", "line3");

        assert_eq!(sub.rx.try_recv().unwrap(), "line1");
        assert_eq!(sub.rx.try_recv().unwrap(), "line2");
        assert_eq!(sub.rx.try_recv().unwrap(), "line3");
        assert!(sub.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn buffer_evicts_oldest_first() {
        let hub = LogHub::with_buffer_size(1);
        hub.publish("job2", "first");
        hub.publish("job2", "second");

        let sub = hub.subscribe("job2");
        assert_eq!(sub.replay, vec!["second".to_string()]);
    }

    #[tokio::test]
    async fn jobs_are_isolated() {
        let hub = LogHub::new();
        hub.publish("a", "for-a");
        hub.publish("b", "for-b");

        let sub_a = hub.subscribe("a");
        let sub_b = hub.subscribe("b");
        assert_eq!(sub_a.replay, vec!["for-a".to_string()]);
        assert_eq!(sub_b.replay, vec!["for-b".to_string()]);
    }

    #[tokio::test]
    async fn slow_consumer_drops_lines_without_blocking() {
        let hub = LogHub::new();
        let mut sub = hub.subscribe("job3");

        // Publish past the queue capacity; publish must never block.
        for i in 0..(SUBSCRIBER_QUEUE_CAPACITY + 50) {
            hub.publish("job3", &format!("line{i}"));
        }

        let mut received = 0usize;
        while sub.rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, SUBSCRIBER_QUEUE_CAPACITY);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let hub = LogHub::new();
        let sub = hub.subscribe("job4");
        assert_eq!(hub.subscriber_count("job4"), 1);

        hub.unsubscribe("job4", sub.token);
        hub.unsubscribe("job4", sub.token);
        assert_eq!(hub.subscriber_count("job4"), 0);

        // Unknown job id is a no-op.
        hub.unsubscribe("never-seen", 7);
    }

    #[tokio::test]
    async fn two_subscribers_each_get_their_own_stream() {
        let hub = LogHub::new();
        let mut one = hub.subscribe("job5");
        let mut two = hub.subscribe("job5");

        hub.publish("job5", "hello");

        assert_eq!(one.rx.try_recv().unwrap(), "hello");
        assert_eq!(two.rx.try_recv().unwrap(), "hello");
    }
}
