//! C3: the stream bus (spec.md §4.3).
//!
//! Named streams are `(namespace, org_id)` pairs. Delivery is at-least-once
//! *to subscribers that keep up*; a generously sized broadcast buffer
//! approximates durability, and the spec explicitly accepts that a lagging
//! or newly-(re)activated observer tolerates missed events by reconciling
//! through idempotency or periodic scan (spec.md §4.3) rather than relying
//! on the bus to replay history. Grounded in the teacher's use of
//! `tokio::sync::broadcast` in `main.rs` for its WebSocket fan-out.

pub mod events;

pub use events::*;

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::{debug, warn};

const DEFAULT_CAPACITY: usize = 4096;

/// Sink interface an observer actor implements (spec.md §4.3:
/// `onNext`/`onCompleted`/`onError`).
#[async_trait]
pub trait StreamObserver: Send + Sync {
    async fn on_next(&self, event: StreamEvent);
    async fn on_completed(&self) {}
    async fn on_error(&self, _err: &str) {}
}

pub struct StreamBus {
    topics: RwLock<HashMap<String, broadcast::Sender<StreamEvent>>>,
    capacity: usize,
}

impl StreamBus {
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            capacity: DEFAULT_CAPACITY,
        }
    }

    fn topic_key(namespace: &str, org_id: &str) -> String {
        format!("{namespace}:{org_id}")
    }

    fn sender_for(&self, namespace: &str, org_id: &str) -> broadcast::Sender<StreamEvent> {
        let key = Self::topic_key(namespace, org_id);
        if let Some(sender) = self.topics.read().get(&key) {
            return sender.clone();
        }
        let mut topics = self.topics.write();
        topics
            .entry(key)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Publish failures never roll back committed aggregate state
    /// (spec.md §4.3, §5) — there simply is no failure mode here besides
    /// "no subscribers yet", which `send` reports as an `Err` that the
    /// caller should log and ignore.
    pub fn publish(&self, event: StreamEvent) {
        let sender = self.sender_for(event.namespace(), event.org_id());
        if sender.send(event.clone()).is_err() {
            debug!(namespace = event.namespace(), "stream publish: no subscribers");
        }
    }

    pub fn subscribe(&self, namespace: &str, org_id: &str) -> broadcast::Receiver<StreamEvent> {
        self.sender_for(namespace, org_id).subscribe()
    }

    /// Drive a `StreamObserver` from a subscription until the bus is
    /// dropped. Callers invoke this again in their `onActivate` after
    /// reactivation (spec.md §4.3): subscriptions are not durable across
    /// process restarts, only within a running bus.
    pub fn drive<O: StreamObserver + 'static>(
        &self,
        namespace: &str,
        org_id: &str,
        observer: std::sync::Arc<O>,
    ) -> tokio::task::JoinHandle<()> {
        let mut rx = self.subscribe(namespace, org_id);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => observer.on_next(event).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "stream subscriber lagged, events dropped");
                        observer.on_error("lagged").await;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        observer.on_completed().await;
                        break;
                    }
                }
            }
        })
    }
}

impl Default for StreamBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingObserver(Arc<AtomicUsize>);

    #[async_trait]
    impl StreamObserver for CountingObserver {
        async fn on_next(&self, _event: StreamEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn subscriber_receives_published_events() {
        let bus = StreamBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let observer = Arc::new(CountingObserver(count.clone()));
        let handle = bus.drive("order-events", "org1", observer);

        bus.publish(StreamEvent::Order(OrderStreamEvent {
            org_id: "org1".to_string(),
            site_id: "site1".to_string(),
            order_id: uuid::Uuid::new_v4(),
            at: Utc::now(),
            kind: OrderStreamKind::Completed {
                tse_id: "tse1".to_string(),
                process_type: "Kassenbeleg".to_string(),
                gross_amount: 10.0,
                net_amounts: vec![("NORMAL".to_string(), 8.4)],
                tax_amounts: vec![("NORMAL".to_string(), 1.6)],
                payment_types: vec![("CASH".to_string(), 10.0)],
            },
        }));

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        handle.abort();
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_error_out() {
        let bus = StreamBus::new();
        bus.publish(StreamEvent::Order(OrderStreamEvent {
            org_id: "org1".to_string(),
            site_id: "site1".to_string(),
            order_id: uuid::Uuid::new_v4(),
            at: Utc::now(),
            kind: OrderStreamKind::Voided,
        }));
    }
}
