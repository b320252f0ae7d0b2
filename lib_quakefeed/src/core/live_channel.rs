//! # Live Channel
//!
//! In-process fan-out for decoded live batches. The stream client and the
//! push receiver publish, the feed controller (and any observer) subscribes.
//!
//! Each batch is wrapped in an `Arc` once and every subscriber receives a
//! pointer to the same allocation. Subscribers whose receiver has been
//! dropped are pruned on the next publish.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::quakes::event_record::EventRecord;

/// Which live path delivered a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchOrigin {
    /// Server-sent event on the long-lived stream.
    Stream,
    /// Push data message handed over by the delivery mechanism.
    Push,
}

/// A decoded batch of events on its way to the reconciler.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveBatch {
    /// Channel the batch came in on.
    pub origin: BatchOrigin,
    /// Decoded records in payload order.
    pub events: Vec<EventRecord>,
    /// Wall-clock time the batch was decoded.
    pub received_at: DateTime<Utc>,
}

impl LiveBatch {
    /// Stamps a batch with the current time.
    pub fn new(origin: BatchOrigin, events: Vec<EventRecord>) -> Self {
        Self { origin, events, received_at: Utc::now() }
    }
}

struct Subscriber {
    name: String,
    sender: mpsc::UnboundedSender<Arc<LiveBatch>>,
}

/// # Live Channel
///
/// Cheap to clone: clones share the same subscriber list.
#[derive(Clone, Default)]
pub struct LiveChannel {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
}

impl std::fmt::Debug for LiveChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveChannel")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl LiveChannel {
    /// Creates a channel with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        // A panicking publisher cannot leave the list half-updated.
        self.subscribers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a subscriber and returns its receiving half.
    pub fn subscribe(&self, name: &str) -> mpsc::UnboundedReceiver<Arc<LiveBatch>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(Subscriber { name: name.to_string(), sender: tx });
        log::debug!("Live channel subscriber '{}' registered", name);
        rx
    }

    /// # Publish
    ///
    /// Delivers a batch to every live subscriber and returns how many got it.
    /// Empty batches are not delivered.
    pub fn publish(&self, batch: LiveBatch) -> usize {
        if batch.events.is_empty() {
            log::debug!("Skipping empty {:?} batch", batch.origin);
            return 0;
        }

        let batch = Arc::new(batch);
        let mut subscribers = self.lock();
        subscribers.retain(|sub| match sub.sender.send(Arc::clone(&batch)) {
            Ok(()) => true,
            Err(_) => {
                log::info!("Live channel subscriber '{}' went away", sub.name);
                false
            }
        });

        log::debug!(
            "Published {} {:?} event(s) to {} subscriber(s)",
            batch.events.len(),
            batch.origin,
            subscribers.len()
        );
        subscribers.len()
    }

    /// Number of registered subscribers (dead ones are only noticed on publish).
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn ev(id: &str) -> EventRecord {
        EventRecord {
            id: id.into(),
            occurred_at: DateTime::parse_from_rfc3339("2024-06-01T00:00:00Z").unwrap(),
            latitude: 0.0,
            longitude: 0.0,
            magnitude: 4.0,
            depth_km: 5.0,
            place: String::new(),
            source: String::new(),
        }
    }

    #[tokio::test]
    async fn every_subscriber_shares_one_allocation() {
        let channel = LiveChannel::new();
        let mut a = channel.subscribe("a");
        let mut b = channel.clone().subscribe("b");

        assert_eq!(channel.publish(LiveBatch::new(BatchOrigin::Push, vec![ev("1")])), 2);

        let got_a = a.recv().await.unwrap();
        let got_b = b.recv().await.unwrap();
        assert!(Arc::ptr_eq(&got_a, &got_b));
        assert_eq!(got_a.origin, BatchOrigin::Push);
    }

    #[tokio::test]
    async fn dropped_receivers_are_pruned() {
        let channel = LiveChannel::new();
        let keep = channel.subscribe("keep");
        drop(channel.subscribe("gone"));
        assert_eq!(channel.subscriber_count(), 2);

        assert_eq!(channel.publish(LiveBatch::new(BatchOrigin::Stream, vec![ev("1")])), 1);
        assert_eq!(channel.subscriber_count(), 1);
        drop(keep);
    }

    #[test]
    fn empty_batches_are_not_delivered() {
        let channel = LiveChannel::new();
        let mut rx = channel.subscribe("x");
        assert_eq!(channel.publish(LiveBatch::new(BatchOrigin::Stream, vec![])), 0);
        assert!(rx.try_recv().is_err());
    }
}
