//! Fan-out of store events to subscribers.

use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use super::types::{
    DropReason, StoreEvent, SubscriptionConfig, SubscriptionFilter, SubscriptionHandle,
    SubscriptionId,
};

struct Subscriber {
    filter: SubscriptionFilter,
    sender: Sender<StoreEvent>,
}

impl Subscriber {
    /// Deliver the matching part of `batch` in order.
    ///
    /// Stops at the first event that cannot be queued; the caller then
    /// drops the subscriber.
    fn deliver(&self, batch: &[StoreEvent]) -> Result<(), DropReason> {
        for event in batch.iter().filter(|e| self.filter.matches(e)) {
            match self.sender.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => return Err(DropReason::BufferOverflow),
                Err(TrySendError::Disconnected(_)) => return Err(DropReason::Unsubscribed),
            }
        }
        Ok(())
    }

    fn notify_dropped(&self, reason: DropReason) {
        // The buffer may be full; the notice is best effort.
        let _ = self.sender.try_send(StoreEvent::Dropped { reason });
    }
}

/// Registry of live subscribers.
///
/// Subscribers that fall behind (full buffer) or whose handle was dropped
/// are removed during the broadcast that notices it.
pub struct SubscriptionManager {
    subscribers: RwLock<HashMap<SubscriptionId, Subscriber>>,
    next_id: AtomicU64,
    /// Subscribers removed for falling behind.
    overflowed: AtomicU64,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            overflowed: AtomicU64::new(0),
        }
    }

    /// Register a subscriber. A zero buffer size is treated as one.
    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(config.buffer_size.max(1));

        self.subscribers.write().insert(
            id,
            Subscriber {
                filter: config.filter,
                sender,
            },
        );
        debug!(subscription = id.0, "subscribed");

        SubscriptionHandle { id, receiver }
    }

    /// Remove a subscriber, sending it a final `Dropped` notice.
    ///
    /// Returns false if the id was unknown (or already dropped).
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        match self.subscribers.write().remove(&id) {
            Some(subscriber) => {
                subscriber.notify_dropped(DropReason::Unsubscribed);
                true
            }
            None => false,
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Number of subscribers dropped because their buffer filled up.
    pub fn overflow_count(&self) -> u64 {
        self.overflowed.load(Ordering::SeqCst)
    }

    /// Deliver one operation's events, in order, to every matching subscriber.
    pub fn broadcast_all(&self, events: impl IntoIterator<Item = StoreEvent>) {
        let batch: Vec<StoreEvent> = events.into_iter().collect();
        if batch.is_empty() {
            return;
        }

        let failed: Vec<(SubscriptionId, DropReason)> = self
            .subscribers
            .read()
            .iter()
            .filter_map(|(id, sub)| sub.deliver(&batch).err().map(|reason| (*id, reason)))
            .collect();
        if failed.is_empty() {
            return;
        }

        let mut subscribers = self.subscribers.write();
        for (id, reason) in failed {
            let Some(subscriber) = subscribers.remove(&id) else {
                continue;
            };
            if reason == DropReason::BufferOverflow {
                self.overflowed.fetch_add(1, Ordering::SeqCst);
                debug!(subscription = id.0, "dropping slow subscriber");
                subscriber.notify_dropped(reason);
            }
        }
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}
