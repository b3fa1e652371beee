//! Trade-event fan-out.
//!
//! The transport that receives execution notifications lives outside the
//! core; whatever owns it publishes events here. Delivery is
//! at-most-once: each subscriber gets a bounded queue and a full queue
//! drops the event rather than blocking the producer. TTL-based cache
//! refresh is the correctness backstop for anything dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::engine::Account;
use crate::observability;

/// Execution notification pushed by the brokerage stream.
#[derive(Debug, Clone)]
pub struct TradeEvent {
    /// Account the execution belongs to.
    pub account_id: String,
    /// Instrument that traded.
    pub figi: String,
    /// Lots executed in this notification.
    pub executed_lots: i64,
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<TradeEvent>,
}

/// Receiving half of one subscription.
pub struct Subscription {
    /// Identifier for `unsubscribe`.
    pub id: u64,
    /// Bounded event queue.
    pub events: mpsc::Receiver<TradeEvent>,
}

/// Fan-out hub for trade events.
pub struct TradeEvents {
    subscribers: Mutex<Vec<Subscriber>>,
    capacity: usize,
    next_id: AtomicU64,
}

impl TradeEvents {
    /// Create a hub whose subscriber queues hold `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
        }
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new subscriber.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers().push(Subscriber { id, tx });
        Subscription { id, events: rx }
    }

    /// Remove a subscriber. Returns false when the id was not subscribed.
    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut subscribers = self.subscribers();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        let removed = subscribers.len() < before;
        if !removed {
            warn!(id, "unsubscribe without a matching subscription");
        }
        removed
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }

    /// Deliver an event to every subscriber without blocking.
    ///
    /// Subscribers whose receiver is gone are pruned; subscribers whose
    /// queue is full miss this event.
    pub fn publish(&self, event: &TradeEvent) {
        self.subscribers().retain(|subscriber| {
            match subscriber.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        account = %event.account_id,
                        figi = %event.figi,
                        "trade event queue full, dropping event"
                    );
                    observability::record_dropped_event();
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }
}

/// Subscribe an account to the hub: every event for the account
/// invalidates its observation cache, which in turn requests a tracking
/// pass. Ends when the subscription is removed or the hub is dropped.
pub fn spawn_invalidator(events: &TradeEvents, account: Arc<Account>) -> JoinHandle<()> {
    let mut subscription = events.subscribe();
    tokio::spawn(async move {
        while let Some(event) = subscription.events.recv().await {
            if event.account_id == account.id() {
                debug!(
                    account = %account.id(),
                    figi = %event.figi,
                    lots = event.executed_lots,
                    "trade event received, invalidating cache"
                );
                account.cache().invalidate().await;
            }
        }
    })
}
