//! Short-TTL observation cache for orders and positions.
//!
//! The tracking loop never queries the broker directly for account state;
//! every read goes through this cache. Entries age out after a configured
//! live time, are invalidated eagerly when the engine mutates orders or a
//! trade event arrives, and re-arm a self-expiry timer on every successful
//! refresh so the loop re-evaluates even without external activity.

use std::sync::{Arc, Weak};

use tokio::sync::{Notify, RwLock};
use tokio::time::{Duration, Instant, sleep};
use tracing::{debug, warn};

use crate::broker::{BrokerAdapter, BrokerError};
use crate::config::TrackingConfig;
use crate::models::{Order, Positions};
use crate::observability;

#[derive(Debug, Clone, Copy)]
enum SlotKind {
    Orders,
    Positions,
}

#[derive(Debug)]
struct Slot<T> {
    value: Option<T>,
    fetched_at: Option<Instant>,
    /// Bumped on every store and every staleness mark. An expiry timer
    /// only fires for the epoch it was armed against, so timers superseded
    /// by a newer refresh or an eager invalidation wake up and do nothing.
    epoch: u64,
}

impl<T: Clone> Slot<T> {
    const fn new() -> Self {
        Self {
            value: None,
            fetched_at: None,
            epoch: 0,
        }
    }

    fn fresh_value(&self, ttl: Duration) -> Option<T> {
        let fetched_at = self.fetched_at?;
        if fetched_at.elapsed() <= ttl {
            self.value.clone()
        } else {
            None
        }
    }

    fn store(&mut self, value: T) -> u64 {
        self.value = Some(value);
        self.fetched_at = Some(Instant::now());
        self.epoch += 1;
        self.epoch
    }

    fn mark_stale(&mut self) {
        self.fetched_at = None;
        self.epoch += 1;
    }
}

/// Mutation-invalidated cache of one account's orders and positions.
pub struct AccountCache {
    account_id: String,
    broker: Arc<dyn BrokerAdapter>,
    orders: RwLock<Slot<Vec<Order>>>,
    positions: RwLock<Slot<Positions>>,
    orders_ttl: Duration,
    positions_ttl: Duration,
    /// One permit per pending tracking pass; the account's driver task
    /// consumes it. Multiple invalidations between passes collapse.
    pass_trigger: Notify,
    /// Self-reference handed to expiry timer tasks, so a timer outliving
    /// the cache wakes up into nothing.
    weak_self: Weak<Self>,
}

impl AccountCache {
    pub(crate) fn new(
        account_id: impl Into<String>,
        broker: Arc<dyn BrokerAdapter>,
        config: &TrackingConfig,
    ) -> Arc<Self> {
        let account_id = account_id.into();
        Arc::new_cyclic(|weak_self| Self {
            account_id,
            broker,
            orders: RwLock::new(Slot::new()),
            positions: RwLock::new(Slot::new()),
            orders_ttl: config.orders_ttl(),
            positions_ttl: config.positions_ttl(),
            pass_trigger: Notify::new(),
            weak_self: weak_self.clone(),
        })
    }

    pub(crate) fn pass_trigger(&self) -> &Notify {
        &self.pass_trigger
    }

    /// Current open orders, refreshed through the broker when stale.
    ///
    /// Freshness is checked under the shared section; a refresh holds the
    /// exclusive section, so readers arriving mid-refresh block behind it
    /// and reuse its result instead of issuing duplicate queries.
    pub async fn orders(&self) -> Result<Vec<Order>, BrokerError> {
        {
            let slot = self.orders.read().await;
            if let Some(orders) = slot.fresh_value(self.orders_ttl) {
                return Ok(orders);
            }
        }

        let mut slot = self.orders.write().await;
        if let Some(orders) = slot.fresh_value(self.orders_ttl) {
            return Ok(orders);
        }

        let orders = self.broker.open_orders(&self.account_id).await?;
        let epoch = slot.store(orders.clone());
        drop(slot);
        self.arm_expiry(SlotKind::Orders, epoch, self.orders_ttl);
        Ok(orders)
    }

    /// Current positions, refreshed through the broker when stale.
    pub async fn positions(&self) -> Result<Positions, BrokerError> {
        {
            let slot = self.positions.read().await;
            if let Some(positions) = slot.fresh_value(self.positions_ttl) {
                return Ok(positions);
            }
        }

        let mut slot = self.positions.write().await;
        if let Some(positions) = slot.fresh_value(self.positions_ttl) {
            return Ok(positions);
        }

        let positions = self.broker.positions(&self.account_id).await?;
        for position in positions.positions.values() {
            observability::record_observed(
                &self.account_id,
                &position.figi,
                position.effective_units(),
            );
        }
        let epoch = slot.store(positions.clone());
        drop(slot);
        self.arm_expiry(SlotKind::Positions, epoch, self.positions_ttl);
        Ok(positions)
    }

    /// Settled balance for an instrument; 0 when unknown or unreadable.
    pub async fn balance(&self, figi: &str) -> i64 {
        match self.positions().await {
            Ok(positions) => positions.get(figi).map_or(0, |p| p.balance),
            Err(error) => {
                warn!(account = %self.account_id, %error, "balance read failed");
                0
            }
        }
    }

    /// Sell-reserved units for an instrument; 0 when unknown or unreadable.
    pub async fn blocked(&self, figi: &str) -> i64 {
        match self.positions().await {
            Ok(positions) => positions.get(figi).map_or(0, |p| p.blocked),
            Err(error) => {
                warn!(account = %self.account_id, %error, "blocked read failed");
                0
            }
        }
    }

    /// Force the next read to refresh and request one tracking pass.
    ///
    /// This is the sole path coupling external trade events to the loop.
    pub async fn invalidate(&self) {
        debug!(account = %self.account_id, "cache invalidated");
        self.orders.write().await.mark_stale();
        self.positions.write().await.mark_stale();
        self.pass_trigger.notify_one();
    }

    /// Freshness mutation only — used by the loop itself after placing or
    /// cancelling, where triggering another pass would be redundant.
    pub(crate) async fn mark_stale(&self) {
        self.orders.write().await.mark_stale();
        self.positions.write().await.mark_stale();
    }

    fn arm_expiry(&self, kind: SlotKind, epoch: u64, ttl: Duration) {
        let cache = self.weak_self.clone();
        tokio::spawn(async move {
            sleep(ttl).await;
            let Some(cache) = cache.upgrade() else { return };
            let current = match kind {
                SlotKind::Orders => cache.orders.read().await.epoch,
                SlotKind::Positions => cache.positions.read().await.epoch,
            };
            if current == epoch {
                debug!(account = %cache.account_id, ?kind, "live time expired");
                cache.invalidate().await;
            }
        });
    }
}
