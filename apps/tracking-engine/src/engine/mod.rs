//! Target registry and the tracking loop.
//!
//! Strategies declare the position they want; the loop steers the
//! network-observed position toward it. One pass compares desired state
//! against the cached observations and issues at most one corrective
//! placement per instrument, cancelling outstanding orders first: partial
//! corrections are not trusted once the gap has shifted, and the extra
//! order churn buys convergence toward a single known quantity.

mod target;

pub use target::{StrategyHandle, TargetHandle};

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::{BrokerAdapter, BrokerError};
use crate::cache::AccountCache;
use crate::config::TrackingConfig;
use crate::error::TrackingError;
use crate::models::{Instrument, Order, OrderSide, Positions, lots_in_orders};
use crate::observability;

use target::{TargetCell, TargetData, lock_cell};

/// Result of a best-price placement. An explicit variant replaces the
/// "no orders needed" sentinel so callers never compare against one.
#[derive(Debug, Clone)]
pub enum Placement {
    /// A corrective order was placed.
    Placed(Order),
    /// The requested quantity was zero; nothing to place.
    NotNeeded,
}

/// What one pass decided for one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentOutcome {
    /// A recent correction has not had time to become observable.
    Stabilizing,
    /// Observed position matches the target and no orders are resting.
    Converged,
    /// Resting orders already account for the remaining gap.
    InFlight,
    /// A resting order went stale and was cancelled for re-pricing.
    Repriced,
    /// Orders were cancelled and/or a corrective order was placed.
    Corrected,
    /// A gap exists but placement is suspended by a permanent limit error
    /// or because the venue rejects limit orders for the instrument.
    Suspended,
    /// A broker operation failed; recorded on the target, retried next
    /// pass.
    Failed,
}

impl InstrumentOutcome {
    /// Metric label for this outcome.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stabilizing => "stabilizing",
            Self::Converged => "converged",
            Self::InFlight => "in_flight",
            Self::Repriced => "repriced",
            Self::Corrected => "corrected",
            Self::Suspended => "suspended",
            Self::Failed => "failed",
        }
    }
}

/// Summary of one tracking pass.
#[derive(Debug, Default)]
pub struct PassReport {
    /// True when the pass acquired the account section and evaluated its
    /// targets. False means another pass was already running, or the
    /// observations were unavailable this iteration.
    pub ran: bool,
    /// Outcome per evaluated instrument.
    pub outcomes: HashMap<String, InstrumentOutcome>,
}

/// One brokerage account: the target registry, the observation cache and
/// the tracking loop over them.
///
/// The registry and the loop share a single exclusive section, so setting
/// a target and running a pass are mutually exclusive. A pass that cannot
/// acquire the section silently no-ops; any pending condition re-triggers
/// through the next cache invalidation or TTL expiry.
pub struct Account {
    id: String,
    broker: Arc<dyn BrokerAdapter>,
    cache: Arc<AccountCache>,
    targets: Mutex<HashMap<String, TargetCell>>,
    config: TrackingConfig,
}

impl Account {
    /// Create an account and spawn its pass driver.
    ///
    /// The driver runs one tracking pass per cache invalidation, whether
    /// the invalidation came from a trade event, a TTL expiry or an
    /// explicit call.
    ///
    /// # Panics
    ///
    /// Panics if `id` is empty.
    pub fn new(
        id: impl Into<String>,
        broker: Arc<dyn BrokerAdapter>,
        config: TrackingConfig,
    ) -> Arc<Self> {
        let id = id.into();
        assert!(!id.is_empty(), "account id must not be empty");

        let cache = AccountCache::new(id.clone(), Arc::clone(&broker), &config);
        let account = Arc::new(Self {
            id,
            broker,
            cache,
            targets: Mutex::new(HashMap::new()),
            config,
        });
        Self::spawn_pass_driver(&account);
        account
    }

    /// Account identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The account's observation cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<AccountCache> {
        &self.cache
    }

    fn spawn_pass_driver(account: &Arc<Self>) {
        let cache = Arc::clone(&account.cache);
        let account = Arc::downgrade(account);
        tokio::spawn(async move {
            loop {
                cache.pass_trigger().notified().await;
                let Some(account) = account.upgrade() else { break };
                account.run_tracking_pass().await;
            }
        });
    }

    /// Declare the position a strategy wants, improving the best price by
    /// the instrument's own minimum step.
    pub async fn set_target(
        &self,
        strategy: Arc<dyn StrategyHandle>,
        instrument: &Instrument,
        desired_lots: i64,
    ) -> TargetHandle {
        let increment = instrument.min_price_increment;
        self.set_target_with_increment(strategy, instrument, desired_lots, increment)
            .await
    }

    /// Declare the position a strategy wants, with an explicit price
    /// improvement over the best quote.
    ///
    /// Only one strategy may drive an instrument at a time: a different
    /// strategy is rejected with a conflict error while the owner's
    /// desired size is non-zero, and adopts the target once the owner has
    /// released it at zero. Re-declaring unchanged values is a no-op;
    /// otherwise one tracking pass runs synchronously before returning.
    pub async fn set_target_with_increment(
        &self,
        strategy: Arc<dyn StrategyHandle>,
        instrument: &Instrument,
        desired_lots: i64,
        price_increment: Decimal,
    ) -> TargetHandle {
        observability::record_target(&instrument.figi, strategy.name(), desired_lots);

        let (cell, run_pass) = {
            let mut targets = self.targets.lock().await;
            match targets.entry(instrument.figi.clone()) {
                Entry::Occupied(entry) => {
                    let cell = Arc::clone(entry.get());
                    let mut data = lock_cell(&cell);
                    if data.strategy.name() != strategy.name() {
                        if data.desired_lots != 0 {
                            warn!(
                                account = %self.id,
                                figi = %instrument.figi,
                                owner = %data.strategy.name(),
                                contender = %strategy.name(),
                                "two strategies on one instrument"
                            );
                            let owner = data.strategy.name().to_string();
                            data.record_error(TrackingError::Conflict {
                                figi: instrument.figi.clone(),
                                owner,
                                contender: strategy.name().to_string(),
                            });
                            drop(data);
                            return TargetHandle::new(cell);
                        }
                        // Owner released the instrument at zero lots; the
                        // new strategy takes it over.
                        data.strategy = strategy;
                    }
                    if data.desired_lots == desired_lots && data.price_increment == price_increment
                    {
                        drop(data);
                        (cell, false)
                    } else {
                        data.desired_lots = desired_lots;
                        data.price_increment = price_increment;
                        drop(data);
                        (cell, true)
                    }
                }
                Entry::Vacant(entry) => {
                    let cell: TargetCell = Arc::new(std::sync::Mutex::new(TargetData::new(
                        strategy,
                        instrument.clone(),
                        desired_lots,
                        price_increment,
                    )));
                    entry.insert(Arc::clone(&cell));
                    (cell, true)
                }
            }
        };

        if run_pass {
            self.run_tracking_pass().await;
        }
        TargetHandle::new(cell)
    }

    /// Run one tracking pass over every target on this account.
    ///
    /// Single-flight: failing to acquire the account section is not an
    /// error, it means a pass is already running against the same inputs.
    pub async fn run_tracking_pass(&self) -> PassReport {
        let Ok(targets) = self.targets.try_lock() else {
            debug!(account = %self.id, "tracking pass already in flight");
            return PassReport::default();
        };

        let positions = match self.cache.positions().await {
            Ok(positions) => positions,
            Err(error) => {
                warn!(account = %self.id, %error, "positions unavailable, skipping pass");
                return PassReport::default();
            }
        };
        let orders = match self.cache.orders().await {
            Ok(orders) => orders,
            Err(error) => {
                warn!(account = %self.id, %error, "orders unavailable, skipping pass");
                return PassReport::default();
            }
        };

        let in_flight = lots_in_orders(&orders);
        let mut report = PassReport {
            ran: true,
            outcomes: HashMap::with_capacity(targets.len()),
        };

        for (figi, cell) in targets.iter() {
            let lots_in_flight = in_flight.get(figi).copied().unwrap_or(0);
            let outcome = self
                .track_instrument(figi, cell, &positions, &orders, lots_in_flight)
                .await;
            observability::record_outcome(&self.id, outcome.as_str());
            report.outcomes.insert(figi.clone(), outcome);
        }

        debug!(
            account = %self.id,
            instruments = report.outcomes.len(),
            "tracking pass completed"
        );
        report
    }

    async fn track_instrument(
        &self,
        figi: &str,
        cell: &TargetCell,
        positions: &Positions,
        orders: &[Order],
        lots_in_flight: i64,
    ) -> InstrumentOutcome {
        // Snapshot under the cell lock; every network call below happens
        // with the lock released.
        let (desired, increment, suspended, instrument) = {
            let data = lock_cell(cell);
            if data.is_stabilizing() {
                return InstrumentOutcome::Stabilizing;
            }
            (
                data.desired_lots,
                data.price_increment,
                data.limit_suspended,
                data.instrument.clone(),
            )
        };

        let position_lots = positions.effective_units(figi) / instrument.lot;

        if lots_in_flight == 0 && position_lots == desired {
            return InstrumentOutcome::Converged;
        }

        if position_lots + lots_in_flight != desired {
            self.correct_gap(CorrectGap {
                figi,
                cell,
                instrument: &instrument,
                desired,
                position_lots,
                increment,
                suspended,
                orders,
            })
            .await
        } else {
            self.evict_stale_orders(figi, cell, orders).await
        }
    }

    async fn correct_gap(&self, ctx: CorrectGap<'_>) -> InstrumentOutcome {
        let mut failed = false;

        // The gap went stale underneath any outstanding attempt; cancel
        // everything resting on this instrument before re-posting.
        for order in ctx
            .orders
            .iter()
            .filter(|o| o.figi == ctx.figi && o.is_active())
        {
            lock_cell(ctx.cell).arm_stabilization(self.config.stabilization_window());
            if let Err(error) = self.broker.cancel_order(&self.id, &order.order_id).await {
                debug!(
                    account = %self.id,
                    order_id = %order.order_id,
                    %error,
                    "cancel failed"
                );
                lock_cell(ctx.cell).record_error(error.into());
                failed = true;
            }
            self.cache.mark_stale().await;
        }

        lock_cell(ctx.cell).arm_stabilization(self.config.stabilization_window());

        // Re-read the flag: a cancellation above may have tripped it.
        let suspended = ctx.suspended || lock_cell(ctx.cell).limit_suspended;
        if suspended || !ctx.instrument.limit_orders_allowed {
            debug!(
                account = %self.id,
                figi = %ctx.figi,
                suspended,
                "corrective placement suspended"
            );
            return if failed {
                InstrumentOutcome::Failed
            } else {
                InstrumentOutcome::Suspended
            };
        }

        match self
            .place_best_price(ctx.instrument, ctx.desired - ctx.position_lots, ctx.increment)
            .await
        {
            Ok(Placement::Placed(order)) => {
                self.cache.mark_stale().await;
                info!(
                    account = %self.id,
                    figi = %ctx.figi,
                    order_id = %order.order_id,
                    side = ?order.side,
                    lots = order.requested_lots,
                    price = %order.limit_price,
                    "corrective order placed"
                );
                if failed {
                    InstrumentOutcome::Failed
                } else {
                    InstrumentOutcome::Corrected
                }
            }
            Ok(Placement::NotNeeded) => {
                if failed {
                    InstrumentOutcome::Failed
                } else {
                    InstrumentOutcome::Corrected
                }
            }
            Err(error) => {
                warn!(
                    account = %self.id,
                    figi = %ctx.figi,
                    %error,
                    "corrective placement failed"
                );
                lock_cell(ctx.cell).record_error(error.into());
                InstrumentOutcome::Failed
            }
        }
    }

    /// Lots already match the target; cancel any order that has rested
    /// past the stale age and is no longer best-in-book, so a later pass
    /// re-posts it at the improved price.
    async fn evict_stale_orders(
        &self,
        figi: &str,
        cell: &TargetCell,
        orders: &[Order],
    ) -> InstrumentOutcome {
        let mut evicted = 0usize;
        let mut failed = false;
        let now = Utc::now();

        for order in orders.iter().filter(|o| o.figi == figi && o.is_active()) {
            let age = now
                .signed_duration_since(order.placed_at)
                .to_std()
                .unwrap_or_default();
            if age < self.config.stale_order_age() {
                continue;
            }
            if self.is_best_in_book(order).await {
                continue;
            }

            lock_cell(cell).arm_stabilization(self.config.stabilization_window());
            match self.broker.cancel_order(&self.id, &order.order_id).await {
                Ok(_) => {
                    evicted += 1;
                    info!(
                        account = %self.id,
                        figi = %figi,
                        order_id = %order.order_id,
                        price = %order.limit_price,
                        "stale order cancelled for re-pricing"
                    );
                }
                Err(error) => {
                    debug!(
                        account = %self.id,
                        order_id = %order.order_id,
                        %error,
                        "stale order cancel failed"
                    );
                    lock_cell(cell).record_error(error.into());
                    failed = true;
                }
            }
            self.cache.mark_stale().await;
        }

        if failed {
            InstrumentOutcome::Failed
        } else if evicted > 0 {
            InstrumentOutcome::Repriced
        } else if orders
            .iter()
            .any(|o| o.figi == figi && o.is_active())
        {
            InstrumentOutcome::InFlight
        } else {
            InstrumentOutcome::Converged
        }
    }

    /// An order is best-in-book while its limit is at least as aggressive
    /// as the current best opposing quote. Unknown books count as not
    /// best.
    async fn is_best_in_book(&self, order: &Order) -> bool {
        let top = match self.broker.top_of_book(&order.figi).await {
            Ok(top) => top,
            Err(error) => {
                warn!(figi = %order.figi, %error, "book unavailable for staleness check");
                return false;
            }
        };
        match order.side {
            OrderSide::Buy => top.bid.is_some_and(|bid| order.limit_price >= bid),
            OrderSide::Sell => top.ask.is_some_and(|ask| order.limit_price <= ask),
        }
    }

    /// Place one limit order at the best quote improved by
    /// `price_increment`: buys improve the bid upward, sells improve the
    /// ask downward. A positive quantity buys, a negative one sells, zero
    /// is a no-op.
    pub async fn place_best_price(
        &self,
        instrument: &Instrument,
        quantity: i64,
        price_increment: Decimal,
    ) -> Result<Placement, BrokerError> {
        if quantity == 0 {
            debug!(figi = %instrument.figi, "zero quantity, nothing to place");
            return Ok(Placement::NotNeeded);
        }

        let top = self.broker.top_of_book(&instrument.figi).await?;
        let (side, lots, price) = if quantity > 0 {
            (
                OrderSide::Buy,
                quantity,
                top.bid.map(|bid| bid + price_increment),
            )
        } else {
            (
                OrderSide::Sell,
                -quantity,
                top.ask.map(|ask| ask - price_increment),
            )
        };
        let Some(price) = price else {
            warn!(figi = %instrument.figi, ?side, "book side empty, no quotable price");
            return Err(BrokerError::NoQuotablePrice {
                figi: instrument.figi.clone(),
            });
        };

        let order = self
            .broker
            .place_order(
                &self.id,
                &instrument.figi,
                side,
                lots,
                price,
                &Uuid::new_v4().to_string(),
            )
            .await?;
        Ok(Placement::Placed(order))
    }
}

/// Arguments for one gap correction, bundled to keep the call site flat.
struct CorrectGap<'a> {
    figi: &'a str,
    cell: &'a TargetCell,
    instrument: &'a Instrument,
    desired: i64,
    position_lots: i64,
    increment: Decimal,
    suspended: bool,
    orders: &'a [Order],
}
