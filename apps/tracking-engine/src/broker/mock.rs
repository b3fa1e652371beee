//! Simulated broker adapter.
//!
//! Returns canned responses without network calls and lets tests script
//! the remote side: seed positions and quotes, fill resting orders, inject
//! failures, and count queries to assert cache behavior.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::time::{Duration, sleep};

use crate::models::{Order, OrderSide, OrderStatus, Position, Positions, TopOfBook};

use super::{BrokerAdapter, BrokerError};

#[derive(Debug, Default)]
struct MockState {
    book: HashMap<String, TopOfBook>,
    lot_sizes: HashMap<String, i64>,
    orders: Vec<Order>,
    positions: HashMap<String, Position>,
    place_failure: Option<BrokerError>,
    cancel_failure: Option<BrokerError>,
    query_failure: Option<BrokerError>,
    latency: Option<Duration>,
    open_orders_calls: u64,
    positions_calls: u64,
    cancelled: u64,
}

/// Simulated broker for tests and dry runs. Order IDs are generated
/// sequentially starting from 1.
#[derive(Debug, Default)]
pub struct MockBroker {
    state: Mutex<MockState>,
    order_counter: AtomicU64,
}

impl MockBroker {
    /// Create an empty simulated broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register the lot multiplier used when fills move lots into units.
    pub fn add_instrument(&self, figi: &str, lot: i64) {
        self.state().lot_sizes.insert(figi.to_string(), lot);
    }

    /// Set the top of book for an instrument.
    pub fn set_top_of_book(&self, figi: &str, top: TopOfBook) {
        self.state().book.insert(figi.to_string(), top);
    }

    /// Seed a position.
    pub fn set_position(&self, figi: &str, balance: i64, blocked: i64) {
        self.state().positions.insert(
            figi.to_string(),
            Position {
                figi: figi.to_string(),
                balance,
                blocked,
                buy: 0,
            },
        );
    }

    /// Inject a resting order as-is (for aging scenarios).
    pub fn push_order(&self, order: Order) {
        self.state().orders.push(order);
    }

    /// Execute every active order on the instrument: outstanding lots move
    /// into the position balance and the orders finish filled.
    pub fn fill_open(&self, figi: &str) {
        let mut state = self.state();
        let lot = state.lot_sizes.get(figi).copied().unwrap_or(1);
        let mut delta_units = 0;
        for order in state.orders.iter_mut().filter(|o| o.figi == figi) {
            if order.is_active() {
                delta_units += order.signed_outstanding_lots() * lot;
                order.executed_lots = order.requested_lots;
                order.status = OrderStatus::Filled;
            }
        }
        let position = state
            .positions
            .entry(figi.to_string())
            .or_insert_with(|| Position {
                figi: figi.to_string(),
                ..Position::default()
            });
        position.balance += delta_units;
    }

    /// Simulate a network round trip of the given duration on every call
    /// (None restores instant responses).
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state().latency = latency;
    }

    async fn simulate_latency(&self) {
        let latency = self.state().latency;
        if let Some(duration) = latency {
            sleep(duration).await;
        }
    }

    /// Fail every subsequent placement with the given error (None clears).
    pub fn fail_place(&self, failure: Option<BrokerError>) {
        self.state().place_failure = failure;
    }

    /// Fail every subsequent cancellation with the given error (None clears).
    pub fn fail_cancel(&self, failure: Option<BrokerError>) {
        self.state().cancel_failure = failure;
    }

    /// Fail every subsequent order/position query with the given error
    /// (None clears).
    pub fn fail_queries(&self, failure: Option<BrokerError>) {
        self.state().query_failure = failure;
    }

    /// Number of `open_orders` round trips served.
    #[must_use]
    pub fn open_orders_calls(&self) -> u64 {
        self.state().open_orders_calls
    }

    /// Number of `positions` round trips served.
    #[must_use]
    pub fn positions_calls(&self) -> u64 {
        self.state().positions_calls
    }

    /// Number of successful cancellations.
    #[must_use]
    pub fn cancelled_count(&self) -> u64 {
        self.state().cancelled
    }

    /// Snapshot of every order the broker has seen, terminal ones included.
    #[must_use]
    pub fn all_orders(&self) -> Vec<Order> {
        self.state().orders.clone()
    }

    /// Active orders for one instrument.
    #[must_use]
    pub fn active_orders(&self, figi: &str) -> Vec<Order> {
        self.state()
            .orders
            .iter()
            .filter(|o| o.figi == figi && o.is_active())
            .cloned()
            .collect()
    }
}

#[async_trait]
impl BrokerAdapter for MockBroker {
    async fn place_order(
        &self,
        _account_id: &str,
        figi: &str,
        side: OrderSide,
        lots: i64,
        limit_price: Decimal,
        _order_id: &str,
    ) -> Result<Order, BrokerError> {
        self.simulate_latency().await;
        let mut state = self.state();
        if let Some(failure) = state.place_failure.clone() {
            return Err(failure);
        }

        let seq = self.order_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let order = Order {
            order_id: format!("mock-{seq}"),
            figi: figi.to_string(),
            side,
            requested_lots: lots,
            executed_lots: 0,
            limit_price,
            status: OrderStatus::New,
            placed_at: Utc::now(),
        };
        state.orders.push(order.clone());
        Ok(order)
    }

    async fn cancel_order(
        &self,
        _account_id: &str,
        order_id: &str,
    ) -> Result<DateTime<Utc>, BrokerError> {
        self.simulate_latency().await;
        let mut state = self.state();
        if let Some(failure) = state.cancel_failure.clone() {
            return Err(failure);
        }

        let Some(order) = state
            .orders
            .iter_mut()
            .find(|o| o.order_id == order_id && o.is_active())
        else {
            return Err(BrokerError::OrderNotFound {
                order_id: order_id.to_string(),
            });
        };
        order.status = OrderStatus::Cancelled;
        state.cancelled += 1;
        Ok(Utc::now())
    }

    async fn open_orders(&self, _account_id: &str) -> Result<Vec<Order>, BrokerError> {
        self.simulate_latency().await;
        let mut state = self.state();
        state.open_orders_calls += 1;
        if let Some(failure) = state.query_failure.clone() {
            return Err(failure);
        }
        Ok(state.orders.iter().filter(|o| o.is_active()).cloned().collect())
    }

    async fn positions(&self, _account_id: &str) -> Result<Positions, BrokerError> {
        self.simulate_latency().await;
        let mut state = self.state();
        state.positions_calls += 1;
        if let Some(failure) = state.query_failure.clone() {
            return Err(failure);
        }
        Ok(Positions {
            positions: state.positions.clone(),
        })
    }

    async fn top_of_book(&self, figi: &str) -> Result<TopOfBook, BrokerError> {
        self.simulate_latency().await;
        Ok(self.state().book.get(figi).copied().unwrap_or_default())
    }
}
