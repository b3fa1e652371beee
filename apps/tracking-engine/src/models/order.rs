//! Order-related types for position tracking.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    /// Buy order.
    Buy,
    /// Sell order.
    Sell,
}

/// Order status in the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Order accepted by the broker, nothing executed yet.
    New,
    /// Order partially filled.
    PartiallyFilled,
    /// Order completely filled.
    Filled,
    /// Order cancelled.
    Cancelled,
}

impl OrderStatus {
    /// Returns true if the order can still fill or be cancelled.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::New | Self::PartiallyFilled)
    }

    /// Returns true if the order is in a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

/// Broker order snapshot. Immutable once placed; the broker reports
/// execution progress through `executed_lots` and `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Broker-assigned order ID.
    pub order_id: String,
    /// Figi identifier of the instrument.
    pub figi: String,
    /// Order side.
    pub side: OrderSide,
    /// Requested quantity in lots.
    pub requested_lots: i64,
    /// Executed quantity in lots.
    pub executed_lots: i64,
    /// Limit price per unit.
    pub limit_price: Decimal,
    /// Current status.
    pub status: OrderStatus,
    /// Placement timestamp (UTC, broker clock).
    pub placed_at: DateTime<Utc>,
}

impl Order {
    /// Returns true if the order can still fill or be cancelled.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Lots requested but not yet executed.
    #[must_use]
    pub const fn outstanding_lots(&self) -> i64 {
        self.requested_lots - self.executed_lots
    }

    /// Outstanding lots signed by direction: positive for buys, negative
    /// for sells, zero once the order is no longer active.
    #[must_use]
    pub const fn signed_outstanding_lots(&self) -> i64 {
        if !self.is_active() {
            return 0;
        }
        match self.side {
            OrderSide::Buy => self.outstanding_lots(),
            OrderSide::Sell => -self.outstanding_lots(),
        }
    }
}

/// Sum the signed outstanding lots of active orders per instrument.
///
/// The result answers "how many lots are already in flight toward the
/// target" for each figi with at least one active order.
#[must_use]
pub fn lots_in_orders(orders: &[Order]) -> HashMap<String, i64> {
    let mut lots: HashMap<String, i64> = HashMap::new();
    for order in orders {
        if order.is_active() {
            *lots.entry(order.figi.clone()).or_insert(0) += order.signed_outstanding_lots();
        }
    }
    lots
}
