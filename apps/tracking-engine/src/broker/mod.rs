//! Broker port (driven side).
//!
//! The capability set the tracking core consumes from a brokerage adapter.
//! Live and simulated adapters implement the same trait; the core never
//! cares which one it talks to.

mod mock;

pub use mock::MockBroker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::models::{Order, OrderSide, Positions, TopOfBook};

/// Broker port error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    /// Transport-level failure.
    #[error("broker connection error: {message}")]
    Connection {
        /// Error details.
        message: String,
    },

    /// Order rejected by the broker.
    #[error("order rejected: {reason}")]
    Rejected {
        /// Rejection reason.
        reason: String,
    },

    /// Rate limited by the broker.
    #[error("rate limited by broker")]
    RateLimited,

    /// Account order/position quota violated. Permanent: retrying the same
    /// placement cannot succeed until the account's limits change.
    #[error("order/position limit exceeded (code {code})")]
    LimitExceeded {
        /// Remote limit-violation code.
        code: String,
    },

    /// Order not found (already executed or cancelled on the broker side).
    #[error("order not found: {order_id}")]
    OrderNotFound {
        /// The missing order ID.
        order_id: String,
    },

    /// The relevant side of the book is empty, so no limit price can be
    /// derived. Retried on the next pass once a quote arrives.
    #[error("no quotable price for {figi}")]
    NoQuotablePrice {
        /// Instrument without a usable quote.
        figi: String,
    },

    /// Service temporarily unavailable.
    #[error("broker unavailable: {message}")]
    Unavailable {
        /// Error details.
        message: String,
    },
}

impl BrokerError {
    /// True for the permanent limit/quota signature. Everything else is
    /// transient and safe to retry on a later pass.
    #[must_use]
    pub const fn is_permanent_limit(&self) -> bool {
        matches!(self, Self::LimitExceeded { .. })
    }
}

/// Port for broker interactions.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    /// Place a limit order.
    ///
    /// `order_id` is the client-generated idempotency key echoed back by
    /// the broker.
    async fn place_order(
        &self,
        account_id: &str,
        figi: &str,
        side: OrderSide,
        lots: i64,
        limit_price: Decimal,
        order_id: &str,
    ) -> Result<Order, BrokerError>;

    /// Cancel an order, returning the broker-reported cancellation time.
    async fn cancel_order(
        &self,
        account_id: &str,
        order_id: &str,
    ) -> Result<DateTime<Utc>, BrokerError>;

    /// All open orders for the account.
    async fn open_orders(&self, account_id: &str) -> Result<Vec<Order>, BrokerError>;

    /// All positions for the account.
    async fn positions(&self, account_id: &str) -> Result<Positions, BrokerError>;

    /// Best bid/ask for an instrument.
    async fn top_of_book(&self, figi: &str) -> Result<TopOfBook, BrokerError>;
}
