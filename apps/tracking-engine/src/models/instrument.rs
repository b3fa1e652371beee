//! Instrument metadata consumed by the tracking loop.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Static metadata for one tradable instrument.
///
/// Loading this from the broker's instrument directory is the embedder's
/// concern; the loop only reads the fields below.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    /// Figi identifier.
    pub figi: String,
    /// Exchange ticker, for humans and log lines.
    pub ticker: String,
    /// Exchange lot multiplier: tradable units per lot.
    pub lot: i64,
    /// Minimum price step.
    pub min_price_increment: Decimal,
    /// Whether the venue accepts limit orders for this instrument.
    pub limit_orders_allowed: bool,
}

impl Instrument {
    /// Create instrument metadata.
    ///
    /// # Panics
    ///
    /// Panics if `lot < 1` — a zero lot multiplier would divide position
    /// units by zero in the tracking loop, so misconfiguration fails loudly
    /// at construction rather than deep inside a pass.
    #[must_use]
    pub fn new(
        figi: impl Into<String>,
        ticker: impl Into<String>,
        lot: i64,
        min_price_increment: Decimal,
    ) -> Self {
        assert!(lot >= 1, "instrument lot multiplier must be at least 1");
        Self {
            figi: figi.into(),
            ticker: ticker.into(),
            lot,
            min_price_increment,
            limit_orders_allowed: true,
        }
    }

    /// Mark the instrument as rejecting limit orders.
    #[must_use]
    pub const fn without_limit_orders(mut self) -> Self {
        self.limit_orders_allowed = false;
        self
    }
}
