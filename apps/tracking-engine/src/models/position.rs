//! Position balances reported by the broker.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Per-instrument balance for one account.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Position {
    /// Figi identifier of the instrument.
    pub figi: String,
    /// Settled, tradable units.
    pub balance: i64,
    /// Units reserved by active sell orders.
    pub blocked: i64,
    /// Units reserved by active buy orders, pending settlement.
    pub buy: i64,
}

impl Position {
    /// Units the account effectively holds: settled plus sell-reserved.
    /// Sell reservations still belong to the account until they execute.
    #[must_use]
    pub const fn effective_units(&self) -> i64 {
        self.balance + self.blocked
    }
}

/// Snapshot of all positions for one account, keyed by figi.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Positions {
    /// Positions keyed by figi.
    pub positions: HashMap<String, Position>,
}

impl Positions {
    /// Look up the position for an instrument.
    #[must_use]
    pub fn get(&self, figi: &str) -> Option<&Position> {
        self.positions.get(figi)
    }

    /// Effective units held for an instrument; 0 when the account holds none.
    #[must_use]
    pub fn effective_units(&self, figi: &str) -> i64 {
        self.positions.get(figi).map_or(0, Position::effective_units)
    }
}

impl FromIterator<Position> for Positions {
    fn from_iter<I: IntoIterator<Item = Position>>(iter: I) -> Self {
        Self {
            positions: iter
                .into_iter()
                .map(|p| (p.figi.clone(), p))
                .collect(),
        }
    }
}
