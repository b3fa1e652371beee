//! Top-of-book quote.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Best bid and ask for one instrument. Either side may be absent when
/// that side of the book is empty.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TopOfBook {
    /// Best bid price, if any buyer is quoting.
    pub bid: Option<Decimal>,
    /// Best ask price, if any seller is quoting.
    pub ask: Option<Decimal>,
}

impl TopOfBook {
    /// Both sides quoted.
    #[must_use]
    pub const fn two_sided(bid: Decimal, ask: Decimal) -> Self {
        Self {
            bid: Some(bid),
            ask: Some(ask),
        }
    }
}
