//! Error taxonomy for the tracking core.
//!
//! Remote failures inside a tracking pass never unwind out of the loop:
//! they are accumulated on the affected target and surfaced through its
//! handle. Only the permanent limit signature changes engine behavior.

use crate::broker::BrokerError;

/// An error recorded against a target position.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TrackingError {
    /// Two strategies tried to drive the same instrument on one account.
    /// Rejected synchronously, never retried automatically.
    #[error("instrument {figi} already driven by strategy {owner}, rejected {contender}")]
    Conflict {
        /// Contested instrument.
        figi: String,
        /// Strategy that owns the target.
        owner: String,
        /// Strategy whose request was rejected.
        contender: String,
    },

    /// A broker operation failed during a pass.
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

impl TrackingError {
    /// True when the underlying failure is the broker's permanent
    /// limit/quota signature.
    #[must_use]
    pub const fn is_permanent_limit(&self) -> bool {
        match self {
            Self::Conflict { .. } => false,
            Self::Broker(err) => err.is_permanent_limit(),
        }
    }
}
