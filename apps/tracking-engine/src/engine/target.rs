//! Registry entries: one desired position per (account, instrument).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rust_decimal::Decimal;
use tokio::time::{Duration, Instant};
use tracing::error;

use crate::error::TrackingError;
use crate::models::Instrument;

/// The identity and stop capability the engine needs from a strategy.
///
/// Strategy logic lives outside the core; the engine only records who owns
/// a target and tells the owner to stand down when the broker reports a
/// permanent limit violation.
pub trait StrategyHandle: Send + Sync {
    /// Stable, unique strategy name. Ownership of an instrument is decided
    /// by name equality.
    fn name(&self) -> &str;

    /// Ask the strategy to stop driving targets. Must not block.
    fn request_stop(&self);
}

/// Mutable state of one target. Accessed under its cell mutex; sections
/// are short and synchronous, the lock is never held across an await.
pub(crate) struct TargetData {
    pub(crate) strategy: Arc<dyn StrategyHandle>,
    pub(crate) instrument: Instrument,
    pub(crate) desired_lots: i64,
    pub(crate) price_increment: Decimal,
    pub(crate) pending_errors: Vec<TrackingError>,
    pub(crate) limit_suspended: bool,
    pub(crate) stabilize_until: Option<Instant>,
}

impl TargetData {
    pub(crate) fn new(
        strategy: Arc<dyn StrategyHandle>,
        instrument: Instrument,
        desired_lots: i64,
        price_increment: Decimal,
    ) -> Self {
        Self {
            strategy,
            instrument,
            desired_lots,
            price_increment,
            pending_errors: Vec::new(),
            limit_suspended: false,
            stabilize_until: None,
        }
    }

    /// A correction was just issued and has not had time to become
    /// observable; skip this instrument until the window passes.
    pub(crate) fn is_stabilizing(&self) -> bool {
        self.stabilize_until.is_some_and(|until| Instant::now() < until)
    }

    pub(crate) fn arm_stabilization(&mut self, window: Duration) {
        self.stabilize_until = Some(Instant::now() + window);
    }

    /// Record a failure against this target. A permanent limit error
    /// additionally suspends corrective placement and stops the owner.
    pub(crate) fn record_error(&mut self, error: TrackingError) {
        if error.is_permanent_limit() {
            error!(
                figi = %self.instrument.figi,
                strategy = %self.strategy.name(),
                %error,
                "limit exceeded, stopping strategy"
            );
            self.limit_suspended = true;
            self.strategy.request_stop();
        }
        self.pending_errors.push(error);
    }
}

pub(crate) type TargetCell = Arc<Mutex<TargetData>>;

pub(crate) fn lock_cell(cell: &TargetCell) -> MutexGuard<'_, TargetData> {
    cell.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Caller-facing view of a target. Clones share the underlying state;
/// queries have no side effects apart from error consumption.
#[derive(Clone)]
pub struct TargetHandle {
    cell: TargetCell,
}

impl TargetHandle {
    pub(crate) fn new(cell: TargetCell) -> Self {
        Self { cell }
    }

    pub(crate) fn cell(&self) -> &TargetCell {
        &self.cell
    }

    /// Lots the owning strategy currently wants to hold.
    #[must_use]
    pub fn desired_lots(&self) -> i64 {
        lock_cell(&self.cell).desired_lots
    }

    /// Name of the owning strategy.
    #[must_use]
    pub fn strategy_name(&self) -> String {
        lock_cell(&self.cell).strategy.name().to_string()
    }

    /// Peek at the accumulated errors as one message, without consuming.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        let data = lock_cell(&self.cell);
        if data.pending_errors.is_empty() {
            return None;
        }
        Some(
            data.pending_errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Drain the accumulated errors. A second call returns nothing until
    /// new failures arrive.
    #[must_use]
    pub fn consume_errors(&self) -> Vec<TrackingError> {
        std::mem::take(&mut lock_cell(&self.cell).pending_errors)
    }

    /// True while corrective placement is suspended by a permanent limit
    /// error, or while an unconsumed permanent error is pending.
    #[must_use]
    pub fn is_limit_error(&self) -> bool {
        let data = lock_cell(&self.cell);
        data.limit_suspended
            || data
                .pending_errors
                .iter()
                .any(TrackingError::is_permanent_limit)
    }

    /// Re-enable corrective placement after the account's limits were
    /// raised. Until this is called the suspension is sticky.
    pub fn clear_limit_suspension(&self) {
        lock_cell(&self.cell).limit_suspended = false;
    }
}
