//! Logging and metrics for the tracking engine.
//!
//! Uses the `tracing` and `metrics` facades. The embedding binary decides
//! where log lines and metric samples go; nothing here installs an
//! exporter.

use metrics::{counter, gauge};
use tracing_subscriber::EnvFilter;

/// Initialize the fmt subscriber with `RUST_LOG` filtering.
///
/// Safe to call more than once; later calls are no-ops (tests lean on
/// this).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// Record the position a strategy is currently driving toward.
pub(crate) fn record_target(figi: &str, strategy: &str, lots: i64) {
    gauge!(
        "helm_target_position",
        "figi" => figi.to_string(),
        "strategy" => strategy.to_string()
    )
    .set(lots as f64);
}

/// Record the effective units observed for an instrument on a refresh.
pub(crate) fn record_observed(account: &str, figi: &str, units: i64) {
    gauge!(
        "helm_observed_position",
        "account" => account.to_string(),
        "figi" => figi.to_string()
    )
    .set(units as f64);
}

/// Count one instrument evaluation by outcome.
pub(crate) fn record_outcome(account: &str, outcome: &'static str) {
    counter!(
        "helm_tracking_outcomes",
        "account" => account.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Count one trade event dropped on a full subscriber queue.
pub(crate) fn record_dropped_event() {
    counter!("helm_trade_events_dropped").increment(1);
}
