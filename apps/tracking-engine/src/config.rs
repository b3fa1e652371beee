//! Tracking engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for cache freshness and loop pacing.
///
/// The defaults match long-running production use against a rate-limited
/// brokerage; deployments with tighter venues tune them down.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Seconds an order snapshot stays fresh.
    #[serde(default = "default_orders_ttl_secs")]
    pub orders_ttl_secs: u64,
    /// Seconds a position snapshot stays fresh.
    #[serde(default = "default_positions_ttl_secs")]
    pub positions_ttl_secs: u64,
    /// Milliseconds to wait after issuing a correction before the
    /// instrument is re-evaluated.
    #[serde(default = "default_stabilization_window_ms")]
    pub stabilization_window_ms: u64,
    /// Seconds an active order may rest before its price is re-checked
    /// against the book.
    #[serde(default = "default_stale_order_age_secs")]
    pub stale_order_age_secs: u64,
    /// Bounded capacity of each trade-event subscriber queue.
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            orders_ttl_secs: default_orders_ttl_secs(),
            positions_ttl_secs: default_positions_ttl_secs(),
            stabilization_window_ms: default_stabilization_window_ms(),
            stale_order_age_secs: default_stale_order_age_secs(),
            event_queue_capacity: default_event_queue_capacity(),
        }
    }
}

impl TrackingConfig {
    /// Order snapshot TTL.
    #[must_use]
    pub const fn orders_ttl(&self) -> Duration {
        Duration::from_secs(self.orders_ttl_secs)
    }

    /// Position snapshot TTL.
    #[must_use]
    pub const fn positions_ttl(&self) -> Duration {
        Duration::from_secs(self.positions_ttl_secs)
    }

    /// Stabilization window after a correction.
    #[must_use]
    pub const fn stabilization_window(&self) -> Duration {
        Duration::from_millis(self.stabilization_window_ms)
    }

    /// Resting age beyond which an order's price is re-checked.
    #[must_use]
    pub const fn stale_order_age(&self) -> Duration {
        Duration::from_secs(self.stale_order_age_secs)
    }
}

const fn default_orders_ttl_secs() -> u64 {
    10
}

const fn default_positions_ttl_secs() -> u64 {
    10
}

const fn default_stabilization_window_ms() -> u64 {
    1000
}

const fn default_stale_order_age_secs() -> u64 {
    60
}

const fn default_event_queue_capacity() -> usize {
    16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = TrackingConfig::default();
        assert_eq!(config.orders_ttl(), Duration::from_secs(10));
        assert_eq!(config.positions_ttl(), Duration::from_secs(10));
        assert_eq!(config.stabilization_window(), Duration::from_millis(1000));
        assert_eq!(config.stale_order_age(), Duration::from_secs(60));
        assert_eq!(config.event_queue_capacity, 16);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: TrackingConfig =
            serde_json::from_str(r#"{"orders_ttl_secs": 2}"#).expect("parse");
        assert_eq!(config.orders_ttl_secs, 2);
        assert_eq!(config.positions_ttl_secs, 10);
        assert_eq!(config.stale_order_age_secs, 60);
    }
}
