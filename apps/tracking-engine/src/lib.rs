// Allow unwrap/expect in tests - tests should panic on unexpected errors
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Tracking Engine - Rust Core Library
//!
//! Target-position tracking engine for the Helm trading system.
//!
//! Strategies declare a desired holding size per instrument; the engine
//! continuously steers the network-observed position toward it through
//! limit orders, while guaranteeing that no two strategies ever drive the
//! same instrument on one account.
//!
//! # Architecture
//!
//! - [`models`]: orders, positions, instruments, quotes
//! - [`broker`]: the capability port a brokerage adapter implements,
//!   plus a simulated adapter for tests
//! - [`cache`]: short-TTL, mutation-invalidated observation cache — the
//!   only path through which the loop reads remote state
//! - [`engine`]: the target registry and the tracking loop
//! - [`stream`]: bounded trade-event fan-out feeding cache invalidation
//!
//! # Flow
//!
//! `set_target` → registry update → one synchronous tracking pass →
//! further passes whenever the cache is invalidated (trade event, TTL
//! expiry) → each pass cancels what no longer helps and places at most
//! one corrective order per instrument.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

pub mod broker;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod observability;
pub mod stream;

pub use broker::{BrokerAdapter, BrokerError, MockBroker};
pub use cache::AccountCache;
pub use config::TrackingConfig;
pub use engine::{
    Account, InstrumentOutcome, PassReport, Placement, StrategyHandle, TargetHandle,
};
pub use error::TrackingError;
pub use models::{
    Instrument, Order, OrderSide, OrderStatus, Position, Positions, TopOfBook, lots_in_orders,
};
pub use stream::{Subscription, TradeEvent, TradeEvents, spawn_invalidator};
