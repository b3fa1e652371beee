//! Tracking Loop Integration Tests
//!
//! End-to-end scenarios driving the engine against the simulated broker:
//! - Corrective placement at the improved best price
//! - Convergence after fills, with no further order activity
//! - The stabilization blind window after a correction
//! - Offsetting orders already accounting for the gap
//! - Stale-order eviction and best-in-book retention
//! - Permanent limit errors suspending placement and stopping the owner
//! - Trade events driving invalidation and passes end to end

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::time::{Duration, advance, sleep};
use tracking_engine::{
    Account, BrokerAdapter, BrokerError, Instrument, InstrumentOutcome, MockBroker, Order,
    OrderSide, OrderStatus, StrategyHandle, TopOfBook, TradeEvent, TradeEvents, TrackingConfig,
    spawn_invalidator,
};

const FIGI: &str = "BBG000B9XRY4";

struct TestStrategy {
    name: String,
    stopped: AtomicBool,
}

impl TestStrategy {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            stopped: AtomicBool::new(false),
        })
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl StrategyHandle for TestStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn request_stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

fn make_instrument() -> Instrument {
    Instrument::new(FIGI, "AAPL", 1, dec!(0.01))
}

fn make_account(broker: &Arc<MockBroker>) -> Arc<Account> {
    tracking_engine::observability::init_tracing();
    let adapter: Arc<dyn BrokerAdapter> = Arc::clone(broker) as _;
    Account::new("acc-1", adapter, TrackingConfig::default())
}

/// An order resting on the book since `age_secs` ago.
fn resting_order(side: OrderSide, lots: i64, price: Decimal, age_secs: i64) -> Order {
    Order {
        order_id: "resting-1".to_string(),
        figi: FIGI.to_string(),
        side,
        requested_lots: lots,
        executed_lots: 0,
        limit_price: price,
        status: OrderStatus::New,
        placed_at: Utc::now() - ChronoDuration::seconds(age_secs),
    }
}

// ============================================
// Corrective Placement
// ============================================

#[tokio::test(start_paused = true)]
async fn places_one_buy_at_improved_bid() {
    let broker = Arc::new(MockBroker::new());
    broker.set_top_of_book(FIGI, TopOfBook::two_sided(dec!(100.00), dec!(100.10)));
    let account = make_account(&broker);
    let strategy = TestStrategy::new("rsi");

    let handle = account.set_target(strategy, &make_instrument(), 10).await;

    let placed = broker.active_orders(FIGI);
    assert_eq!(placed.len(), 1);
    assert!(matches!(placed[0].side, OrderSide::Buy));
    assert_eq!(placed[0].requested_lots, 10);
    assert_eq!(placed[0].limit_price, dec!(100.01));
    assert!(handle.error_message().is_none());

    // Before the fill the resting order accounts for the whole gap:
    // position 0 + in-flight 10 = desired 10, so the next pass holds.
    advance(Duration::from_millis(1100)).await;
    let report = account.run_tracking_pass().await;
    assert!(report.ran);
    assert_eq!(report.outcomes.get(FIGI), Some(&InstrumentOutcome::InFlight));
    assert_eq!(broker.all_orders().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn converges_after_fill_with_no_further_orders() {
    let broker = Arc::new(MockBroker::new());
    broker.add_instrument(FIGI, 1);
    broker.set_top_of_book(FIGI, TopOfBook::two_sided(dec!(100.00), dec!(100.10)));
    let account = make_account(&broker);
    let strategy = TestStrategy::new("rsi");

    let _handle = account.set_target(strategy, &make_instrument(), 10).await;
    broker.fill_open(FIGI);

    advance(Duration::from_millis(1100)).await;
    let report = account.run_tracking_pass().await;
    assert_eq!(report.outcomes.get(FIGI), Some(&InstrumentOutcome::Converged));

    // Converged is absorbing while nothing changes.
    for _ in 0..3 {
        let report = account.run_tracking_pass().await;
        assert_eq!(report.outcomes.get(FIGI), Some(&InstrumentOutcome::Converged));
    }
    assert_eq!(broker.all_orders().len(), 1);
    assert_eq!(broker.cancelled_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn stabilization_window_blocks_reevaluation() {
    let broker = Arc::new(MockBroker::new());
    broker.add_instrument(FIGI, 1);
    broker.set_top_of_book(FIGI, TopOfBook::two_sided(dec!(100.00), dec!(100.10)));
    let account = make_account(&broker);
    let strategy = TestStrategy::new("rsi");

    let _handle = account.set_target(strategy, &make_instrument(), 10).await;
    broker.fill_open(FIGI);

    // The correction is not observable yet by design; the pass skips the
    // instrument until the window passes.
    let report = account.run_tracking_pass().await;
    assert_eq!(
        report.outcomes.get(FIGI),
        Some(&InstrumentOutcome::Stabilizing)
    );

    advance(Duration::from_millis(1100)).await;
    let report = account.run_tracking_pass().await;
    assert_eq!(report.outcomes.get(FIGI), Some(&InstrumentOutcome::Converged));
}

#[tokio::test]
async fn offsetting_sell_already_accounts_for_gap() {
    let broker = Arc::new(MockBroker::new());
    broker.set_position(FIGI, 5, 0);
    broker.push_order(resting_order(OrderSide::Sell, 5, dec!(100.10), 0));
    let account = make_account(&broker);
    let strategy = TestStrategy::new("rsi");

    // Desired 0 with 5 held and 5 already on offer: nothing to do.
    let handle = account.set_target(strategy, &make_instrument(), 0).await;

    assert_eq!(broker.cancelled_count(), 0);
    assert_eq!(broker.all_orders().len(), 1);
    assert!(handle.error_message().is_none());

    let report = account.run_tracking_pass().await;
    assert_eq!(report.outcomes.get(FIGI), Some(&InstrumentOutcome::InFlight));
}

// ============================================
// Stale-Order Eviction
// ============================================

#[tokio::test]
async fn aged_order_no_longer_best_is_evicted() {
    let broker = Arc::new(MockBroker::new());
    // The bid has moved up past the resting limit.
    broker.set_top_of_book(FIGI, TopOfBook::two_sided(dec!(100.05), dec!(100.15)));
    broker.push_order(resting_order(OrderSide::Buy, 5, dec!(100.01), 120));
    let account = make_account(&broker);
    let strategy = TestStrategy::new("rsi");

    let _handle = account.set_target(strategy, &make_instrument(), 5).await;

    assert_eq!(broker.cancelled_count(), 1);
    assert!(broker.active_orders(FIGI).is_empty());
}

#[tokio::test]
async fn aged_order_still_best_is_left_alone() {
    let broker = Arc::new(MockBroker::new());
    broker.set_top_of_book(FIGI, TopOfBook::two_sided(dec!(100.05), dec!(100.15)));
    broker.push_order(resting_order(OrderSide::Buy, 5, dec!(100.05), 120));
    let account = make_account(&broker);
    let strategy = TestStrategy::new("rsi");

    let _handle = account.set_target(strategy, &make_instrument(), 5).await;

    assert_eq!(broker.cancelled_count(), 0);
    assert_eq!(broker.active_orders(FIGI).len(), 1);
}

#[tokio::test]
async fn fresh_order_is_not_price_checked() {
    let broker = Arc::new(MockBroker::new());
    broker.set_top_of_book(FIGI, TopOfBook::two_sided(dec!(100.05), dec!(100.15)));
    broker.push_order(resting_order(OrderSide::Buy, 5, dec!(100.01), 10));
    let account = make_account(&broker);
    let strategy = TestStrategy::new("rsi");

    let _handle = account.set_target(strategy, &make_instrument(), 5).await;

    assert_eq!(broker.cancelled_count(), 0);
}

// ============================================
// Permanent Limit Errors
// ============================================

#[tokio::test(start_paused = true)]
async fn limit_error_suspends_placement_and_stops_strategy() {
    let broker = Arc::new(MockBroker::new());
    broker.set_top_of_book(FIGI, TopOfBook::two_sided(dec!(100.00), dec!(100.10)));
    broker.fail_place(Some(BrokerError::LimitExceeded {
        code: "30042".to_string(),
    }));
    let account = make_account(&broker);
    let strategy = TestStrategy::new("rsi");

    let handle = account
        .set_target(Arc::clone(&strategy) as Arc<dyn StrategyHandle>, &make_instrument(), 10)
        .await;

    assert!(handle.is_limit_error());
    assert!(strategy.is_stopped());

    // Consuming the error does not lift the suspension.
    let errors = handle.consume_errors();
    assert!(errors.iter().any(tracking_engine::TrackingError::is_permanent_limit));
    assert!(handle.is_limit_error());

    // Later passes still cancel, but never place.
    broker.fail_place(None);
    broker.push_order(resting_order(OrderSide::Buy, 3, dec!(100.01), 0));
    account.cache().invalidate().await;
    advance(Duration::from_millis(1100)).await;

    let report = account.run_tracking_pass().await;
    assert_eq!(report.outcomes.get(FIGI), Some(&InstrumentOutcome::Suspended));
    assert_eq!(broker.cancelled_count(), 1);
    assert_eq!(broker.all_orders().len(), 1);

    // Operator raises the account limits; placement resumes.
    handle.clear_limit_suspension();
    advance(Duration::from_millis(1100)).await;
    let report = account.run_tracking_pass().await;
    assert_eq!(report.outcomes.get(FIGI), Some(&InstrumentOutcome::Corrected));
    assert_eq!(broker.active_orders(FIGI).len(), 1);
    assert_eq!(broker.active_orders(FIGI)[0].requested_lots, 10);
}

#[tokio::test(start_paused = true)]
async fn transient_error_keeps_retrying() {
    let broker = Arc::new(MockBroker::new());
    broker.set_top_of_book(FIGI, TopOfBook::two_sided(dec!(100.00), dec!(100.10)));
    broker.fail_place(Some(BrokerError::RateLimited));
    let account = make_account(&broker);
    let strategy = TestStrategy::new("rsi");

    let handle = account
        .set_target(Arc::clone(&strategy) as Arc<dyn StrategyHandle>, &make_instrument(), 10)
        .await;

    assert!(!handle.is_limit_error());
    assert!(!strategy.is_stopped());
    assert!(handle.error_message().is_some());

    // The next pass retries the placement.
    broker.fail_place(None);
    advance(Duration::from_millis(1100)).await;
    let report = account.run_tracking_pass().await;
    assert_eq!(report.outcomes.get(FIGI), Some(&InstrumentOutcome::Corrected));
    assert_eq!(broker.active_orders(FIGI).len(), 1);
}

// ============================================
// Cache Freshness
// ============================================

#[tokio::test(start_paused = true)]
async fn positions_are_fetched_once_per_live_window() {
    let broker = Arc::new(MockBroker::new());
    let account = make_account(&broker);

    account.cache().positions().await.expect("read");
    account.cache().positions().await.expect("cached read");
    assert_eq!(broker.positions_calls(), 1);

    advance(Duration::from_secs(11)).await;
    account.cache().positions().await.expect("expired read");
    assert_eq!(broker.positions_calls(), 2);
}

// ============================================
// Trade Events End to End
// ============================================

#[tokio::test(start_paused = true)]
async fn trade_event_drives_pass_to_convergence() {
    let broker = Arc::new(MockBroker::new());
    broker.add_instrument(FIGI, 1);
    broker.set_top_of_book(FIGI, TopOfBook::two_sided(dec!(100.00), dec!(100.10)));
    let account = make_account(&broker);
    let strategy = TestStrategy::new("rsi");

    let hub = TradeEvents::new(16);
    let _invalidator = spawn_invalidator(&hub, Arc::clone(&account));

    let _handle = account.set_target(strategy, &make_instrument(), 10).await;
    assert_eq!(broker.active_orders(FIGI).len(), 1);

    // The fill arrives as a push notification after the blind window.
    broker.fill_open(FIGI);
    advance(Duration::from_millis(1100)).await;
    hub.publish(&TradeEvent {
        account_id: "acc-1".to_string(),
        figi: FIGI.to_string(),
        executed_lots: 10,
    });
    sleep(Duration::from_millis(50)).await;

    // The driver's pass observed convergence; nothing further was placed.
    let report = account.run_tracking_pass().await;
    assert_eq!(report.outcomes.get(FIGI), Some(&InstrumentOutcome::Converged));
    assert_eq!(broker.all_orders().len(), 1);
}
