//! Engine-level tests with injected mock collaborators
//!
//! Covers the entry-gating invariants, idempotent action logging, REAL-mode
//! preconditions and the settlement paths end to end, without touching the
//! network.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use polysniper::actionlog::{ActionLog, ActionLogSink};
use polysniper::config::{ExecutionConfigUpdate, ExecutionMode, StrategyConfig};
use polysniper::engine::{Engine, EngineOptions};
use polysniper::market::MarketDataSource;
use polysniper::prices::{PriceAggregator, ProviderError, SpotProvider};
use polysniper::types::{ActionLogEntry, Asset, Direction, Indicator, MarketData, TradeStatus};

/// Provider serving a mutable price per asset
struct ScriptedProvider {
    prices: Arc<Mutex<HashMap<Asset, f64>>>,
}

#[async_trait]
impl SpotProvider for ScriptedProvider {
    fn tag(&self) -> &'static str {
        "SCRIPTED"
    }

    async fn fetch(&self, assets: &[Asset]) -> Result<HashMap<Asset, (f64, f64)>, ProviderError> {
        let prices = self.prices.lock().unwrap();
        Ok(assets
            .iter()
            .filter_map(|a| prices.get(a).map(|p| (*a, (*p, 0.0))))
            .collect())
    }
}

/// Resolver serving a configurable market and counting order submissions
struct MockResolver {
    market: Mutex<MarketData>,
    order_calls: AtomicUsize,
    order_result: Mutex<(bool, String)>,
    settlement: Mutex<(Option<f64>, Option<f64>, String)>,
}

impl MockResolver {
    fn new(market: MarketData) -> Self {
        Self {
            market: Mutex::new(market),
            order_calls: AtomicUsize::new(0),
            order_result: Mutex::new((true, "CLOB_ORDER_ACCEPTED".to_string())),
            settlement: Mutex::new((None, None, "NO_RESULT".to_string())),
        }
    }

    fn set_order_result(&self, accepted: bool, reason: &str) {
        *self.order_result.lock().unwrap() = (accepted, reason.to_string());
    }

    fn set_settlement(&self, final_price: Option<f64>, strike: Option<f64>) {
        *self.settlement.lock().unwrap() = (final_price, strike, "GAMMA_ID".to_string());
    }
}

#[async_trait]
impl MarketDataSource for MockResolver {
    async fn fetch_market_data(&self, _asset: Asset) -> MarketData {
        self.market.lock().unwrap().clone()
    }

    async fn place_order(
        &self,
        _market: &MarketData,
        _direction: Direction,
        _amount_usd: f64,
        _wallet_secret: &str,
    ) -> (bool, String) {
        self.order_calls.fetch_add(1, Ordering::SeqCst);
        self.order_result.lock().unwrap().clone()
    }

    async fn fetch_market_result(
        &self,
        _market_id: &str,
        _market_slug: &str,
    ) -> (Option<f64>, Option<f64>, String) {
        self.settlement.lock().unwrap().clone()
    }
}

/// In-memory sink exercising the storage-agnostic seam
#[derive(Default)]
struct MemorySink {
    entries: Mutex<Vec<ActionLogEntry>>,
}

#[async_trait]
impl ActionLogSink for MemorySink {
    async fn append(&self, entry: &ActionLogEntry) -> anyhow::Result<()> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn replay(&self) -> anyhow::Result<Vec<ActionLogEntry>> {
        Ok(self.entries.lock().unwrap().clone())
    }
}

fn up_market(end_ts: i64) -> MarketData {
    MarketData {
        market_id: "mkt-btc".to_string(),
        market_slug: "btc-updown-15m-1700000100".to_string(),
        window_ts: Some(1_700_000_100),
        yes_odds: 0.9,
        no_odds: 0.1,
        odds_source: "GAMMA_SLUG".to_string(),
        resolved_by: "SLUG".to_string(),
        odds_live: true,
        market_end_ts: Some(end_ts),
        price_to_beat: Some(68_000.0),
        final_price: None,
        token_up: Some("token-up".to_string()),
        token_down: Some("token-down".to_string()),
        retries: 0,
    }
}

struct Harness {
    engine: Arc<Engine>,
    resolver: Arc<MockResolver>,
    prices: Arc<Mutex<HashMap<Asset, f64>>>,
}

/// Engine wired to mocks, trading BTC on the POLY_PRICE indicator alone so
/// signals are deterministic
async fn harness(market: MarketData) -> Harness {
    let prices = Arc::new(Mutex::new(HashMap::from([(Asset::BTC, 100.0)])));
    let aggregator = Arc::new(PriceAggregator::new(
        vec![Box::new(ScriptedProvider {
            prices: Arc::clone(&prices),
        })],
        45,
    ));
    let resolver = Arc::new(MockResolver::new(market));
    let action_log = ActionLog::load(Box::new(MemorySink::default()))
        .await
        .unwrap();

    let engine = Arc::new(Engine::new(
        aggregator,
        Arc::clone(&resolver) as Arc<dyn MarketDataSource>,
        action_log,
        EngineOptions::default(),
    ));

    engine
        .update_strategy_config(StrategyConfig {
            enabled_assets: vec![Asset::BTC],
            enabled_indicators: vec![Indicator::PolyPrice],
            confidence_threshold: 0.9,
            entry_probability_threshold: 0.85,
            late_entry_seconds: 180,
            stop_loss_pct: 0.2,
        })
        .await
        .unwrap();

    Harness {
        engine,
        resolver,
        prices,
    }
}

#[tokio::test]
async fn test_tick_opens_at_most_one_trade_per_asset() {
    let end_ts = Utc::now().timestamp() + 60;
    let h = harness(up_market(end_ts)).await;

    h.engine.tick().await;
    let state = h.engine.state().await;
    assert_eq!(state.open_trades.len(), 1);
    assert_eq!(state.open_trades[0].asset, Asset::BTC);
    assert_eq!(state.open_trades[0].direction, Direction::Up);
    assert!(state.last_decision_by_asset["BTC"].starts_with("ENTERED"));

    // Second tick: the open trade blocks re-entry
    h.engine.tick().await;
    let state = h.engine.state().await;
    assert_eq!(state.open_trades.len(), 1);
    assert!(state.last_decision_by_asset["BTC"].starts_with("HOLDING"));
}

#[tokio::test]
async fn test_entry_is_idempotent_per_window() {
    // Window that closes immediately: the trade settles on the same tick
    let end_ts = Utc::now().timestamp();
    let h = harness(up_market(end_ts)).await;
    h.resolver.set_settlement(Some(68_100.0), Some(68_000.0));

    h.engine.tick().await;
    let state = h.engine.state().await;
    assert!(state.open_trades.is_empty());
    assert_eq!(state.history.len(), 1);
    assert_eq!(state.history[0].status, TradeStatus::Win);

    // Same window again: the action log blocks a duplicate entry
    h.engine.tick().await;
    let state = h.engine.state().await;
    assert!(state.open_trades.is_empty());
    assert_eq!(state.history.len(), 1);
    assert!(state.last_decision_by_asset["BTC"].starts_with("DUPLICATE_ENTRY"));
}

#[tokio::test]
async fn test_real_mode_without_wallet_skips_and_never_orders() {
    let end_ts = Utc::now().timestamp() + 60;
    let h = harness(up_market(end_ts)).await;

    h.engine
        .update_execution_config(ExecutionConfigUpdate {
            mode: ExecutionMode::Real,
            wallet_secret: String::new(),
        })
        .await;

    h.engine.tick().await;
    let state = h.engine.state().await;
    assert!(state.open_trades.is_empty());
    assert_eq!(
        state.last_decision_by_asset["BTC"],
        "REAL_MODE_NEEDS_WALLET"
    );
    assert_eq!(h.resolver.order_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_real_mode_rejection_marks_trade_rejected() {
    let end_ts = Utc::now().timestamp() + 60;
    let h = harness(up_market(end_ts)).await;
    h.resolver.set_order_result(false, "CLOB_REJECTED_INSUFFICIENT_BALANCE");

    h.engine
        .update_execution_config(ExecutionConfigUpdate {
            mode: ExecutionMode::Real,
            wallet_secret: "0xdeadbeefcafebabe".to_string(),
        })
        .await;

    h.engine.tick().await;
    let state = h.engine.state().await;
    assert_eq!(h.resolver.order_calls.load(Ordering::SeqCst), 1);
    assert!(state.open_trades.is_empty());
    assert_eq!(state.history.len(), 1);
    assert_eq!(state.history[0].status, TradeStatus::OrderRejected);
    assert_eq!(state.history[0].pnl, 0.0);
    assert_eq!(state.stats.trades, 1);
    assert_eq!(state.stats.wins, 0);
}

#[tokio::test]
async fn test_stop_loss_closes_before_window_end() {
    let end_ts = Utc::now().timestamp() + 60;
    let h = harness(up_market(end_ts)).await;

    h.engine.tick().await;
    assert_eq!(h.engine.state().await.open_trades.len(), 1);

    // Price collapses through the 20% stop
    h.prices.lock().unwrap().insert(Asset::BTC, 79.0);
    h.engine.tick().await;

    let state = h.engine.state().await;
    assert!(state.open_trades.is_empty());
    assert_eq!(state.history[0].status, TradeStatus::StopLoss);
    assert_eq!(state.history[0].pnl, -21.0);
}

#[tokio::test]
async fn test_settlement_uses_authoritative_result() {
    let end_ts = Utc::now().timestamp();
    let h = harness(up_market(end_ts)).await;
    // Final below strike: the UP trade loses regardless of spot delta
    h.resolver.set_settlement(Some(67_900.0), Some(68_000.0));

    h.engine.tick().await;
    let state = h.engine.state().await;
    assert_eq!(state.history.len(), 1);
    assert_eq!(state.history[0].status, TradeStatus::Loss);
    assert_eq!(state.stats.trades, 1);
    assert_eq!(state.stats.wins, 0);
}

#[tokio::test]
async fn test_price_unavailable_isolates_asset() {
    let end_ts = Utc::now().timestamp() + 60;
    let h = harness(up_market(end_ts)).await;

    // Enable ETH too, but the provider only prices BTC
    h.engine
        .update_strategy_config(StrategyConfig {
            enabled_assets: vec![Asset::ETH, Asset::BTC],
            enabled_indicators: vec![Indicator::PolyPrice],
            confidence_threshold: 0.9,
            entry_probability_threshold: 0.85,
            late_entry_seconds: 180,
            stop_loss_pct: 0.2,
        })
        .await
        .unwrap();

    h.engine.tick().await;
    let state = h.engine.state().await;
    assert!(state.last_decision_by_asset["ETH"].starts_with("PRICE_UNAVAILABLE"));
    // BTC still trades normally
    assert_eq!(state.open_trades.len(), 1);
    assert_eq!(state.open_trades[0].asset, Asset::BTC);
}

#[tokio::test]
async fn test_too_early_gate_blocks_entry() {
    // Window still has 10 minutes: outside the 180s late-entry window
    let end_ts = Utc::now().timestamp() + 600;
    let h = harness(up_market(end_ts)).await;

    h.engine.tick().await;
    let state = h.engine.state().await;
    assert!(state.open_trades.is_empty());
    assert!(state.last_decision_by_asset["BTC"].starts_with("TOO_EARLY"));
}

#[tokio::test]
async fn test_entry_probability_gate() {
    let end_ts = Utc::now().timestamp() + 60;
    let mut market = up_market(end_ts);
    market.yes_odds = 0.6;
    market.no_odds = 0.4;
    let h = harness(market).await;

    h.engine.tick().await;
    let state = h.engine.state().await;
    assert!(state.open_trades.is_empty());
    assert!(state.last_decision_by_asset["BTC"].starts_with("ENTRY_PROB"));
}

#[tokio::test]
async fn test_tied_odds_skip_with_trace() {
    let end_ts = Utc::now().timestamp() + 60;
    let mut market = up_market(end_ts);
    market.yes_odds = 0.5;
    market.no_odds = 0.5;
    let h = harness(market).await;

    h.engine.tick().await;
    let state = h.engine.state().await;
    assert!(state.open_trades.is_empty());
    assert!(state.last_decision_by_asset["BTC"].starts_with("NO_DOMINANT_DIRECTION"));
}

#[tokio::test]
async fn test_start_is_idempotent_and_stop_waits() {
    let end_ts = Utc::now().timestamp() + 600;
    let h = harness(up_market(end_ts)).await;

    h.engine.start().await;
    assert!(h.engine.is_running());
    // Starting again is a no-op
    h.engine.start().await;
    assert!(h.engine.is_running());

    // Wait for the periodic task to complete at least one tick
    for _ in 0..50 {
        if h.engine.tick_count() >= 1 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    assert!(h.engine.tick_count() >= 1);

    h.engine.stop().await;
    assert!(!h.engine.is_running());
}

#[tokio::test]
async fn test_snapshot_carries_provenance() {
    let end_ts = Utc::now().timestamp() + 600;
    let h = harness(up_market(end_ts)).await;

    h.engine.tick().await;
    let state = h.engine.state().await;
    let snapshot = &state.markets["BTC"];
    assert_eq!(snapshot.price_source, "SCRIPTED");
    assert_eq!(snapshot.odds_source, "GAMMA_SLUG");
    assert!(snapshot.odds_live);
    assert_eq!(snapshot.window_ts, Some(1_700_000_100));
    assert_eq!(snapshot.price_to_beat, Some(68_000.0));
    assert!((snapshot.yes_odds + snapshot.no_odds - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_route_switches_near_expiry() {
    // 30s remaining is inside the 60s gamma switchover
    let end_ts = Utc::now().timestamp() + 30;
    let h = harness(up_market(end_ts)).await;

    h.engine.tick().await;
    let state = h.engine.state().await;
    assert_eq!(state.open_trades.len(), 1);
    assert_eq!(
        state.open_trades[0].route,
        polysniper::types::ExecutionRoute::GammaApi
    );
}
