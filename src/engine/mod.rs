//! Control loop: one tick per cadence, per-asset isolation, entry gating
//!
//! The engine is constructed once at process start with injected
//! collaborators and drives everything else. Each tick fetches the price
//! batch up front, then processes every enabled asset under that asset's
//! own lock so a manual trigger can never race the periodic task on the
//! same asset. One asset's failure is recorded as a decision trace and
//! never stalls the others.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::actionlog::{ActionLog, ACTION_ENTRY};
use crate::config::{
    ConfigError, ExecutionConfig, ExecutionConfigUpdate, ExecutionConfigView, ExecutionMode,
    StrategyConfig,
};
use crate::executor::{ResultOverrides, TradeLedger};
use crate::indicators::{IndicatorEngine, WARMUP_POINTS};
use crate::market::{current_window_ts, build_window_slug, MarketDataSource, WINDOW_SECS};
use crate::prices::PriceAggregator;
use crate::strategy::SignalGenerator;
use crate::types::{Asset, Direction, ExecutionRoute, MarketSnapshot, Trade};

/// Engine tuning, lifted from [`crate::config::EngineConfig`]
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub poll_interval_seconds: u64,
    pub trade_duration_seconds: i64,
    pub switch_to_gamma_seconds: i64,
    pub order_amount_usd: f64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 1,
            trade_duration_seconds: 900,
            switch_to_gamma_seconds: 60,
            order_amount_usd: 10.0,
        }
    }
}

/// Genuine per-asset failure; gate skips are plain traces instead
#[derive(Debug, Error)]
pub enum TickError {
    #[error("ACTION_LOG: {0}")]
    ActionLog(String),
}

/// Derived statistics view for the control surface
#[derive(Debug, Clone, Serialize)]
pub struct StatsView {
    pub balance: f64,
    pub today_pnl: f64,
    pub all_time_pnl: f64,
    pub trades: u64,
    pub wins: u64,
    pub win_rate: f64,
    pub avg_pnl: f64,
}

/// Full state snapshot served by `GET /api/state`
#[derive(Debug, Clone, Serialize)]
pub struct EngineState {
    pub stats: StatsView,
    pub config: StrategyConfig,
    pub execution: ExecutionConfigView,
    pub running: bool,
    pub tick_count: u64,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub last_decision_by_asset: HashMap<String, String>,
    pub window_seconds_remaining: i64,
    pub markets: HashMap<String, MarketSnapshot>,
    pub open_trades: Vec<Trade>,
    pub history: Vec<Trade>,
}

pub struct Engine {
    aggregator: Arc<PriceAggregator>,
    resolver: Arc<dyn MarketDataSource>,
    ledger: Mutex<TradeLedger>,
    action_log: Mutex<ActionLog>,
    indicators: Mutex<IndicatorEngine>,
    strategy_config: RwLock<StrategyConfig>,
    execution_config: RwLock<ExecutionConfig>,
    snapshots: RwLock<HashMap<Asset, MarketSnapshot>>,
    decisions: RwLock<HashMap<Asset, String>>,
    /// One lock per asset, held for that asset's processing block only
    asset_locks: HashMap<Asset, Mutex<()>>,
    running: AtomicBool,
    tick_count: AtomicU64,
    last_tick_at: RwLock<Option<DateTime<Utc>>>,
    loop_task: Mutex<Option<JoinHandle<()>>>,
    options: EngineOptions,
}

impl Engine {
    pub fn new(
        aggregator: Arc<PriceAggregator>,
        resolver: Arc<dyn MarketDataSource>,
        action_log: ActionLog,
        options: EngineOptions,
    ) -> Self {
        let asset_locks = Asset::ALL
            .iter()
            .map(|asset| (*asset, Mutex::new(())))
            .collect();
        Self {
            aggregator,
            resolver,
            ledger: Mutex::new(TradeLedger::new()),
            action_log: Mutex::new(action_log),
            indicators: Mutex::new(IndicatorEngine::new()),
            strategy_config: RwLock::new(StrategyConfig::default()),
            execution_config: RwLock::new(ExecutionConfig::default()),
            snapshots: RwLock::new(HashMap::new()),
            decisions: RwLock::new(HashMap::new()),
            asset_locks,
            running: AtomicBool::new(false),
            tick_count: AtomicU64::new(0),
            last_tick_at: RwLock::new(None),
            loop_task: Mutex::new(None),
            options,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count.load(Ordering::SeqCst)
    }

    /// Start the periodic loop; a no-op when already running
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("engine started");
        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while engine.running.load(Ordering::SeqCst) {
                engine.tick().await;
                tokio::time::sleep(std::time::Duration::from_secs(
                    engine.options.poll_interval_seconds,
                ))
                .await;
            }
        });
        *self.loop_task.lock().await = Some(handle);
    }

    /// Cooperative stop: the in-flight tick completes before this returns
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.loop_task.lock().await.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "loop task join failed");
            }
        }
        info!("engine stopped");
    }

    /// Execute one full cycle. Manual invocations run this same body and
    /// rely on the per-asset locks for mutual exclusion.
    pub async fn tick(&self) {
        let config = self.strategy_config.read().await.clone();
        let quotes = self.aggregator.fetch_spots(&config.enabled_assets).await;

        for asset in &config.enabled_assets {
            let _guard = self.asset_locks[asset].lock().await;
            let trace = match self.process_asset(*asset, &config, &quotes).await {
                Ok(trace) => trace,
                Err(err) => {
                    warn!(%asset, error = %err, "asset processing failed");
                    format!("ERROR {err}")
                }
            };
            self.decisions.write().await.insert(*asset, trace);
        }

        self.settle_phase().await;

        *self.last_tick_at.write().await = Some(Utc::now());
        self.tick_count.fetch_add(1, Ordering::SeqCst);
    }

    async fn process_asset(
        &self,
        asset: Asset,
        config: &StrategyConfig,
        quotes: &HashMap<Asset, crate::prices::SpotQuote>,
    ) -> Result<String, TickError> {
        let Some(quote) = quotes.get(&asset) else {
            return Ok("PRICE_UNAVAILABLE no quote for asset".to_string());
        };
        // A zero price is a placeholder, not data; skip the tick entirely
        if quote.price <= 0.0 {
            return Ok(format!("PRICE_UNAVAILABLE source={}", quote.source));
        }

        {
            let mut indicators = self.indicators.lock().await;
            indicators.warmup(asset, quote.price, WARMUP_POINTS);
            indicators.push_price(asset, quote.price);
        }

        let market = self.resolver.fetch_market_data(asset).await;
        let now = Utc::now();
        let closes_at = market
            .market_end_ts
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .unwrap_or(now + ChronoDuration::seconds(self.options.trade_duration_seconds));
        let remaining = (closes_at - now).num_seconds();
        let route = self.decide_route(closes_at);

        let snapshot = MarketSnapshot {
            asset,
            spot_price: quote.price,
            change_24h: quote.change_24h,
            yes_odds: market.yes_odds,
            no_odds: market.no_odds,
            odds_source: market.odds_source.clone(),
            odds_live: market.odds_live,
            price_source: quote.source.clone(),
            price_age_seconds: self.aggregator.staleness_seconds(asset).await,
            market_id: market.market_id.clone(),
            market_slug: market.market_slug.clone(),
            window_ts: market.window_ts,
            market_end_ts: market.market_end_ts,
            price_to_beat: market.price_to_beat,
            final_price: market.final_price,
            timestamp: now,
        };
        self.snapshots.write().await.insert(asset, snapshot.clone());

        // Market-implied dominant direction; a true tie has none
        let bias = if market.yes_odds > market.no_odds {
            Direction::Up
        } else if market.no_odds > market.yes_odds {
            Direction::Down
        } else {
            return Ok("NO_DOMINANT_DIRECTION odds tied".to_string());
        };
        let dominant_prob = market.yes_odds.max(market.no_odds);

        let (signal, signal_trace) = {
            let indicators = self.indicators.lock().await;
            let generator = SignalGenerator::new(config.confidence_threshold);
            generator.generate_signal(&indicators, asset, &config.enabled_indicators, bias)
        };
        let Some(signal) = signal else {
            return Ok(signal_trace);
        };

        // Entry gating. The wallet precondition is independent of the
        // other gates and blocks the asset outright in REAL mode.
        let execution = self.execution_config.read().await.clone();
        if execution.mode == ExecutionMode::Real && !execution.wallet_configured() {
            return Ok("REAL_MODE_NEEDS_WALLET".to_string());
        }
        if self.ledger.lock().await.has_open_trade(asset) {
            return Ok(format!("HOLDING open trade ({signal_trace})"));
        }
        if remaining > config.late_entry_seconds {
            return Ok(format!(
                "TOO_EARLY remaining={remaining}s > {}s",
                config.late_entry_seconds
            ));
        }
        if dominant_prob < config.entry_probability_threshold {
            return Ok(format!(
                "ENTRY_PROB {dominant_prob:.2} < {:.2}",
                config.entry_probability_threshold
            ));
        }
        let window_ts = market
            .window_ts
            .unwrap_or_else(|| current_window_ts(now.timestamp()));
        {
            let log = self.action_log.lock().await;
            if log.contains(asset, window_ts, ACTION_ENTRY) {
                return Ok(format!("DUPLICATE_ENTRY window={window_ts}"));
            }
        }

        // All gates passed: open, optionally execute, record the action
        let trade = self.ledger.lock().await.open(
            &snapshot,
            &signal,
            route,
            closes_at,
            config.stop_loss_pct,
        );

        let mut order_note = String::new();
        if execution.mode == ExecutionMode::Real {
            let (accepted, reason) = self
                .resolver
                .place_order(
                    &market,
                    signal.direction,
                    self.options.order_amount_usd,
                    execution.wallet_secret(),
                )
                .await;
            if !accepted {
                self.ledger.lock().await.mark_rejected(&trade.id);
            }
            order_note = format!(" order={reason}");
        }

        self.action_log
            .lock()
            .await
            .record(ACTION_ENTRY, asset, window_ts, &market.odds_source)
            .await
            .map_err(|err| TickError::ActionLog(err.to_string()))?;

        Ok(format!(
            "ENTERED {} conf={:.2} window={window_ts}{order_note}",
            signal.direction, signal.confidence
        ))
    }

    /// Tail of the tick: route refresh, settlement lookups, settlement
    async fn settle_phase(&self) {
        let now = Utc::now();
        let mut ledger = self.ledger.lock().await;
        ledger.update_routes(|closes_at| self.decide_route(closes_at));

        let due = ledger.due_trades(now);
        drop(ledger);

        let mut overrides = ResultOverrides::new();
        for trade in due {
            let slug = trade
                .window_ts
                .map(|ts| build_window_slug(trade.asset, ts))
                .unwrap_or_default();
            let (final_price, strike, source) = self
                .resolver
                .fetch_market_result(&trade.market_id, &slug)
                .await;
            if final_price.is_some() || strike.is_some() {
                overrides.insert(trade.id.clone(), (final_price, strike, source));
            }
        }

        let snapshots = self.snapshots.read().await.clone();
        self.ledger.lock().await.settle(&snapshots, &overrides);
    }

    fn decide_route(&self, closes_at: DateTime<Utc>) -> ExecutionRoute {
        let remaining = (closes_at - Utc::now()).num_seconds();
        if remaining > self.options.switch_to_gamma_seconds {
            ExecutionRoute::Clob
        } else {
            ExecutionRoute::GammaApi
        }
    }

    // ── Control surface ──────────────────────────────────────────────

    pub async fn strategy_config(&self) -> StrategyConfig {
        self.strategy_config.read().await.clone()
    }

    /// Validate and replace the strategy config; rejection leaves the
    /// previous config untouched
    pub async fn update_strategy_config(
        &self,
        config: StrategyConfig,
    ) -> Result<StrategyConfig, ConfigError> {
        config.validate()?;
        *self.strategy_config.write().await = config.clone();
        info!(?config, "strategy config updated");
        Ok(config)
    }

    pub async fn execution_config_view(&self) -> ExecutionConfigView {
        self.execution_config.read().await.view()
    }

    pub async fn update_execution_config(
        &self,
        update: ExecutionConfigUpdate,
    ) -> ExecutionConfigView {
        let mut config = self.execution_config.write().await;
        config.apply(update);
        info!(mode = ?config.mode, configured = config.wallet_configured(), "execution config updated");
        config.view()
    }

    pub async fn last_tick_at(&self) -> Option<DateTime<Utc>> {
        *self.last_tick_at.read().await
    }

    pub async fn state(&self) -> EngineState {
        let ledger = self.ledger.lock().await;
        let stats = ledger.stats();
        let stats_view = StatsView {
            balance: stats.balance,
            today_pnl: stats.today_pnl,
            all_time_pnl: stats.all_time_pnl,
            trades: stats.trades,
            wins: stats.wins,
            win_rate: stats.win_rate(),
            avg_pnl: stats.avg_pnl(),
        };
        let open_trades = ledger.open_trades();
        let history = ledger.closed_trades().to_vec();
        drop(ledger);

        let now = Utc::now().timestamp();
        EngineState {
            stats: stats_view,
            config: self.strategy_config.read().await.clone(),
            execution: self.execution_config.read().await.view(),
            running: self.is_running(),
            tick_count: self.tick_count(),
            last_tick_at: self.last_tick_at().await,
            last_decision_by_asset: self
                .decisions
                .read()
                .await
                .iter()
                .map(|(asset, trace)| (asset.to_string(), trace.clone()))
                .collect(),
            window_seconds_remaining: (current_window_ts(now) + WINDOW_SECS - now).max(0),
            markets: self
                .snapshots
                .read()
                .await
                .iter()
                .map(|(asset, snapshot)| (asset.to_string(), snapshot.clone()))
                .collect(),
            open_trades,
            history,
        }
    }
}
