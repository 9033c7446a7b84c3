//! Trade lifecycle: opening, stop-loss monitoring, settlement, statistics
//!
//! The ledger owns every trade from open to terminal state. Stop-loss is
//! evaluated before time-based close, so a trade that is simultaneously
//! past its close time and through its stop settles as STOP_LOSS. Closed
//! trades move into a bounded history and are never mutated again.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

use crate::types::{
    Asset, BotStats, Direction, ExecutionRoute, MarketSnapshot, Signal, Trade, TradeStatus,
};

/// Closed trades retained, most recent first
const MAX_CLOSED_TRADES: usize = 200;

/// Authoritative settlement override per trade id:
/// (final price, strike, source)
pub type ResultOverrides = HashMap<String, (Option<f64>, Option<f64>, String)>;

#[derive(Debug, Default)]
pub struct TradeLedger {
    stats: BotStats,
    open_trades: HashMap<String, Trade>,
    closed_trades: Vec<Trade>,
}

impl TradeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &BotStats {
        &self.stats
    }

    pub fn open_trades(&self) -> Vec<Trade> {
        self.open_trades.values().cloned().collect()
    }

    pub fn closed_trades(&self) -> &[Trade] {
        &self.closed_trades
    }

    pub fn has_open_trade(&self, asset: Asset) -> bool {
        self.open_trades.values().any(|t| t.asset == asset)
    }

    /// Open trades whose close time has passed, for settlement lookups
    pub fn due_trades(&self, now: DateTime<Utc>) -> Vec<Trade> {
        self.open_trades
            .values()
            .filter(|t| now >= t.closes_at)
            .cloned()
            .collect()
    }

    /// Recompute the execution route of every open trade from its own
    /// close time
    pub fn update_routes(&mut self, decide: impl Fn(DateTime<Utc>) -> ExecutionRoute) {
        for trade in self.open_trades.values_mut() {
            trade.route = decide(trade.closes_at);
        }
    }

    /// Create an OPEN trade from the snapshot and signal.
    ///
    /// The caller guarantees there is no open trade for the asset.
    pub fn open(
        &mut self,
        snapshot: &MarketSnapshot,
        signal: &Signal,
        route: ExecutionRoute,
        closes_at: DateTime<Utc>,
        stop_loss_pct: f64,
    ) -> Trade {
        let trade = Trade {
            id: short_id(),
            asset: snapshot.asset,
            direction: signal.direction,
            entry_price: snapshot.spot_price,
            exit_price: None,
            confidence: signal.confidence,
            route,
            opened_at: Utc::now(),
            closes_at,
            closed_at: None,
            pnl: 0.0,
            status: TradeStatus::Open,
            stop_loss_pct,
            market_id: snapshot.market_id.clone(),
            window_ts: snapshot.window_ts,
            market_end_ts: snapshot.market_end_ts,
            price_to_beat: snapshot.price_to_beat,
        };
        info!(
            id = %trade.id,
            asset = %trade.asset,
            direction = %trade.direction,
            entry = trade.entry_price,
            confidence = trade.confidence,
            "trade opened"
        );
        self.open_trades.insert(trade.id.clone(), trade.clone());
        trade
    }

    /// Terminal rejection: the order never reached the venue's book.
    ///
    /// The trade is closed flat immediately and counts toward the trade
    /// total but never toward wins.
    pub fn mark_rejected(&mut self, trade_id: &str) -> Option<Trade> {
        let mut trade = self.open_trades.remove(trade_id)?;
        trade.status = TradeStatus::OrderRejected;
        trade.exit_price = Some(trade.entry_price);
        trade.closed_at = Some(Utc::now());
        trade.pnl = 0.0;
        self.stats.trades += 1;
        info!(id = %trade.id, asset = %trade.asset, "trade order rejected");
        self.push_closed(trade.clone());
        Some(trade)
    }

    /// Settle every open trade that hit its stop or reached its close time.
    ///
    /// Trades whose asset has no snapshot this tick are skipped untouched.
    pub fn settle(
        &mut self,
        latest: &HashMap<Asset, MarketSnapshot>,
        overrides: &ResultOverrides,
    ) -> Vec<Trade> {
        let now = Utc::now();
        let mut settled = Vec::new();

        let ids: Vec<String> = self.open_trades.keys().cloned().collect();
        for id in ids {
            let Some(trade) = self.open_trades.get(&id) else {
                continue;
            };
            let Some(snapshot) = latest.get(&trade.asset) else {
                continue;
            };
            let exit = snapshot.spot_price;
            let snapshot_result = (snapshot.final_price, snapshot.price_to_beat);

            // Stop-loss first, time close second
            let stop_hit = is_stop_hit(trade, exit);
            let time_due = now >= trade.closes_at;
            if !stop_hit && !time_due {
                continue;
            }

            let Some(mut trade) = self.open_trades.remove(&id) else {
                continue;
            };
            trade.exit_price = Some(exit);
            trade.closed_at = Some(now);

            if stop_hit {
                trade.pnl = directional_delta(&trade, exit);
                trade.status = TradeStatus::StopLoss;
            } else {
                let (final_price, strike) = match overrides.get(&trade.id) {
                    Some((final_price, strike, _source)) => (*final_price, *strike),
                    None => snapshot_result,
                };
                match (final_price, strike) {
                    (Some(final_price), Some(strike)) => {
                        let up_result = final_price > strike;
                        let won = match trade.direction {
                            Direction::Up => up_result,
                            Direction::Down => !up_result,
                        };
                        let magnitude = (exit - trade.entry_price).abs();
                        trade.pnl = if won { magnitude } else { -magnitude };
                        trade.status = if won {
                            TradeStatus::Win
                        } else {
                            TradeStatus::Loss
                        };
                    }
                    _ => {
                        trade.pnl = directional_delta(&trade, exit);
                        trade.status = if trade.pnl > 0.0 {
                            TradeStatus::Win
                        } else {
                            TradeStatus::Loss
                        };
                    }
                }
            }

            self.stats.trades += 1;
            self.stats.all_time_pnl += trade.pnl;
            self.stats.today_pnl += trade.pnl;
            self.stats.balance += trade.pnl;
            if trade.status == TradeStatus::Win {
                self.stats.wins += 1;
            }

            info!(
                id = %trade.id,
                asset = %trade.asset,
                status = %trade.status,
                pnl = trade.pnl,
                "trade settled"
            );
            self.push_closed(trade.clone());
            settled.push(trade);
        }

        settled
    }

    fn push_closed(&mut self, trade: Trade) {
        self.closed_trades.insert(0, trade);
        self.closed_trades.truncate(MAX_CLOSED_TRADES);
    }
}

/// Signed PnL as spot movement in the trade's direction
fn directional_delta(trade: &Trade, exit: f64) -> f64 {
    let delta = exit - trade.entry_price;
    match trade.direction {
        Direction::Up => delta,
        Direction::Down => -delta,
    }
}

fn is_stop_hit(trade: &Trade, price: f64) -> bool {
    if trade.stop_loss_pct <= 0.0 {
        return false;
    }
    match trade.direction {
        Direction::Up => price <= trade.entry_price * (1.0 - trade.stop_loss_pct),
        Direction::Down => price >= trade.entry_price * (1.0 + trade.stop_loss_pct),
    }
}

fn short_id() -> String {
    Uuid::new_v4().to_string()[..8].to_string()
}
