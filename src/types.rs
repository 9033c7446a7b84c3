//! Core types used throughout PolySniper
//!
//! Defines common data structures for prices, markets, signals and trades.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported trading assets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Asset {
    BTC,
    ETH,
    SOL,
}

impl Default for Asset {
    fn default() -> Self {
        Asset::BTC
    }
}

impl Asset {
    /// All assets, in canonical order
    pub const ALL: [Asset; 3] = [Asset::BTC, Asset::ETH, Asset::SOL];

    /// CoinGecko coin id
    pub fn coingecko_id(&self) -> &'static str {
        match self {
            Asset::BTC => "bitcoin",
            Asset::ETH => "ethereum",
            Asset::SOL => "solana",
        }
    }

    /// Trading pair for Binance (e.g., "BTCUSDT")
    pub fn binance_pair(&self) -> &'static str {
        match self {
            Asset::BTC => "BTCUSDT",
            Asset::ETH => "ETHUSDT",
            Asset::SOL => "SOLUSDT",
        }
    }

    /// Trading pair for Coinbase (e.g., "BTC-USD")
    pub fn coinbase_pair(&self) -> &'static str {
        match self {
            Asset::BTC => "BTC-USD",
            Asset::ETH => "ETH-USD",
            Asset::SOL => "SOL-USD",
        }
    }

    /// Slug prefix for Polymarket up/down markets (lowercase)
    pub fn slug_prefix(&self) -> &'static str {
        match self {
            Asset::BTC => "btc",
            Asset::ETH => "eth",
            Asset::SOL => "sol",
        }
    }

    /// Terms that identify this asset in a market title
    pub fn title_aliases(&self) -> &'static [&'static str] {
        match self {
            Asset::BTC => &["btc", "bitcoin"],
            Asset::ETH => &["eth", "ethereum"],
            Asset::SOL => &["sol", "solana"],
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "BTC" => Some(Asset::BTC),
            "ETH" => Some(Asset::ETH),
            "SOL" => Some(Asset::SOL),
            _ => None,
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Asset::BTC => write!(f, "BTC"),
            Asset::ETH => write!(f, "ETH"),
            Asset::SOL => write!(f, "SOL"),
        }
    }
}

/// Trading direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "UP"),
            Direction::Down => write!(f, "DOWN"),
        }
    }
}

/// Indicators that can vote on a direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Indicator {
    #[serde(rename = "MACD")]
    Macd,
    #[serde(rename = "TREND")]
    Trend,
    #[serde(rename = "POLY_PRICE")]
    PolyPrice,
    #[serde(rename = "MOMENTUM")]
    Momentum,
}

impl fmt::Display for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Indicator::Macd => write!(f, "MACD"),
            Indicator::Trend => write!(f, "TREND"),
            Indicator::PolyPrice => write!(f, "POLY_PRICE"),
            Indicator::Momentum => write!(f, "MOMENTUM"),
        }
    }
}

/// Execution routing mode for a trade.
///
/// CLOB is used while the window still has time left; the Gamma settlement
/// API takes over near expiry where CLOB quotes go thin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionRoute {
    #[serde(rename = "CLOB")]
    Clob,
    #[serde(rename = "GAMMA_API")]
    GammaApi,
}

impl fmt::Display for ExecutionRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionRoute::Clob => write!(f, "CLOB"),
            ExecutionRoute::GammaApi => write!(f, "GAMMA_API"),
        }
    }
}

/// Per-asset, per-tick immutable view of spot price and market odds.
///
/// Created once per asset per tick and superseded by the next tick's
/// snapshot; never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub asset: Asset,
    /// Spot price in USD; 0.0 means "no data yet", not a real price
    pub spot_price: f64,
    pub change_24h: f64,
    /// Implied probability of the UP outcome, clamped to [0.01, 0.99]
    pub yes_odds: f64,
    /// Complement of yes_odds
    pub no_odds: f64,
    /// Which source produced the odds (GAMMA_SLUG, GAMMA_SEARCH, FALLBACK, ...)
    pub odds_source: String,
    /// Whether the odds came from a live quote rather than a fallback
    pub odds_live: bool,
    /// Which provider produced the spot price (COINGECKO, BINANCE, ...)
    pub price_source: String,
    /// Whole seconds since the spot price was last refreshed
    pub price_age_seconds: Option<i64>,
    pub market_id: String,
    pub market_slug: String,
    /// Window start, aligned to 900s boundaries
    pub window_ts: Option<i64>,
    /// Window close (market end) as epoch seconds
    pub market_end_ts: Option<i64>,
    /// Strike price the window settles against
    pub price_to_beat: Option<f64>,
    /// Settlement price, populated only after window close
    pub final_price: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Directional signal produced by the strategy.
///
/// Ephemeral: consumed by the trade-open decision on the same tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub asset: Asset,
    pub direction: Direction,
    /// Consensus confidence in [0, 1]
    pub confidence: f64,
    /// Human-readable vote trace
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Trade lifecycle states. Everything except `Open` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    #[serde(rename = "OPEN")]
    Open,
    #[serde(rename = "WIN")]
    Win,
    #[serde(rename = "LOSS")]
    Loss,
    #[serde(rename = "STOP_LOSS")]
    StopLoss,
    #[serde(rename = "ORDER_REJECTED")]
    OrderRejected,
}

impl TradeStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TradeStatus::Open)
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeStatus::Open => write!(f, "OPEN"),
            TradeStatus::Win => write!(f, "WIN"),
            TradeStatus::Loss => write!(f, "LOSS"),
            TradeStatus::StopLoss => write!(f, "STOP_LOSS"),
            TradeStatus::OrderRejected => write!(f, "ORDER_REJECTED"),
        }
    }
}

/// Trade record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    /// Short unique token (uuid v4 prefix)
    pub id: String,
    pub asset: Asset,
    pub direction: Direction,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    /// Signal confidence at entry
    pub confidence: f64,
    /// Execution routing mode, recomputed as the window ages
    pub route: ExecutionRoute,
    pub opened_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    /// Signed PnL, 0 until settled
    pub pnl: f64,
    pub status: TradeStatus,
    /// Stop-loss fraction of entry price; 0 disables the stop
    pub stop_loss_pct: f64,
    pub market_id: String,
    pub window_ts: Option<i64>,
    pub market_end_ts: Option<i64>,
    pub price_to_beat: Option<f64>,
}

/// Running aggregate statistics, mutated only at settlement time
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotStats {
    pub balance: f64,
    pub today_pnl: f64,
    pub all_time_pnl: f64,
    pub trades: u64,
    pub wins: u64,
}

impl BotStats {
    /// Wins over total settled trades
    pub fn win_rate(&self) -> f64 {
        if self.trades == 0 {
            0.0
        } else {
            self.wins as f64 / self.trades as f64
        }
    }

    /// All-time PnL per settled trade
    pub fn avg_pnl(&self) -> f64 {
        if self.trades == 0 {
            0.0
        } else {
            self.all_time_pnl / self.trades as f64
        }
    }
}

/// Resolved market data for one asset window.
///
/// Internal to the resolver; the control loop projects it into a
/// [`MarketSnapshot`] together with the spot quote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketData {
    pub market_id: String,
    pub market_slug: String,
    pub window_ts: Option<i64>,
    pub yes_odds: f64,
    pub no_odds: f64,
    /// Source of the odds (GAMMA_SLUG, GAMMA_REF, GAMMA_SEARCH, FALLBACK)
    pub odds_source: String,
    /// Which resolution strategy produced this market
    pub resolved_by: String,
    pub odds_live: bool,
    pub market_end_ts: Option<i64>,
    pub price_to_beat: Option<f64>,
    pub final_price: Option<f64>,
    /// CLOB token id for the UP outcome, if routable
    pub token_up: Option<String>,
    /// CLOB token id for the DOWN outcome, if routable
    pub token_down: Option<String>,
    /// Attempts spent before this result was produced
    pub retries: u32,
}

impl MarketData {
    pub fn token_for_direction(&self, direction: Direction) -> Option<&str> {
        match direction {
            Direction::Up => self.token_up.as_deref(),
            Direction::Down => self.token_down.as_deref(),
        }
    }
}

/// One record of the append-only idempotency log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionLogEntry {
    /// Action kind, e.g. "ENTRY"
    pub action: String,
    pub asset: Asset,
    pub window_ts: i64,
    /// Which source triggered the action
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

impl ActionLogEntry {
    /// Dedupe key `ASSET:window:action` used to guard against repeats
    pub fn dedupe_key(&self) -> String {
        format!("{}:{}:{}", self.asset, self.window_ts, self.action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_parse_roundtrip() {
        for asset in Asset::ALL {
            assert_eq!(Asset::parse(&asset.to_string()), Some(asset));
        }
        assert_eq!(Asset::parse("xrp"), None);
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::Up.to_string(), "UP");
        assert_eq!(Direction::Down.to_string(), "DOWN");
    }

    #[test]
    fn test_indicator_serde_names() {
        let json = serde_json::to_string(&Indicator::PolyPrice).unwrap();
        assert_eq!(json, "\"POLY_PRICE\"");
        let back: Indicator = serde_json::from_str("\"MACD\"").unwrap();
        assert_eq!(back, Indicator::Macd);
    }

    #[test]
    fn test_action_log_dedupe_key() {
        let entry = ActionLogEntry {
            action: "ENTRY".to_string(),
            asset: Asset::BTC,
            window_ts: 1_700_000_100,
            source: "ENGINE".to_string(),
            timestamp: Utc::now(),
        };
        assert_eq!(entry.dedupe_key(), "BTC:1700000100:ENTRY");
    }

    #[test]
    fn test_stats_derived_values() {
        let mut stats = BotStats::default();
        assert_eq!(stats.win_rate(), 0.0);
        assert_eq!(stats.avg_pnl(), 0.0);
        stats.trades = 4;
        stats.wins = 3;
        stats.all_time_pnl = 10.0;
        assert_eq!(stats.win_rate(), 0.75);
        assert_eq!(stats.avg_pnl(), 2.5);
    }
}
