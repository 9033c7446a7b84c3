//! Indicator engine: bounded per-asset price history and directional bias
//!
//! Keeps at most 300 observations per asset. Crossover indicators need 30
//! points, which at one tick per second would mean half a minute of blind
//! time after every restart; `warmup` seeds a deterministic oscillation
//! around the first real price so they can vote immediately.

use std::collections::HashMap;

use crate::types::{Asset, Direction};

/// Maximum history length per asset; oldest points are dropped
const MAX_HISTORY: usize = 300;
/// Points required by the crossover indicators
const MIN_CROSSOVER_POINTS: usize = 30;
/// Default number of points `warmup` guarantees
pub const WARMUP_POINTS: usize = 40;
/// Relative amplitude of the synthetic warmup oscillation
const WARMUP_AMPLITUDE: f64 = 0.0015;

#[derive(Debug, Default)]
pub struct IndicatorEngine {
    history: HashMap<Asset, Vec<f64>>,
}

impl IndicatorEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a real observation, evicting the oldest beyond the cap
    pub fn push_price(&mut self, asset: Asset, price: f64) {
        let history = self.history.entry(asset).or_default();
        history.push(price);
        if history.len() > MAX_HISTORY {
            let excess = history.len() - MAX_HISTORY;
            history.drain(..excess);
        }
    }

    /// Seed the history with a deterministic oscillation around
    /// `base_price` until it holds at least `points` entries.
    ///
    /// Cold-start mitigation only: real pushes take over immediately and
    /// the synthetic points age out of the bounded history.
    pub fn warmup(&mut self, asset: Asset, base_price: f64, points: usize) {
        if base_price <= 0.0 {
            return;
        }
        let history = self.history.entry(asset).or_default();
        let mut i = history.len();
        while history.len() < points {
            // Alternating ±amplitude wave, scaled by position for variety
            let phase = if i % 2 == 0 { 1.0 } else { -1.0 };
            let scale = 1.0 + phase * WARMUP_AMPLITUDE * ((i % 5) as f64 + 1.0) / 5.0;
            history.push(base_price * scale);
            i += 1;
        }
    }

    pub fn history_len(&self, asset: Asset) -> usize {
        self.history.get(&asset).map_or(0, Vec::len)
    }

    /// Simple moving-average crossover: sma(10) vs sma(30)
    pub fn trend_bias(&self, asset: Asset) -> Option<Direction> {
        let prices = self.history.get(&asset)?;
        if prices.len() < MIN_CROSSOVER_POINTS {
            return None;
        }
        let sma_short = mean(&prices[prices.len() - 10..]);
        let sma_long = mean(&prices[prices.len() - 30..]);
        Some(if sma_short >= sma_long {
            Direction::Up
        } else {
            Direction::Down
        })
    }

    /// MACD-style crossover: ema(12) - ema(26) against a 9-period signal
    /// line computed over the historical difference series
    pub fn trend_following_bias(&self, asset: Asset) -> Option<Direction> {
        let prices = self.history.get(&asset)?;
        if prices.len() < MIN_CROSSOVER_POINTS {
            return None;
        }
        let macd_line = ema(prices, 12) - ema(prices, 26);
        let diff_series: Vec<f64> = (27..=prices.len())
            .map(|i| ema(&prices[..i], 12) - ema(&prices[..i], 26))
            .collect();
        let signal_line = ema(&diff_series, 9);
        Some(if macd_line >= signal_line {
            Direction::Up
        } else {
            Direction::Down
        })
    }

    /// Percentage change over `lookback` points, scaled by 100 and clamped
    /// to [-1, 1]
    pub fn momentum(&self, asset: Asset, lookback: usize) -> Option<f64> {
        let prices = self.history.get(&asset)?;
        if prices.len() <= lookback {
            return None;
        }
        let newest = *prices.last()?;
        let past = prices[prices.len() - 1 - lookback];
        if past == 0.0 {
            return None;
        }
        let pct = (newest - past) / past * 100.0;
        Some(pct.clamp(-1.0, 1.0))
    }

    /// Momentum as a directional vote
    pub fn momentum_bias(&self, asset: Asset) -> Option<Direction> {
        self.momentum(asset, 10).map(|m| {
            if m >= 0.0 {
                Direction::Up
            } else {
                Direction::Down
            }
        })
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Recursive EMA over the whole series, seeded with the first value
fn ema(values: &[f64], period: usize) -> f64 {
    let Some(&first) = values.first() else {
        return 0.0;
    };
    let k = 2.0 / (period as f64 + 1.0);
    values[1..]
        .iter()
        .fold(first, |acc, &value| value * k + acc * (1.0 - k))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with_prices(asset: Asset, prices: impl IntoIterator<Item = f64>) -> IndicatorEngine {
        let mut engine = IndicatorEngine::new();
        for price in prices {
            engine.push_price(asset, price);
        }
        engine
    }

    #[test]
    fn test_history_bounded_at_cap() {
        let mut engine = IndicatorEngine::new();
        for i in 0..400 {
            engine.push_price(Asset::BTC, i as f64);
        }
        assert_eq!(engine.history_len(Asset::BTC), 300);
        // Oldest entries were evicted
        assert_eq!(engine.history.get(&Asset::BTC).unwrap()[0], 100.0);
    }

    #[test]
    fn test_warmup_fills_to_requested_points() {
        let mut engine = IndicatorEngine::new();
        engine.warmup(Asset::ETH, 3500.0, WARMUP_POINTS);
        assert_eq!(engine.history_len(Asset::ETH), WARMUP_POINTS);
        // All synthetic points stay near the base price
        assert!(engine
            .history
            .get(&Asset::ETH)
            .unwrap()
            .iter()
            .all(|p| (p - 3500.0).abs() / 3500.0 < 0.01));
    }

    #[test]
    fn test_warmup_is_noop_when_enough_history() {
        let mut engine = engine_with_prices(Asset::BTC, (0..50).map(|i| 100.0 + i as f64));
        engine.warmup(Asset::BTC, 100.0, WARMUP_POINTS);
        assert_eq!(engine.history_len(Asset::BTC), 50);
    }

    #[test]
    fn test_warmup_ignores_zero_base_price() {
        let mut engine = IndicatorEngine::new();
        engine.warmup(Asset::BTC, 0.0, WARMUP_POINTS);
        assert_eq!(engine.history_len(Asset::BTC), 0);
    }

    #[test]
    fn test_trend_bias_needs_30_points() {
        let engine = engine_with_prices(Asset::BTC, (0..29).map(|i| 100.0 + i as f64));
        assert_eq!(engine.trend_bias(Asset::BTC), None);

        let engine = engine_with_prices(Asset::BTC, (0..30).map(|i| 100.0 + i as f64));
        assert_eq!(engine.trend_bias(Asset::BTC), Some(Direction::Up));
    }

    #[test]
    fn test_trend_bias_down_on_falling_series() {
        let engine = engine_with_prices(Asset::BTC, (0..40).map(|i| 200.0 - i as f64));
        assert_eq!(engine.trend_bias(Asset::BTC), Some(Direction::Down));
    }

    #[test]
    fn test_macd_bias_follows_trend() {
        let rising = engine_with_prices(Asset::BTC, (0..40).map(|i| 100.0 + 2.0 * i as f64));
        assert_eq!(rising.trend_following_bias(Asset::BTC), Some(Direction::Up));

        let falling = engine_with_prices(Asset::BTC, (0..40).map(|i| 300.0 - 2.0 * i as f64));
        assert_eq!(
            falling.trend_following_bias(Asset::BTC),
            Some(Direction::Down)
        );
    }

    #[test]
    fn test_momentum_clamped() {
        // +50% over 10 points clamps to 1.0
        let mut engine = IndicatorEngine::new();
        for _ in 0..10 {
            engine.push_price(Asset::SOL, 100.0);
        }
        engine.push_price(Asset::SOL, 150.0);
        assert_eq!(engine.momentum(Asset::SOL, 10), Some(1.0));

        let mut engine = IndicatorEngine::new();
        for _ in 0..10 {
            engine.push_price(Asset::SOL, 100.0);
        }
        engine.push_price(Asset::SOL, 100.5);
        let m = engine.momentum(Asset::SOL, 10).unwrap();
        assert!((m - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_momentum_insufficient_history() {
        let engine = engine_with_prices(Asset::SOL, [100.0, 101.0]);
        assert_eq!(engine.momentum(Asset::SOL, 10), None);
    }

    #[test]
    fn test_momentum_bias_direction() {
        let mut engine = IndicatorEngine::new();
        for i in 0..=10 {
            engine.push_price(Asset::BTC, 100.0 + i as f64 * 0.01);
        }
        assert_eq!(engine.momentum_bias(Asset::BTC), Some(Direction::Up));

        let mut engine = IndicatorEngine::new();
        for i in 0..=10 {
            engine.push_price(Asset::BTC, 100.0 - i as f64 * 0.01);
        }
        assert_eq!(engine.momentum_bias(Asset::BTC), Some(Direction::Down));
    }
}
