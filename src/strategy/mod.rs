//! Consensus signal generation
//!
//! Each enabled indicator casts a directional vote; the plurality wins.
//! A 3-vote 2-1 split is treated as high-confidence consensus (0.9)
//! regardless of which two agree. Any indicator that cannot vote yet
//! aborts the signal with a "waiting" trace instead of emitting a partial
//! consensus.

use chrono::Utc;
use tracing::debug;

use crate::indicators::IndicatorEngine;
use crate::types::{Asset, Direction, Indicator, Signal};

/// Confidence assigned to a 2-1 split across exactly three votes
const SPLIT_CONSENSUS_CONFIDENCE: f64 = 0.9;

pub struct SignalGenerator {
    confidence_threshold: f64,
}

impl SignalGenerator {
    pub fn new(confidence_threshold: f64) -> Self {
        Self {
            confidence_threshold,
        }
    }

    /// Produce a consensus signal, or None with a trace explaining why not.
    ///
    /// `market_bias` is the market-implied dominant direction, consumed by
    /// the POLY_PRICE indicator.
    pub fn generate_signal(
        &self,
        engine: &IndicatorEngine,
        asset: Asset,
        enabled: &[Indicator],
        market_bias: Direction,
    ) -> (Option<Signal>, String) {
        let mut votes: Vec<(Indicator, Direction)> = Vec::with_capacity(enabled.len());

        for indicator in enabled {
            let vote = match indicator {
                Indicator::Macd => engine.trend_following_bias(asset),
                Indicator::Trend => engine.trend_bias(asset),
                Indicator::Momentum => engine.momentum_bias(asset),
                Indicator::PolyPrice => Some(market_bias),
            };
            match vote {
                Some(direction) => votes.push((*indicator, direction)),
                None => {
                    let trace = format!("WAITING {indicator}: insufficient history");
                    debug!(%asset, %indicator, "indicator not ready");
                    return (None, trace);
                }
            }
        }

        let up_votes = votes
            .iter()
            .filter(|(_, d)| *d == Direction::Up)
            .count();
        let down_votes = votes.len() - up_votes;
        let (winner, winner_votes) = if up_votes >= down_votes {
            (Direction::Up, up_votes)
        } else {
            (Direction::Down, down_votes)
        };

        let confidence = if votes.len() == 3 && winner_votes == 2 {
            SPLIT_CONSENSUS_CONFIDENCE
        } else {
            winner_votes as f64 / votes.len() as f64
        };

        let vote_trace = votes
            .iter()
            .map(|(indicator, direction)| format!("{indicator}={direction}"))
            .collect::<Vec<_>>()
            .join(" + ");

        if confidence < self.confidence_threshold {
            let trace = format!(
                "REJECTED confidence={confidence:.2} < {:.2} [{vote_trace}]",
                self.confidence_threshold
            );
            return (None, trace);
        }

        let signal = Signal {
            asset,
            direction: winner,
            confidence,
            reason: vote_trace.clone(),
            timestamp: Utc::now(),
        };
        (Some(signal), format!("SIGNAL {winner} {confidence:.2} [{vote_trace}]"))
    }
}
