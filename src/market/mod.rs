//! Market resolution for 15-minute up/down windows
//!
//! Resolves an asset to the concrete tradable market for the current (or
//! next) 900-second window via a chain of strategies: deterministic window
//! slug, configured base reference, then keyword search. Resolution never
//! fails — exhaustion yields a synthetic result from last-known odds so a
//! bad upstream cannot stall the control loop.

mod clob;
mod gamma;
mod windows;

pub use clob::{ClobClient, OrderOutcome};
pub use gamma::{parse_number_list, parse_string_list, GammaClient, GammaMarket};
pub use windows::{build_window_slug, current_window_ts, next_window_ts, WINDOW_SECS};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::types::{Asset, Direction, MarketData};

/// Odds are clamped into this band so neither side ever reads 0 or 1
pub const ODDS_MIN: f64 = 0.01;
pub const ODDS_MAX: f64 = 0.99;

/// Candidates must end within this horizon (the ideal is a full window out)
const SEARCH_HORIZON_SECS: i64 = 960;
/// Cache is force-invalidated this close to the window end
const ROLLOVER_GUARD_SECS: i64 = 5;

pub fn clamp_odds(odds: f64) -> f64 {
    odds.clamp(ODDS_MIN, ODDS_MAX)
}

/// Market data access as the engine sees it.
///
/// One implementation speaks to Polymarket; tests inject their own.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Resolve the tradable market for the asset's current window.
    /// Infallible: degraded results carry FALLBACK provenance instead.
    async fn fetch_market_data(&self, asset: Asset) -> MarketData;

    /// Best-effort order submission: (accepted, reason code)
    async fn place_order(
        &self,
        market: &MarketData,
        direction: Direction,
        amount_usd: f64,
        wallet_secret: &str,
    ) -> (bool, String);

    /// Authoritative settlement lookup: (final price, strike, source)
    async fn fetch_market_result(
        &self,
        market_id: &str,
        market_slug: &str,
    ) -> (Option<f64>, Option<f64>, String);
}

/// Resolver tuning, lifted from [`crate::config::ResolverConfig`]
#[derive(Debug, Clone)]
pub struct ResolverOptions {
    pub cache_ttl_seconds: i64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: 3,
            max_retries: 5,
            retry_backoff_ms: 2000,
        }
    }
}

struct CachedMarket {
    data: MarketData,
    resolved_at: DateTime<Utc>,
}

/// Gamma/CLOB-backed implementation of [`MarketDataSource`]
pub struct PolymarketResolver {
    gamma: GammaClient,
    clob: ClobClient,
    /// Base market reference per asset, e.g. "btc-updown-15m"
    base_refs: HashMap<Asset, String>,
    options: ResolverOptions,
    cache: RwLock<HashMap<Asset, CachedMarket>>,
    /// Last odds seen per asset, feeding the synthetic fallback
    last_odds: RwLock<HashMap<Asset, (f64, f64)>>,
}

impl PolymarketResolver {
    pub fn new(gamma_url: &str, clob_url: &str, options: ResolverOptions) -> Self {
        let base_refs = Asset::ALL
            .iter()
            .map(|asset| (*asset, format!("{}-updown-15m", asset.slug_prefix())))
            .collect();
        Self {
            gamma: GammaClient::new(gamma_url),
            clob: ClobClient::new(clob_url),
            base_refs,
            options,
            cache: RwLock::new(HashMap::new()),
            last_odds: RwLock::new(HashMap::new()),
        }
    }

    async fn cached(&self, asset: Asset, now: DateTime<Utc>) -> Option<MarketData> {
        let cache = self.cache.read().await;
        let entry = cache.get(&asset)?;
        if (now - entry.resolved_at).num_seconds() >= self.options.cache_ttl_seconds {
            return None;
        }
        // Force a refresh right at window rollover
        if let Some(end_ts) = entry.data.market_end_ts {
            if end_ts - now.timestamp() <= ROLLOVER_GUARD_SECS {
                return None;
            }
        }
        Some(entry.data.clone())
    }

    /// One resolution strategy attempt, retried while the market exists but
    /// its outcome price is not yet readable.
    async fn attempt_with_retries<F, Fut>(
        &self,
        label: &str,
        retries: &mut u32,
        fetch: F,
    ) -> Option<GammaMarket>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<Option<GammaMarket>>>,
    {
        let mut backoff_ms = self.options.retry_backoff_ms;
        for attempt in 0..self.options.max_retries {
            *retries += 1;
            match fetch().await {
                Ok(Some(market)) if market.has_readable_price() => return Some(market),
                Ok(Some(market)) => {
                    debug!(
                        strategy = label,
                        attempt,
                        slug = %market.slug(),
                        "market found without readable price, retrying"
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
                Ok(None) => return None,
                Err(err) => {
                    debug!(strategy = label, attempt, error = %err, "resolution attempt failed");
                    return None;
                }
            }
        }
        None
    }

    fn build_market_data(
        &self,
        market: &GammaMarket,
        window_ts: i64,
        resolved_by: &str,
        odds_source: &str,
        retries: u32,
    ) -> MarketData {
        let yes = clamp_odds(market.yes_odds().unwrap_or(0.5));
        let (token_up, token_down) = match market.outcome_tokens() {
            Some((up, down)) => (Some(up), Some(down)),
            None => (None, None),
        };
        MarketData {
            market_id: market.id(),
            market_slug: market.slug(),
            window_ts: Some(window_ts),
            yes_odds: yes,
            no_odds: 1.0 - yes,
            odds_source: odds_source.to_string(),
            resolved_by: resolved_by.to_string(),
            odds_live: true,
            market_end_ts: market.end_ts().or(Some(window_ts + WINDOW_SECS)),
            price_to_beat: market.strike_price(),
            final_price: market.final_price(),
            token_up,
            token_down,
            retries,
        }
    }

    async fn synthetic_fallback(&self, asset: Asset, window_ts: i64, retries: u32) -> MarketData {
        let (yes, no) = self
            .last_odds
            .read()
            .await
            .get(&asset)
            .copied()
            .unwrap_or((0.5, 0.5));
        warn!(%asset, window_ts, retries, "market resolution exhausted, returning fallback odds");
        MarketData {
            market_id: self.base_refs[&asset].clone(),
            market_slug: build_window_slug(asset, window_ts),
            window_ts: Some(window_ts),
            yes_odds: clamp_odds(yes),
            no_odds: clamp_odds(no),
            odds_source: "FALLBACK".to_string(),
            resolved_by: "NO_PRICE".to_string(),
            odds_live: false,
            market_end_ts: Some(window_ts + WINDOW_SECS),
            price_to_beat: None,
            final_price: None,
            token_up: None,
            token_down: None,
            retries,
        }
    }
}

#[async_trait]
impl MarketDataSource for PolymarketResolver {
    async fn fetch_market_data(&self, asset: Asset) -> MarketData {
        let now = Utc::now();
        if let Some(cached) = self.cached(asset, now).await {
            return cached;
        }

        let base_ref = &self.base_refs[&asset];
        let current = current_window_ts(now.timestamp());
        let mut retries = 0u32;

        for window_ts in [current, current + WINDOW_SECS] {
            let slug = build_window_slug(asset, window_ts);

            // (a) deterministic window slug
            if let Some(market) = self
                .attempt_with_retries("slug", &mut retries, || self.gamma.fetch_by_slug(&slug))
                .await
            {
                let data =
                    self.build_market_data(&market, window_ts, "SLUG", "GAMMA_SLUG", retries);
                self.remember(asset, &data, now).await;
                return data;
            }

            // (b) configured base reference without window suffix
            if let Some(market) = self
                .attempt_with_retries("ref", &mut retries, || self.gamma.fetch_by_ref(base_ref))
                .await
            {
                let data =
                    self.build_market_data(&market, window_ts, "REF", "GAMMA_REF", retries);
                self.remember(asset, &data, now).await;
                return data;
            }

            // (c) keyword search scoped to the window
            if let Some(market) = self
                .attempt_with_retries("search", &mut retries, || async {
                    let candidates = self.gamma.search(base_ref).await?;
                    Ok(select_search_candidate(
                        candidates,
                        asset,
                        Utc::now().timestamp(),
                    ))
                })
                .await
            {
                let data = self.build_market_data(
                    &market,
                    window_ts,
                    "SEARCH",
                    "GAMMA_SEARCH",
                    retries,
                );
                self.remember(asset, &data, now).await;
                return data;
            }
        }

        self.synthetic_fallback(asset, current, retries).await
    }

    async fn place_order(
        &self,
        market: &MarketData,
        direction: Direction,
        amount_usd: f64,
        wallet_secret: &str,
    ) -> (bool, String) {
        if wallet_secret.trim().is_empty() {
            return (false, "WALLET_NOT_CONFIGURED".to_string());
        }
        let Some(token_id) = market.token_for_direction(direction) else {
            return (false, "TOKEN_ID_NOT_AVAILABLE".to_string());
        };

        // Book mid where available; implied odds as the degraded estimate
        let implied = match direction {
            Direction::Up => market.yes_odds,
            Direction::Down => market.no_odds,
        };
        let price = match self.clob.midpoint(token_id).await {
            Ok(mid) => clamp_odds(mid),
            Err(err) => {
                debug!(error = %err, "book midpoint unavailable, using implied odds");
                clamp_odds(implied)
            }
        };
        let size = amount_usd / price;

        match self.clob.submit_market_order(token_id, "BUY", price, size).await {
            Ok(OrderOutcome::Accepted) => {
                info!(market = %market.market_slug, %direction, price, size, "order accepted");
                (true, "CLOB_ORDER_ACCEPTED".to_string())
            }
            Ok(OrderOutcome::Rejected(status)) => {
                warn!(market = %market.market_slug, %direction, status, "order rejected");
                (false, format!("CLOB_REJECTED_{status}"))
            }
            Err(err) => {
                warn!(market = %market.market_slug, %direction, error = %err, "order error");
                (false, format!("CLOB_ERROR::{}", error_kind(&err)))
            }
        }
    }

    async fn fetch_market_result(
        &self,
        market_id: &str,
        market_slug: &str,
    ) -> (Option<f64>, Option<f64>, String) {
        for (reference, source) in [(market_id, "GAMMA_ID"), (market_slug, "GAMMA_SLUG")] {
            if reference.is_empty() {
                continue;
            }
            let lookup = if source == "GAMMA_ID" {
                self.gamma.fetch_by_ref(reference).await
            } else {
                self.gamma.fetch_by_slug(reference).await
            };
            match lookup {
                Ok(Some(market)) => {
                    let final_price = market.final_price();
                    let strike = market.strike_price();
                    if final_price.is_some() || strike.is_some() {
                        return (final_price, strike, source.to_string());
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    debug!(reference, error = %err, "settlement lookup failed");
                }
            }
        }
        (None, None, "NO_RESULT".to_string())
    }
}

impl PolymarketResolver {
    async fn remember(&self, asset: Asset, data: &MarketData, now: DateTime<Utc>) {
        self.last_odds
            .write()
            .await
            .insert(asset, (data.yes_odds, data.no_odds));
        self.cache.write().await.insert(
            asset,
            CachedMarket {
                data: data.clone(),
                resolved_at: now,
            },
        );
    }
}

fn error_kind(err: &anyhow::Error) -> &'static str {
    if let Some(req) = err.downcast_ref::<reqwest::Error>() {
        if req.is_timeout() {
            return "TIMEOUT";
        }
        if req.is_connect() {
            return "CONNECT";
        }
        return "HTTP";
    }
    "INTERNAL"
}

/// Filter keyword-search candidates down to the one tradable window market.
///
/// Eligible: title matches the up/down pattern AND mentions the asset, and
/// the end timestamp falls within [now, now + 16 minutes]. Among eligible
/// candidates the one ending closest to now + 15 minutes wins; the first
/// seen wins exact ties.
pub fn select_search_candidate(
    candidates: Vec<GammaMarket>,
    asset: Asset,
    now: i64,
) -> Option<GammaMarket> {
    let ideal_end = now + WINDOW_SECS;
    let mut best: Option<(i64, GammaMarket)> = None;

    for candidate in candidates {
        let text = candidate.title_text();
        let is_updown = text.contains("up or down") || text.contains("updown");
        let asset_match = asset.title_aliases().iter().any(|alias| text.contains(alias));
        if !is_updown || !asset_match {
            continue;
        }
        let Some(end_ts) = candidate.end_ts() else {
            continue;
        };
        if end_ts < now || end_ts > now + SEARCH_HORIZON_SECS {
            continue;
        }
        let distance = (end_ts - ideal_end).abs();
        match &best {
            Some((best_distance, _)) if distance >= *best_distance => {}
            _ => best = Some((distance, candidate)),
        }
    }

    best.map(|(_, market)| market)
}
