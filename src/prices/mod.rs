//! Spot price aggregation across multiple providers
//!
//! Tries providers in a fixed order (CoinGecko batched, then Binance, then
//! Coinbase per asset) and falls back to the last-known value when every
//! provider fails. Every quote carries a provenance tag so downstream
//! consumers can tell authoritative data from degraded data.

pub mod sources;

pub use sources::{BinanceProvider, CoinbaseProvider, CoinGeckoProvider};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::types::Asset;

/// Provenance tag for a quote that had to fall back to cached state
pub const SOURCE_LAST_KNOWN: &str = "LAST_KNOWN";
/// Provenance tag for the cold-start placeholder; price is not real
pub const SOURCE_UNAVAILABLE: &str = "UNAVAILABLE";

/// Spot quote for one asset
#[derive(Debug, Clone, PartialEq)]
pub struct SpotQuote {
    /// Price in USD; 0.0 only under the UNAVAILABLE tag
    pub price: f64,
    pub change_24h: f64,
    /// Provider tag or fallback tier that produced this value
    pub source: String,
}

/// Failure of a single provider attempt
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("rate limited")]
    RateLimited,
    #[error("http error: {0}")]
    Http(String),
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// One upstream spot price source.
///
/// A provider returns quotes for the assets it could price; missing assets
/// fall through to the next provider in the chain.
#[async_trait]
pub trait SpotProvider: Send + Sync {
    /// Provenance tag recorded on successful quotes
    fn tag(&self) -> &'static str;

    async fn fetch(&self, assets: &[Asset]) -> Result<HashMap<Asset, (f64, f64)>, ProviderError>;
}

struct LastKnown {
    price: f64,
    change_24h: f64,
    source: String,
    updated_at: DateTime<Utc>,
}

/// Multi-provider aggregator with last-known fallback and staleness tracking
pub struct PriceAggregator {
    providers: Vec<Box<dyn SpotProvider>>,
    last_known: RwLock<HashMap<Asset, LastKnown>>,
    /// Per-provider cooldown after a rate-limit response (index-aligned)
    cooldowns: RwLock<Vec<Option<DateTime<Utc>>>>,
    cooldown_seconds: i64,
}

impl PriceAggregator {
    pub fn new(providers: Vec<Box<dyn SpotProvider>>, cooldown_seconds: i64) -> Self {
        let slots = providers.len();
        Self {
            providers,
            last_known: RwLock::new(HashMap::new()),
            cooldowns: RwLock::new(vec![None; slots]),
            cooldown_seconds,
        }
    }

    /// Fetch current spot quotes for the given assets.
    ///
    /// Never fails: exhausting all providers yields the last-known value
    /// (tagged LAST_KNOWN) or a zero placeholder (tagged UNAVAILABLE).
    pub async fn fetch_spots(&self, assets: &[Asset]) -> HashMap<Asset, SpotQuote> {
        let mut quotes: HashMap<Asset, SpotQuote> = HashMap::new();
        let now = Utc::now();

        for (idx, provider) in self.providers.iter().enumerate() {
            let missing: Vec<Asset> = assets
                .iter()
                .copied()
                .filter(|a| !quotes.contains_key(a))
                .collect();
            if missing.is_empty() {
                break;
            }

            if self.in_cooldown(idx, now).await {
                debug!(provider = provider.tag(), "provider in cooldown, skipping");
                continue;
            }

            match provider.fetch(&missing).await {
                Ok(prices) => {
                    let mut cache = self.last_known.write().await;
                    for (asset, (price, change)) in prices {
                        cache.insert(
                            asset,
                            LastKnown {
                                price,
                                change_24h: change,
                                source: provider.tag().to_string(),
                                updated_at: now,
                            },
                        );
                        quotes.insert(
                            asset,
                            SpotQuote {
                                price,
                                change_24h: change,
                                source: provider.tag().to_string(),
                            },
                        );
                    }
                }
                Err(ProviderError::RateLimited) => {
                    warn!(
                        provider = provider.tag(),
                        cooldown_secs = self.cooldown_seconds,
                        "provider rate limited, backing off"
                    );
                    self.cooldowns.write().await[idx] =
                        Some(now + Duration::seconds(self.cooldown_seconds));
                }
                Err(err) => {
                    warn!(provider = provider.tag(), error = %err, "provider fetch failed");
                }
            }
        }

        // Fallback tiers for assets no provider could price
        let cache = self.last_known.read().await;
        for asset in assets {
            if quotes.contains_key(asset) {
                continue;
            }
            match cache.get(asset) {
                Some(known) => {
                    quotes.insert(
                        *asset,
                        SpotQuote {
                            price: known.price,
                            change_24h: known.change_24h,
                            source: SOURCE_LAST_KNOWN.to_string(),
                        },
                    );
                }
                None => {
                    quotes.insert(
                        *asset,
                        SpotQuote {
                            price: 0.0,
                            change_24h: 0.0,
                            source: SOURCE_UNAVAILABLE.to_string(),
                        },
                    );
                }
            }
        }

        quotes
    }

    /// Whole seconds since the asset's last successful provider update
    pub async fn staleness_seconds(&self, asset: Asset) -> Option<i64> {
        let cache = self.last_known.read().await;
        cache
            .get(&asset)
            .map(|known| (Utc::now() - known.updated_at).num_seconds())
    }

    /// Provenance of the asset's last successful update
    pub async fn last_source(&self, asset: Asset) -> Option<String> {
        let cache = self.last_known.read().await;
        cache.get(&asset).map(|known| known.source.clone())
    }

    async fn in_cooldown(&self, idx: usize, now: DateTime<Utc>) -> bool {
        let cooldowns = self.cooldowns.read().await;
        matches!(cooldowns.get(idx), Some(Some(until)) if now < *until)
    }
}
