//! CoinGecko batched spot provider (primary)

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

use super::http_client;
use crate::prices::{ProviderError, SpotProvider};
use crate::types::Asset;

/// Batched provider: one request prices every requested asset and carries
/// the 24h change, which the per-asset fallbacks cannot provide.
pub struct CoinGeckoProvider {
    client: Client,
    base_url: String,
}

impl CoinGeckoProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl SpotProvider for CoinGeckoProvider {
    fn tag(&self) -> &'static str {
        "COINGECKO"
    }

    async fn fetch(&self, assets: &[Asset]) -> Result<HashMap<Asset, (f64, f64)>, ProviderError> {
        let ids = assets
            .iter()
            .map(|a| a.coingecko_id())
            .collect::<Vec<_>>()
            .join(",");
        let url = format!(
            "{}/simple/price?ids={}&vs_currencies=usd&include_24hr_change=true",
            self.base_url, ids
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }
        if !response.status().is_success() {
            return Err(ProviderError::Http(format!("status {}", response.status())));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        let mut result = HashMap::new();
        for asset in assets {
            let Some(info) = payload.get(asset.coingecko_id()) else {
                debug!(%asset, "coingecko payload missing coin");
                continue;
            };
            let Some(price) = info.get("usd").and_then(Value::as_f64) else {
                continue;
            };
            let change = info
                .get("usd_24h_change")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            result.insert(*asset, (price, change));
        }
        Ok(result)
    }
}
