//! Binance per-asset spot provider (secondary)

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

use super::http_client;
use crate::prices::{ProviderError, SpotProvider};
use crate::types::Asset;

pub struct BinanceProvider {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct TickerResponse {
    price: String,
}

impl BinanceProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            base_url: base_url.into(),
        }
    }

    async fn fetch_one(&self, asset: Asset) -> Result<f64, ProviderError> {
        let url = format!(
            "{}/ticker/price?symbol={}",
            self.base_url,
            asset.binance_pair()
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ProviderError::Http(format!("status {}", response.status())));
        }
        let ticker: TickerResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        ticker
            .price
            .parse::<f64>()
            .map_err(|e| ProviderError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl SpotProvider for BinanceProvider {
    fn tag(&self) -> &'static str {
        "BINANCE"
    }

    /// Binance has no batched simple-price endpoint, so assets are priced
    /// one by one; a failing symbol is skipped rather than failing the set.
    async fn fetch(&self, assets: &[Asset]) -> Result<HashMap<Asset, (f64, f64)>, ProviderError> {
        let mut result = HashMap::new();
        for asset in assets {
            match self.fetch_one(*asset).await {
                // 24h change is not available from the ticker endpoint
                Ok(price) => {
                    result.insert(*asset, (price, 0.0));
                }
                Err(err) => {
                    debug!(%asset, error = %err, "binance ticker failed");
                }
            }
        }
        Ok(result)
    }
}
