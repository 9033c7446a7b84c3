//! Coinbase per-asset spot provider (tertiary)

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

use super::http_client;
use crate::prices::{ProviderError, SpotProvider};
use crate::types::Asset;

pub struct CoinbaseProvider {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SpotResponse {
    data: SpotData,
}

#[derive(Debug, Deserialize)]
struct SpotData {
    amount: String,
}

impl CoinbaseProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            base_url: base_url.into(),
        }
    }

    async fn fetch_one(&self, asset: Asset) -> Result<f64, ProviderError> {
        let url = format!("{}/prices/{}/spot", self.base_url, asset.coinbase_pair());
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ProviderError::Http(format!("status {}", response.status())));
        }
        let spot: SpotResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        spot.data
            .amount
            .parse::<f64>()
            .map_err(|e| ProviderError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl SpotProvider for CoinbaseProvider {
    fn tag(&self) -> &'static str {
        "COINBASE"
    }

    async fn fetch(&self, assets: &[Asset]) -> Result<HashMap<Asset, (f64, f64)>, ProviderError> {
        let mut result = HashMap::new();
        for asset in assets {
            match self.fetch_one(*asset).await {
                Ok(price) => {
                    result.insert(*asset, (price, 0.0));
                }
                Err(err) => {
                    debug!(%asset, error = %err, "coinbase spot failed");
                }
            }
        }
        Ok(result)
    }
}
