//! Spot price providers
//!
//! Each provider speaks one upstream REST API and normalizes its payload
//! into `(price, change_24h)` pairs. Providers never panic on malformed
//! payloads; they surface a typed error and let the aggregator move on.

mod binance;
mod coinbase;
mod coingecko;

pub use binance::BinanceProvider;
pub use coinbase::CoinbaseProvider;
pub use coingecko::CoinGeckoProvider;

use reqwest::Client;
use std::time::Duration;

/// Shared HTTP client with the timeout the upstreams tolerate
pub(crate) fn http_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .expect("Failed to create HTTP client")
}
