//! CLOB REST client: order-book quotes and best-effort order submission
//!
//! Order submission here is intentionally thin: a market order with an
//! idempotency token, accepted or rejected by the venue. Full EIP-712
//! signing is out of scope; the venue may reject unsigned orders, and the
//! caller records that outcome on the trade.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

pub struct ClobClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct BookLevel {
    price: String,
}

#[derive(Debug, Deserialize)]
struct BookResponse {
    #[serde(default)]
    bids: Vec<BookLevel>,
    #[serde(default)]
    asks: Vec<BookLevel>,
}

/// Market order payload
#[derive(Debug, Serialize)]
struct OrderRequest<'a> {
    token_id: &'a str,
    side: &'a str,
    price: f64,
    size: f64,
    order_type: &'a str,
    client_order_id: String,
}

/// Venue response to an order submission
#[derive(Debug)]
pub enum OrderOutcome {
    Accepted,
    Rejected(String),
}

impl ClobClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");
        let base_url: String = base_url.into();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Mid price from the book's best bid/ask for a token
    pub async fn midpoint(&self, token_id: &str) -> Result<f64> {
        let url = format!("{}/book?token_id={}", self.base_url, token_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("clob book request failed")?;
        if !response.status().is_success() {
            anyhow::bail!("clob book returned status {}", response.status());
        }
        let book: BookResponse = response
            .json()
            .await
            .context("clob book decode failed")?;

        let best_bid = book
            .bids
            .first()
            .and_then(|level| level.price.parse::<f64>().ok());
        let best_ask = book
            .asks
            .first()
            .and_then(|level| level.price.parse::<f64>().ok());

        match (best_bid, best_ask) {
            (Some(bid), Some(ask)) => Ok((bid + ask) / 2.0),
            (Some(bid), None) => Ok(bid),
            (None, Some(ask)) => Ok(ask),
            (None, None) => anyhow::bail!("clob book is empty for token {token_id}"),
        }
    }

    /// Submit a best-effort FOK market order.
    ///
    /// `Ok(Rejected(..))` is a venue decision; `Err` is a transport or
    /// decoding failure. The caller maps both into reason codes.
    pub async fn submit_market_order(
        &self,
        token_id: &str,
        side: &str,
        price: f64,
        size: f64,
    ) -> Result<OrderOutcome> {
        let request = OrderRequest {
            token_id,
            side,
            price,
            size,
            order_type: "FOK",
            client_order_id: Uuid::new_v4().to_string(),
        };
        debug!(token_id, side, price, size, "submitting order");

        let url = format!("{}/order", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("clob order request failed")?;

        let status = response.status();
        let payload: Value = response.json().await.unwrap_or(Value::Null);

        if status.is_success() {
            // Some deployments report rejection inside a 200 payload
            let venue_status = payload
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("matched");
            if matches!(venue_status, "matched" | "live" | "accepted") {
                Ok(OrderOutcome::Accepted)
            } else {
                Ok(OrderOutcome::Rejected(venue_status.to_uppercase()))
            }
        } else {
            let reason = payload
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_uppercase)
                .unwrap_or_else(|| status.as_u16().to_string());
            Ok(OrderOutcome::Rejected(reason))
        }
    }
}
