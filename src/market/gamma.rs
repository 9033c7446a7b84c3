//! Gamma API client and payload extraction
//!
//! Gamma market payloads are loosely shaped: outcome prices arrive as a
//! list or as a JSON-encoded string, end timestamps hide behind several
//! field names and may be ISO-8601 or epoch seconds. Everything here
//! degrades to `None` instead of failing the resolution pass.

use anyhow::{Context, Result};
use chrono::DateTime;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// Field names that may carry the window end timestamp
const END_TS_FIELDS: &[&str] = &["endDate", "endDateIso", "end_date_iso", "endTs", "end_ts"];
/// Field names that may carry the strike ("price to beat")
const STRIKE_FIELDS: &[&str] = &[
    "priceToBeat",
    "price_to_beat",
    "strikePrice",
    "strike_price",
];
/// Field names that may carry the settlement price
const FINAL_PRICE_FIELDS: &[&str] = &[
    "finalPrice",
    "final_price",
    "resolutionPrice",
    "settlementPrice",
];

/// One market object as returned by Gamma, kept as raw JSON with typed
/// accessors over the fields we read.
#[derive(Debug, Clone)]
pub struct GammaMarket(pub Value);

impl GammaMarket {
    pub fn id(&self) -> String {
        match self.0.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        }
    }

    pub fn slug(&self) -> String {
        self.0
            .get("slug")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    pub fn question(&self) -> String {
        self.0
            .get("question")
            .or_else(|| self.0.get("title"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    /// Lowercased slug + question, the text the candidate filter matches on
    pub fn title_text(&self) -> String {
        format!("{} {}", self.slug(), self.question()).to_lowercase()
    }

    /// Yes odds from the first outcome price, unclamped
    pub fn yes_odds(&self) -> Option<f64> {
        let prices = parse_number_list(self.0.get("outcomePrices")?)?;
        prices.first().copied()
    }

    pub fn has_readable_price(&self) -> bool {
        self.yes_odds().is_some()
    }

    /// CLOB token ids as (up, down), degrading to None when absent
    pub fn outcome_tokens(&self) -> Option<(String, String)> {
        let tokens = parse_string_list(self.0.get("clobTokenIds")?)?;
        match tokens.as_slice() {
            [up, down, ..] => Some((up.clone(), down.clone())),
            _ => None,
        }
    }

    /// Window end as epoch seconds, read from any known field name
    pub fn end_ts(&self) -> Option<i64> {
        for field in END_TS_FIELDS {
            if let Some(value) = self.0.get(*field) {
                if let Some(ts) = parse_timestamp(value) {
                    return Some(ts);
                }
            }
        }
        None
    }

    pub fn strike_price(&self) -> Option<f64> {
        first_number(&self.0, STRIKE_FIELDS)
    }

    pub fn final_price(&self) -> Option<f64> {
        first_number(&self.0, FINAL_PRICE_FIELDS)
    }
}

/// Parse a list of numbers that may be a JSON array (of numbers or numeric
/// strings) or a JSON-encoded string like `'["0.61","0.39"]'`.
pub fn parse_number_list(value: &Value) -> Option<Vec<f64>> {
    let items = as_array(value)?;
    let parsed: Vec<f64> = items
        .iter()
        .filter_map(|item| match item {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse::<f64>().ok(),
            _ => None,
        })
        .collect();
    if parsed.is_empty() {
        None
    } else {
        Some(parsed)
    }
}

/// Parse a list of strings with the same list-or-encoded-string tolerance
pub fn parse_string_list(value: &Value) -> Option<Vec<String>> {
    let items = as_array(value)?;
    let parsed: Vec<String> = items
        .iter()
        .filter_map(|item| item.as_str().map(str::to_string))
        .collect();
    if parsed.is_empty() {
        None
    } else {
        Some(parsed)
    }
}

fn as_array(value: &Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items.clone()),
        Value::String(encoded) => match serde_json::from_str::<Value>(encoded) {
            Ok(Value::Array(items)) => Some(items),
            _ => None,
        },
        _ => None,
    }
}

/// Epoch seconds from an ISO-8601 string or a raw epoch number
fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.timestamp());
            }
            s.parse::<i64>().ok()
        }
        _ => None,
    }
}

fn first_number(value: &Value, fields: &[&str]) -> Option<f64> {
    for field in fields {
        match value.get(*field) {
            Some(Value::Number(n)) => return n.as_f64(),
            Some(Value::String(s)) => {
                if let Ok(parsed) = s.parse::<f64>() {
                    return Some(parsed);
                }
            }
            _ => {}
        }
    }
    None
}

/// HTTP client for the Gamma market-data API
pub struct GammaClient {
    client: Client,
    base_url: String,
}

impl GammaClient {
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

    /// Lookup by exact slug (`/markets?slug=...`)
    pub async fn fetch_by_slug(&self, slug: &str) -> Result<Option<GammaMarket>> {
        let url = format!("{}/markets?slug={}", self.base_url, slug);
        let payload = self.get_json(&url).await?;
        Ok(first_market(payload))
    }

    /// Lookup by market id or slug path segment (`/markets/{ref}`)
    pub async fn fetch_by_ref(&self, market_ref: &str) -> Result<Option<GammaMarket>> {
        let url = format!("{}/markets/{}", self.base_url, market_ref);
        let payload = self.get_json(&url).await?;
        Ok(first_market(payload))
    }

    /// Keyword search (`/markets?search=...`), returning all candidates
    pub async fn search(&self, query: &str) -> Result<Vec<GammaMarket>> {
        let url = format!("{}/markets?search={}", self.base_url, query);
        let payload = self.get_json(&url).await?;
        Ok(match payload {
            Value::Array(items) => items.into_iter().map(GammaMarket).collect(),
            Value::Object(_) => vec![GammaMarket(payload)],
            _ => Vec::new(),
        })
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("gamma request failed: {url}"))?;
        if !response.status().is_success() {
            anyhow::bail!("gamma returned status {} for {url}", response.status());
        }
        response
            .json()
            .await
            .with_context(|| format!("gamma payload decode failed: {url}"))
    }
}

fn first_market(payload: Value) -> Option<GammaMarket> {
    match payload {
        Value::Array(items) => items.into_iter().next().map(GammaMarket),
        Value::Object(_) => Some(GammaMarket(payload)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outcome_prices_from_list() {
        let market = GammaMarket(json!({"outcomePrices": ["0.61", "0.39"]}));
        assert_eq!(market.yes_odds(), Some(0.61));
    }

    #[test]
    fn test_outcome_prices_from_encoded_string() {
        let market = GammaMarket(json!({"outcomePrices": "[\"0.61\",\"0.39\"]"}));
        assert_eq!(market.yes_odds(), Some(0.61));
        assert!(market.has_readable_price());
    }

    #[test]
    fn test_outcome_prices_from_numbers() {
        let market = GammaMarket(json!({"outcomePrices": [0.75, 0.25]}));
        assert_eq!(market.yes_odds(), Some(0.75));
    }

    #[test]
    fn test_missing_prices_not_readable() {
        let market = GammaMarket(json!({"slug": "btc-updown-15m-1700000100"}));
        assert_eq!(market.yes_odds(), None);
        assert!(!market.has_readable_price());
    }

    #[test]
    fn test_tokens_degrade_to_none() {
        let market = GammaMarket(json!({"clobTokenIds": "[\"111\",\"222\"]"}));
        assert_eq!(
            market.outcome_tokens(),
            Some(("111".to_string(), "222".to_string()))
        );

        let market = GammaMarket(json!({"clobTokenIds": "[]"}));
        assert_eq!(market.outcome_tokens(), None);

        let market = GammaMarket(json!({}));
        assert_eq!(market.outcome_tokens(), None);
    }

    #[test]
    fn test_end_ts_from_iso_and_epoch() {
        let market = GammaMarket(json!({"endDate": "2023-11-14T22:15:00Z"}));
        assert_eq!(market.end_ts(), Some(1_700_000_100));

        let market = GammaMarket(json!({"endTs": 1_700_000_100}));
        assert_eq!(market.end_ts(), Some(1_700_000_100));

        let market = GammaMarket(json!({"end_date_iso": "2023-11-14T22:15:00+00:00"}));
        assert_eq!(market.end_ts(), Some(1_700_000_100));
    }

    #[test]
    fn test_strike_and_final_price_field_names() {
        let market = GammaMarket(json!({"priceToBeat": "68000.5", "finalPrice": 68100.0}));
        assert_eq!(market.strike_price(), Some(68000.5));
        assert_eq!(market.final_price(), Some(68100.0));

        let market = GammaMarket(json!({"strike_price": 68000.0}));
        assert_eq!(market.strike_price(), Some(68000.0));
        assert_eq!(market.final_price(), None);
    }

    #[test]
    fn test_title_text_lowercases() {
        let market = GammaMarket(json!({
            "slug": "btc-updown-15m-1700000100",
            "question": "Bitcoin Up or Down - November 14, 10:15PM ET"
        }));
        let text = market.title_text();
        assert!(text.contains("up or down"));
        assert!(text.contains("bitcoin"));
    }
}
