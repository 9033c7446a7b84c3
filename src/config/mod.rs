//! Configuration management for PolySniper
//!
//! Startup configuration loads from environment variables via .env
//! (POLYSNIPER_* prefix). Strategy and execution configuration are
//! runtime-mutable through the control API and validated on every update;
//! a rejected update leaves the previous configuration untouched.

use anyhow::{Context, Result};
use config::{Config, Environment};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Asset, Indicator};

/// Main application configuration, fixed at process start
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub providers: ProvidersConfig,
    pub resolver: ResolverConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the control API
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Seconds between periodic ticks
    pub poll_interval_seconds: u64,
    /// Trade duration fallback when the market end is unknown
    pub trade_duration_seconds: i64,
    /// Remaining seconds at which routing switches from CLOB to Gamma
    pub switch_to_gamma_seconds: i64,
    /// Order size submitted in REAL mode, in USD
    pub order_amount_usd: f64,
    /// Path of the append-only action log
    pub action_log_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    pub coingecko_url: String,
    pub binance_url: String,
    pub coinbase_url: String,
    /// Cooldown after a CoinGecko rate-limit response, in seconds
    pub rate_limit_cooldown_seconds: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolverConfig {
    pub gamma_url: String,
    pub clob_url: String,
    /// Resolved-market cache TTL in seconds
    pub market_resolution_ttl_seconds: i64,
    /// Max attempts per resolution strategy
    pub max_retries: u32,
    /// Initial retry backoff in milliseconds, doubled per attempt
    pub retry_backoff_ms: u64,
}

impl AppConfig {
    /// Load configuration from environment (and .env)
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8000)?
            // Engine defaults
            .set_default("engine.poll_interval_seconds", 1)?
            .set_default("engine.trade_duration_seconds", 900)?
            .set_default("engine.switch_to_gamma_seconds", 60)?
            .set_default("engine.order_amount_usd", 10.0)?
            .set_default("engine.action_log_path", "./data/actions.log")?
            // Provider defaults
            .set_default("providers.coingecko_url", "https://api.coingecko.com/api/v3")?
            .set_default("providers.binance_url", "https://api.binance.com/api/v3")?
            .set_default("providers.coinbase_url", "https://api.coinbase.com/v2")?
            .set_default("providers.rate_limit_cooldown_seconds", 45)?
            // Resolver defaults
            .set_default("resolver.gamma_url", "https://gamma-api.polymarket.com")?
            .set_default("resolver.clob_url", "https://clob.polymarket.com")?
            .set_default("resolver.market_resolution_ttl_seconds", 3)?
            .set_default("resolver.max_retries", 5)?
            .set_default("resolver.retry_backoff_ms", 2000)?
            // Override with environment variables (POLYSNIPER_*)
            .add_source(Environment::with_prefix("POLYSNIPER").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Log-safe one-line summary
    pub fn digest(&self) -> String {
        format!(
            "bind={}:{} poll={}s ttl={}s gamma={}",
            self.server.host,
            self.server.port,
            self.engine.poll_interval_seconds,
            self.resolver.market_resolution_ttl_seconds,
            self.resolver.gamma_url
        )
    }
}

/// Validation failure for a strategy or execution config update
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("enabled_assets must not be empty")]
    EmptyAssets,
    #[error("enabled_indicators must not be empty")]
    EmptyIndicators,
    #[error("confidence_threshold must be within [0.5, 1.0], got {0}")]
    ConfidenceThresholdOutOfRange(f64),
    #[error("entry_probability_threshold must be within [0.5, 1.0], got {0}")]
    EntryThresholdOutOfRange(f64),
    #[error("late_entry_seconds must be within [30, 900], got {0}")]
    LateEntryOutOfRange(i64),
    #[error("stop_loss_pct must be within [0, 0.95], got {0}")]
    StopLossOutOfRange(f64),
}

/// Runtime strategy configuration, replaced wholesale on valid updates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub enabled_assets: Vec<Asset>,
    pub enabled_indicators: Vec<Indicator>,
    /// Minimum consensus confidence to emit a signal
    pub confidence_threshold: f64,
    /// Minimum market-implied probability of the dominant side
    pub entry_probability_threshold: f64,
    /// Entries are allowed only inside the last N seconds of a window
    pub late_entry_seconds: i64,
    /// Stop-loss as a fraction of entry price; 0 disables
    pub stop_loss_pct: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            enabled_assets: vec![Asset::BTC, Asset::ETH, Asset::SOL],
            enabled_indicators: vec![Indicator::Macd, Indicator::Trend, Indicator::PolyPrice],
            confidence_threshold: 0.9,
            entry_probability_threshold: 0.85,
            late_entry_seconds: 180,
            stop_loss_pct: 0.2,
        }
    }
}

impl StrategyConfig {
    /// Validate every field; the caller applies the update only on Ok
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled_assets.is_empty() {
            return Err(ConfigError::EmptyAssets);
        }
        if self.enabled_indicators.is_empty() {
            return Err(ConfigError::EmptyIndicators);
        }
        if !(0.5..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::ConfidenceThresholdOutOfRange(
                self.confidence_threshold,
            ));
        }
        if !(0.5..=1.0).contains(&self.entry_probability_threshold) {
            return Err(ConfigError::EntryThresholdOutOfRange(
                self.entry_probability_threshold,
            ));
        }
        if !(30..=900).contains(&self.late_entry_seconds) {
            return Err(ConfigError::LateEntryOutOfRange(self.late_entry_seconds));
        }
        if !(0.0..=0.95).contains(&self.stop_loss_pct) {
            return Err(ConfigError::StopLossOutOfRange(self.stop_loss_pct));
        }
        Ok(())
    }
}

/// Execution mode: TEST records trades without touching the venue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    #[serde(rename = "TEST")]
    Test,
    #[serde(rename = "REAL")]
    Real,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Test
    }
}

/// Runtime execution configuration; the wallet secret never leaves the core
#[derive(Debug, Clone, Default)]
pub struct ExecutionConfig {
    pub mode: ExecutionMode,
    wallet_secret: String,
}

/// Inbound execution config update
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfigUpdate {
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(default)]
    pub wallet_secret: String,
}

/// Externally visible view: mode, configured flag, masked credential
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionConfigView {
    pub mode: ExecutionMode,
    pub wallet_configured: bool,
    pub wallet_masked: String,
}

impl ExecutionConfig {
    pub fn apply(&mut self, update: ExecutionConfigUpdate) {
        self.mode = update.mode;
        self.wallet_secret = update.wallet_secret.trim().to_string();
    }

    pub fn wallet_configured(&self) -> bool {
        !self.wallet_secret.is_empty()
    }

    pub fn wallet_secret(&self) -> &str {
        &self.wallet_secret
    }

    /// Masked credential: first 6 + last 4 characters for long secrets,
    /// all asterisks otherwise
    pub fn wallet_masked(&self) -> String {
        mask_secret(&self.wallet_secret)
    }

    pub fn view(&self) -> ExecutionConfigView {
        ExecutionConfigView {
            mode: self.mode,
            wallet_configured: self.wallet_configured(),
            wallet_masked: self.wallet_masked(),
        }
    }
}

fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.is_empty() {
        return String::new();
    }
    if chars.len() <= 10 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}
