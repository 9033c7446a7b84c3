//! PolySniper entrypoint
//!
//! Wires configuration, collaborators and the engine together, then serves
//! the control API until ctrl-c. The engine does not start ticking on its
//! own; `POST /api/bot/start` arms it.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use polysniper::actionlog::{ActionLog, FileActionLogSink};
use polysniper::api::create_router;
use polysniper::config::AppConfig;
use polysniper::engine::{Engine, EngineOptions};
use polysniper::market::{PolymarketResolver, ResolverOptions};
use polysniper::prices::{BinanceProvider, CoinGeckoProvider, CoinbaseProvider, PriceAggregator};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load()?;
    info!(digest = %config.digest(), "configuration loaded");

    let aggregator = Arc::new(PriceAggregator::new(
        vec![
            Box::new(CoinGeckoProvider::new(&config.providers.coingecko_url)),
            Box::new(BinanceProvider::new(&config.providers.binance_url)),
            Box::new(CoinbaseProvider::new(&config.providers.coinbase_url)),
        ],
        config.providers.rate_limit_cooldown_seconds,
    ));

    let resolver = Arc::new(PolymarketResolver::new(
        &config.resolver.gamma_url,
        &config.resolver.clob_url,
        ResolverOptions {
            cache_ttl_seconds: config.resolver.market_resolution_ttl_seconds,
            max_retries: config.resolver.max_retries,
            retry_backoff_ms: config.resolver.retry_backoff_ms,
        },
    ));

    let action_log = ActionLog::load(Box::new(FileActionLogSink::new(
        &config.engine.action_log_path,
    )))
    .await
    .context("loading action log")?;

    let engine = Arc::new(Engine::new(
        aggregator,
        resolver,
        action_log,
        EngineOptions {
            poll_interval_seconds: config.engine.poll_interval_seconds,
            trade_duration_seconds: config.engine.trade_duration_seconds,
            switch_to_gamma_seconds: config.engine.switch_to_gamma_seconds,
            order_amount_usd: config.engine.order_amount_usd,
        },
    ));

    let router = create_router(Arc::clone(&engine));
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "control API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("shutdown signal received");
        })
        .await
        .context("serving control API")?;

    engine.stop().await;
    Ok(())
}
