//! Command implementations

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::Config;
use crate::exchange::{ExchangeClient, MarketStream, StreamConfig};
use crate::governor::{DispatchGovernor, GovernorSettings};
use crate::market::MarketStateStore;
use crate::notify::{LogSink, Sink, WebhookSink};
use crate::persistence::{PostgresStore, SignalStore};
use crate::scheduler::Scheduler;
use crate::signal::Evaluator;
use crate::universe;

/// Run the full pipeline until ctrl-c
pub async fn start(config: &Config, dry_run: bool) -> Result<()> {
    let sink: Arc<dyn Sink> = if dry_run {
        info!("dry-run: alerts will be logged, not delivered");
        Arc::new(LogSink)
    } else {
        let url = config.require_webhook()?;
        Arc::new(WebhookSink::new(url))
    };

    let client = Arc::new(ExchangeClient::new(
        config.exchange.testnet,
        config.exchange.rest_timeout_ms,
    ));

    // Universe
    let mut symbols = universe::load_universe(&client, &config.universe)
        .await
        .context("failed to load universe")?;
    if symbols.is_empty() {
        anyhow::bail!("universe is empty; loosen the filters");
    }
    // The BTC backdrop needs BTCUSDT tracked even when it gets filtered out
    if config.signals.enable_btc_context && !symbols.iter().any(|s| s == "BTCUSDT") {
        symbols.push("BTCUSDT".to_string());
    }
    info!("monitoring {} symbols", symbols.len());

    // Market state
    let store = Arc::new(MarketStateStore::new());
    store.bootstrap(&client, &symbols).await;

    // Governor + optional external store
    let mut governor = DispatchGovernor::new(
        GovernorSettings::from_config(&config.governor, config.signals.min_score_threshold),
        sink,
    );
    if let Some(url) = &config.governor.redis_url {
        governor.attach_store(url).await;
    }
    let governor = Arc::new(governor);

    // Optional persistence
    let persistence: Option<Arc<dyn SignalStore>> = if config.persistence.enabled() {
        match PostgresStore::connect(&config.persistence).await {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                warn!("persistence unavailable ({}); continuing without it", e);
                None
            }
        }
    } else {
        None
    };

    // Stream
    let (stream, funding_rx, ticker_rx) = MarketStream::new(StreamConfig::new(
        config.exchange.testnet,
        config.exchange.reconnect_delay_ms,
        config.exchange.ping_interval_secs,
    ));
    for symbol in &symbols {
        stream.subscribe(symbol).await;
    }
    stream.start();

    // Orchestration
    let evaluator = Arc::new(Evaluator::new(
        store.clone(),
        config.signals.enable_btc_context,
    ));
    let scheduler = Scheduler::new(
        store,
        evaluator,
        governor,
        persistence,
        config.signals.min_score_threshold,
    );
    scheduler.spawn_stream_consumers(funding_rx, ticker_rx);
    scheduler.spawn_sweep();

    info!("pipeline running; ctrl-c to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    info!("shutting down");
    scheduler.shutdown();
    stream.stop();
    // Let in-flight evaluations drain
    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    Ok(())
}

/// Print the effective configuration with secrets masked
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

/// One-shot exchange connectivity check
pub async fn health(config: &Config) -> Result<()> {
    let client = ExchangeClient::new(config.exchange.testnet, config.exchange.rest_timeout_ms);
    match client.get_ticker("BTCUSDT").await {
        Ok(Some(snap)) => {
            println!(
                "exchange OK — BTCUSDT last={} funding={}",
                snap.last_price,
                snap.funding_rate_pct
                    .map(|f| format!("{:.4}%", f))
                    .unwrap_or_else(|| "n/a".into())
            );
            Ok(())
        }
        Ok(None) => anyhow::bail!("exchange reachable but returned no BTCUSDT ticker"),
        Err(e) => anyhow::bail!("exchange check failed: {}", e),
    }
}

/// Load and print the monitored symbol set
pub async fn show_universe(config: &Config) -> Result<()> {
    let client = ExchangeClient::new(config.exchange.testnet, config.exchange.rest_timeout_ms);
    let symbols = universe::load_universe(&client, &config.universe).await?;
    for symbol in &symbols {
        println!("{}", symbol);
    }
    println!("{} symbols", symbols.len());
    Ok(())
}
