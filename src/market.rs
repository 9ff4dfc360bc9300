//! Market State Store
//!
//! Single source of truth for per-symbol live state: latest ticker,
//! latest funding, a rolling close-price series and a short funding
//! history. Both transports write through `ingest_*`; everything else
//! reads through the accessors. DashMap shards give per-symbol locking,
//! so readers never observe a half-applied update.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::exchange::{ExchangeClient, Funding, KlineInterval, PriceData, Ticker};

/// Hard capacity of the close-price series
pub const PRICE_SERIES_CAP: usize = 100;
/// Hard capacity of the funding history
pub const FUNDING_HISTORY_CAP: usize = 10;

/// Symbols initialized per startup batch
const INIT_BATCH_SIZE: usize = 20;
/// Spacing between startup batches
const INIT_BATCH_DELAY: Duration = Duration::from_millis(300);

#[derive(Debug, Default)]
struct SymbolState {
    ticker: Option<Ticker>,
    funding: Option<Funding>,
    closes: VecDeque<f64>,
    funding_history: VecDeque<Funding>,
}

#[derive(Default)]
pub struct MarketStateStore {
    symbols: DashMap<String, SymbolState>,
}

impl MarketStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a symbol from fetched history and first snapshots. Also the
    /// entry point tests use to build stores without a network.
    pub fn seed_symbol(
        &self,
        symbol: &str,
        closes: Vec<f64>,
        ticker: Option<Ticker>,
        funding: Option<Funding>,
    ) {
        let mut state = SymbolState {
            ticker,
            funding: funding.clone(),
            closes: closes.into_iter().collect(),
            funding_history: VecDeque::new(),
        };
        while state.closes.len() > PRICE_SERIES_CAP {
            state.closes.pop_front();
        }
        if let Some(funding) = funding {
            state.funding_history.push_back(funding);
        }
        self.symbols.insert(symbol.to_string(), state);
    }

    /// Initialize one symbol: 100-point 1m close history plus first
    /// ticker/funding snapshots.
    pub async fn init_symbol(&self, client: &ExchangeClient, symbol: &str) -> Result<()> {
        let closes = client
            .get_klines(symbol, KlineInterval::OneMinute, PRICE_SERIES_CAP as u32)
            .await?;
        let snapshot = client.get_ticker(symbol).await?;

        let (ticker, funding) = match snapshot {
            Some(snap) => {
                let (ticker, funding) = snap.into_observations(Utc::now());
                (Some(ticker), funding)
            }
            None => (None, None),
        };

        self.seed_symbol(symbol, closes, ticker, funding);
        Ok(())
    }

    /// Initialize the whole universe in rate-limit-friendly batches.
    pub async fn bootstrap(&self, client: &ExchangeClient, symbols: &[String]) {
        let mut initialized = 0usize;
        for batch in symbols.chunks(INIT_BATCH_SIZE) {
            let results =
                futures_util::future::join_all(batch.iter().map(|s| self.init_symbol(client, s)))
                    .await;
            for (symbol, result) in batch.iter().zip(results) {
                match result {
                    Ok(()) => initialized += 1,
                    Err(e) => warn!("failed to initialize {}: {}", symbol, e),
                }
            }
            tokio::time::sleep(INIT_BATCH_DELAY).await;
        }
        info!("initialized {}/{} symbols", initialized, symbols.len());
    }

    /// Apply a ticker update: refresh the cache and extend the close
    /// series. Updates for unknown symbols are dropped; entries are only
    /// created through initialization.
    pub fn ingest_ticker(&self, update: PriceData) {
        if update.last_price <= 0.0 {
            warn!("discarding non-positive price for {}", update.symbol);
            return;
        }
        let Some(mut state) = self.symbols.get_mut(&update.symbol) else {
            debug!("ticker for untracked symbol {}", update.symbol);
            return;
        };

        // Timestamps are monotonic per symbol; drop stale observations
        if let Some(ref current) = state.ticker {
            if update.timestamp < current.timestamp {
                return;
            }
        }

        match state.ticker {
            Some(ref mut ticker) => {
                ticker.last_price = update.last_price;
                ticker.timestamp = update.timestamp;
            }
            None => {
                state.ticker = Some(Ticker {
                    symbol: update.symbol.clone(),
                    last_price: update.last_price,
                    turnover_24h: 0.0,
                    open_interest_value: 0.0,
                    timestamp: update.timestamp,
                });
            }
        }

        state.closes.push_back(update.last_price);
        while state.closes.len() > PRICE_SERIES_CAP {
            state.closes.pop_front();
        }
    }

    /// Apply a funding update: refresh the cache and extend the history.
    /// Rates outside the ±10% sanity band are discarded as bad prints.
    pub fn ingest_funding(&self, update: Funding) {
        if update.rate_pct.abs() > 10.0 {
            warn!(
                "discarding implausible funding {}% for {}",
                update.rate_pct, update.symbol
            );
            return;
        }
        let Some(mut state) = self.symbols.get_mut(&update.symbol) else {
            debug!("funding for untracked symbol {}", update.symbol);
            return;
        };

        if let Some(ref current) = state.funding {
            if update.timestamp < current.timestamp {
                return;
            }
        }

        state.funding = Some(update.clone());
        state.funding_history.push_back(update);
        while state.funding_history.len() > FUNDING_HISTORY_CAP {
            state.funding_history.pop_front();
        }
    }

    pub fn market(&self, symbol: &str) -> Option<Ticker> {
        self.symbols.get(symbol).and_then(|s| s.ticker.clone())
    }

    pub fn funding(&self, symbol: &str) -> Option<Funding> {
        self.symbols.get(symbol).and_then(|s| s.funding.clone())
    }

    /// Close prices, oldest first
    pub fn price_history(&self, symbol: &str) -> Vec<f64> {
        self.symbols
            .get(symbol)
            .map(|s| s.closes.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Funding observations, oldest first
    pub fn funding_history(&self, symbol: &str) -> Vec<Funding> {
        self.symbols
            .get(symbol)
            .map(|s| s.funding_history.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn symbols(&self) -> Vec<String> {
        self.symbols.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}
