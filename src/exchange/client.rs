//! Bybit v5 REST client
//!
//! Stateless translation of the market endpoints into internal types.
//! The rest of the crate never sees wire strings or fractional rates.

use std::time::Duration;

use tracing::debug;

use crate::error::Result;
use crate::exchange::types::{
    ApiEnvelope, InstrumentInfo, KlineInterval, KlineRow, ListResult, TickerRow, TickerSnapshot,
};

const MAINNET_REST: &str = "https://api.bybit.com";
const TESTNET_REST: &str = "https://api-testnet.bybit.com";

/// Instruments-info page size; the linear universe fits in a few pages
const INSTRUMENTS_PAGE_LIMIT: u32 = 1000;

pub struct ExchangeClient {
    http: reqwest::Client,
    base_url: String,
}

impl ExchangeClient {
    pub fn new(testnet: bool, timeout_ms: u64) -> Self {
        let base_url = if testnet { TESTNET_REST } else { MAINNET_REST };
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_millis(timeout_ms))
                .build()
                .unwrap_or_default(),
            base_url: base_url.to_string(),
        }
    }

    /// Fetch all linear perpetual instruments, following pagination
    pub async fn get_instruments(&self) -> Result<Vec<InstrumentInfo>> {
        let mut instruments = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut url = format!(
                "{}/v5/market/instruments-info?category=linear&limit={}",
                self.base_url, INSTRUMENTS_PAGE_LIMIT
            );
            if let Some(ref c) = cursor {
                url.push_str("&cursor=");
                url.push_str(c);
            }

            let envelope: ApiEnvelope<ListResult<InstrumentInfo>> =
                self.http.get(&url).send().await?.json().await?;
            let page = envelope.into_result()?;
            instruments.extend(page.list);

            match page.next_page_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        debug!("fetched {} linear instruments", instruments.len());
        Ok(instruments)
    }

    /// Bulk ticker snapshot for the whole linear category
    pub async fn get_tickers(&self) -> Result<Vec<TickerSnapshot>> {
        let url = format!("{}/v5/market/tickers?category=linear", self.base_url);
        let envelope: ApiEnvelope<ListResult<TickerRow>> =
            self.http.get(&url).send().await?.json().await?;
        let rows = envelope.into_result()?;
        Ok(rows.list.into_iter().map(TickerSnapshot::from_row).collect())
    }

    /// Snapshot for a single symbol
    pub async fn get_ticker(&self, symbol: &str) -> Result<Option<TickerSnapshot>> {
        let url = format!(
            "{}/v5/market/tickers?category=linear&symbol={}",
            self.base_url, symbol
        );
        let envelope: ApiEnvelope<ListResult<TickerRow>> =
            self.http.get(&url).send().await?.json().await?;
        let rows = envelope.into_result()?;
        Ok(rows
            .list
            .into_iter()
            .next()
            .map(TickerSnapshot::from_row))
    }

    /// Close-price history, reversed to oldest-first
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: KlineInterval,
        limit: u32,
    ) -> Result<Vec<f64>> {
        let url = format!(
            "{}/v5/market/kline?category=linear&symbol={}&interval={}&limit={}",
            self.base_url,
            symbol,
            interval.as_wire(),
            limit
        );
        let envelope: ApiEnvelope<ListResult<KlineRow>> =
            self.http.get(&url).send().await?.json().await?;
        let rows = envelope.into_result()?;

        // The exchange returns newest-first; the indicator math wants
        // oldest-first.
        let mut closes: Vec<f64> = rows.list.iter().filter_map(KlineRow::close).collect();
        closes.reverse();
        Ok(closes)
    }
}
