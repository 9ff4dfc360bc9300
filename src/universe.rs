//! Universe construction
//!
//! One-shot intersection of listing metadata with quality thresholds and
//! the configured blacklist. Runs once at startup; the resulting symbol
//! set is immutable for the process lifetime.

use std::collections::HashMap;

use tracing::{info, warn};

use crate::config::UniverseConfig;
use crate::error::Result;
use crate::exchange::{ExchangeClient, InstrumentInfo, TickerSnapshot};

/// When the open-interest value field is missing/zero, fall back to the
/// contract count at threshold/1000.
const OI_COUNT_DIVISOR: f64 = 1000.0;

/// Counts per rejection reason, for the startup log line
#[derive(Debug, Default, PartialEq)]
pub struct RejectionCounts {
    pub low_volume: usize,
    pub low_open_interest: usize,
    pub price_out_of_band: usize,
    pub no_funding: usize,
    pub blacklisted: usize,
}

impl RejectionCounts {
    pub fn total(&self) -> usize {
        self.low_volume
            + self.low_open_interest
            + self.price_out_of_band
            + self.no_funding
            + self.blacklisted
    }
}

/// Apply the quality filters to a bulk snapshot. Pure; the network half
/// lives in [`load_universe`].
pub fn apply_filters(
    instruments: &[InstrumentInfo],
    tickers: &[TickerSnapshot],
    cfg: &UniverseConfig,
) -> (Vec<String>, RejectionCounts) {
    let by_symbol: HashMap<&str, &TickerSnapshot> =
        tickers.iter().map(|t| (t.symbol.as_str(), t)).collect();

    let mut accepted = Vec::new();
    let mut rejections = RejectionCounts::default();

    for inst in instruments.iter().filter(|i| i.is_tradable_linear()) {
        let Some(ticker) = by_symbol.get(inst.symbol.as_str()) else {
            // No snapshot row at all: treat as an illiquid listing
            rejections.low_volume += 1;
            continue;
        };

        if cfg
            .blacklist
            .iter()
            .any(|b| b.eq_ignore_ascii_case(&inst.symbol))
        {
            rejections.blacklisted += 1;
            continue;
        }

        if ticker.turnover_24h < cfg.min_volume_24h_usdt {
            rejections.low_volume += 1;
            continue;
        }

        let oi_ok = if ticker.open_interest_value > 0.0 {
            ticker.open_interest_value >= cfg.min_open_interest_usdt
        } else {
            ticker.open_interest >= cfg.min_open_interest_usdt / OI_COUNT_DIVISOR
        };
        if !oi_ok {
            rejections.low_open_interest += 1;
            continue;
        }

        if ticker.last_price < cfg.min_price_usdt || ticker.last_price > cfg.max_price_usdt {
            rejections.price_out_of_band += 1;
            continue;
        }

        if ticker.funding_rate_pct.is_none() {
            rejections.no_funding += 1;
            continue;
        }

        accepted.push(inst.symbol.clone());
    }

    (accepted, rejections)
}

/// Build the monitored symbol set.
///
/// Instrument fetch failure is fatal; a bulk-ticker failure degrades to
/// the unfiltered instrument list.
pub async fn load_universe(
    client: &ExchangeClient,
    cfg: &UniverseConfig,
) -> Result<Vec<String>> {
    let instruments = client.get_instruments().await?;

    let tickers = match client.get_tickers().await {
        Ok(tickers) => tickers,
        Err(e) => {
            warn!(
                "bulk ticker snapshot failed ({}); monitoring unfiltered instrument list",
                e
            );
            return Ok(instruments
                .iter()
                .filter(|i| i.is_tradable_linear())
                .map(|i| i.symbol.clone())
                .collect());
        }
    };

    let (accepted, rejections) = apply_filters(&instruments, &tickers, cfg);

    info!(
        accepted = accepted.len(),
        low_volume = rejections.low_volume,
        low_open_interest = rejections.low_open_interest,
        price_out_of_band = rejections.price_out_of_band,
        no_funding = rejections.no_funding,
        blacklisted = rejections.blacklisted,
        "universe loaded"
    );

    Ok(accepted)
}
