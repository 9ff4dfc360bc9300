//! Exchange wire formats and their normalized in-core counterparts.
//!
//! Wire rates arrive as decimal fractions; everything past this module
//! speaks percent. All numeric fields arrive as strings and are parsed
//! here and nowhere else.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{Error, Result};

/// Multiplier applied to wire funding rates on ingress (fraction → percent)
pub const FUNDING_SCALE: f64 = 100.0;

/// Latest observation of a symbol's market, fed by REST or stream
#[derive(Debug, Clone)]
pub struct Ticker {
    pub symbol: String,
    pub last_price: f64,
    pub turnover_24h: f64,
    pub open_interest_value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Funding observation in percent
#[derive(Debug, Clone)]
pub struct Funding {
    pub symbol: String,
    /// Funding rate in percent (wire fraction × 100)
    pub rate_pct: f64,
    /// Next funding settlement, epoch milliseconds
    pub next_funding_time: i64,
    pub timestamp: DateTime<Utc>,
}

/// Price update from the ticker stream
#[derive(Debug, Clone)]
pub struct PriceData {
    pub symbol: String,
    pub last_price: f64,
    pub timestamp: DateTime<Utc>,
}

/// Candle interval supported by the kline endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KlineInterval {
    OneMinute,
    FiveMinutes,
}

impl KlineInterval {
    /// Wire value for the `interval` query parameter
    pub fn as_wire(&self) -> &'static str {
        match self {
            KlineInterval::OneMinute => "1",
            KlineInterval::FiveMinutes => "5",
        }
    }
}

/// v5 response envelope
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(rename = "retCode")]
    pub ret_code: i64,
    #[serde(rename = "retMsg")]
    pub ret_msg: String,
    pub result: Option<T>,
}

impl<T> ApiEnvelope<T> {
    /// Unwrap the payload or surface the exchange's status code
    pub fn into_result(self) -> Result<T> {
        if self.ret_code != 0 {
            return Err(Error::Exchange {
                code: self.ret_code,
                message: self.ret_msg,
            });
        }
        self.result
            .ok_or_else(|| Error::Parse("missing result payload".into()))
    }
}

#[derive(Debug, Deserialize)]
pub struct ListResult<T> {
    #[serde(default = "Vec::new")]
    pub list: Vec<T>,
    #[serde(rename = "nextPageCursor", default)]
    pub next_page_cursor: Option<String>,
}

/// Instrument metadata row from `/v5/market/instruments-info`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentInfo {
    pub symbol: String,
    #[serde(default)]
    pub contract_type: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub quote_coin: String,
}

impl InstrumentInfo {
    /// Linear USDT perpetual currently open for trading
    pub fn is_tradable_linear(&self) -> bool {
        self.status == "Trading"
            && self.quote_coin == "USDT"
            && self.contract_type == "LinearPerpetual"
    }
}

/// Ticker row from `/v5/market/tickers` (raw wire strings)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerRow {
    pub symbol: String,
    #[serde(default)]
    pub last_price: String,
    #[serde(default)]
    pub turnover_24h: String,
    #[serde(default)]
    pub open_interest: String,
    #[serde(default)]
    pub open_interest_value: String,
    #[serde(default)]
    pub funding_rate: String,
    #[serde(default)]
    pub next_funding_time: String,
}

/// Normalized ticker snapshot with funding already scaled to percent
#[derive(Debug, Clone)]
pub struct TickerSnapshot {
    pub symbol: String,
    pub last_price: f64,
    pub turnover_24h: f64,
    pub open_interest: f64,
    pub open_interest_value: f64,
    /// None when the wire field is absent or empty
    pub funding_rate_pct: Option<f64>,
    pub next_funding_time: i64,
}

impl TickerSnapshot {
    pub fn from_row(row: TickerRow) -> Self {
        let funding_rate_pct = parse_opt_f64(&row.funding_rate).map(|f| f * FUNDING_SCALE);
        Self {
            symbol: row.symbol,
            last_price: parse_f64(&row.last_price),
            turnover_24h: parse_f64(&row.turnover_24h),
            open_interest: parse_f64(&row.open_interest),
            open_interest_value: parse_f64(&row.open_interest_value),
            funding_rate_pct,
            next_funding_time: row.next_funding_time.parse().unwrap_or(0),
        }
    }

    /// Split the snapshot into the store's ticker and funding views
    pub fn into_observations(self, now: DateTime<Utc>) -> (Ticker, Option<Funding>) {
        let funding = self.funding_rate_pct.map(|rate_pct| Funding {
            symbol: self.symbol.clone(),
            rate_pct,
            next_funding_time: self.next_funding_time,
            timestamp: now,
        });
        let ticker = Ticker {
            symbol: self.symbol,
            last_price: self.last_price,
            turnover_24h: self.turnover_24h,
            open_interest_value: self.open_interest_value,
            timestamp: now,
        };
        (ticker, funding)
    }
}

/// Kline rows arrive newest-first as string arrays:
/// [startTime, open, high, low, close, volume, turnover]
#[derive(Debug, Deserialize)]
pub struct KlineRow(pub Vec<String>);

impl KlineRow {
    pub fn close(&self) -> Option<f64> {
        self.0.get(4).and_then(|v| v.parse().ok())
    }
}

fn parse_f64(raw: &str) -> f64 {
    raw.parse().unwrap_or(0.0)
}

fn parse_opt_f64(raw: &str) -> Option<f64> {
    if raw.is_empty() {
        return None;
    }
    raw.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_rejects_error_code() {
        let envelope: ApiEnvelope<ListResult<TickerRow>> = serde_json::from_str(
            r#"{"retCode":10001,"retMsg":"params error","result":null}"#,
        )
        .unwrap();
        match envelope.into_result() {
            Err(Error::Exchange { code, .. }) => assert_eq!(code, 10001),
            other => panic!("expected Exchange error, got {:?}", other),
        }
    }

    #[test]
    fn test_ticker_row_funding_scaled_to_percent() {
        let row: TickerRow = serde_json::from_str(
            r#"{
                "symbol": "FOOUSDT",
                "lastPrice": "1.2345",
                "turnover24h": "2500000",
                "openInterest": "1000000",
                "openInterestValue": "750000",
                "fundingRate": "0.0001",
                "nextFundingTime": "1712345678000"
            }"#,
        )
        .unwrap();
        let snap = TickerSnapshot::from_row(row);
        assert_eq!(snap.last_price, 1.2345);
        assert!((snap.funding_rate_pct.unwrap() - 0.01).abs() < 1e-12);
        assert_eq!(snap.next_funding_time, 1712345678000);
    }

    #[test]
    fn test_ticker_row_empty_funding_is_none() {
        let row: TickerRow = serde_json::from_str(
            r#"{"symbol":"BARUSDT","lastPrice":"2.0","fundingRate":""}"#,
        )
        .unwrap();
        let snap = TickerSnapshot::from_row(row);
        assert!(snap.funding_rate_pct.is_none());
    }

    #[test]
    fn test_instrument_tradable_filter() {
        let inst = InstrumentInfo {
            symbol: "FOOUSDT".into(),
            contract_type: "LinearPerpetual".into(),
            status: "Trading".into(),
            quote_coin: "USDT".into(),
        };
        assert!(inst.is_tradable_linear());

        let delisted = InstrumentInfo {
            status: "Closed".into(),
            ..inst.clone()
        };
        assert!(!delisted.is_tradable_linear());

        let inverse = InstrumentInfo {
            quote_coin: "USD".into(),
            ..inst
        };
        assert!(!inverse.is_tradable_linear());
    }

    #[test]
    fn test_kline_row_close() {
        let row: KlineRow = serde_json::from_str(
            r#"["1712345640000","100.0","101.0","99.5","100.5","1234","123456"]"#,
        )
        .unwrap();
        assert_eq!(row.close(), Some(100.5));
    }
}
