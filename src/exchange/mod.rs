//! Bybit exchange access: REST client and public stream.

pub mod client;
pub mod types;
pub mod ws;

pub use client::ExchangeClient;
pub use types::{Funding, InstrumentInfo, KlineInterval, PriceData, Ticker, TickerSnapshot};
pub use ws::{MarketStream, StreamConfig};
