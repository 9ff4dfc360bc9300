//! Notification sink
//!
//! Signals leave the process as a single webhook POST carrying one
//! embed card. The governor treats the sink as opaque: accepted or
//! failed, nothing in between.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

use crate::error::{Error, Result};
use crate::signal::{Bias, Signal};

const EMBED_TITLE: &str = "🎯 DYNASTY FUNDING RATE ALERTS";
const COLOR_LONG: u32 = 0x00C851;
const COLOR_SHORT: u32 = 0xFF4444;

/// Outbound delivery seam
#[async_trait]
pub trait Sink: Send + Sync {
    async fn deliver(&self, signal: &Signal) -> Result<()>;
}

/// Build the embed payload for a signal
pub fn build_payload(signal: &Signal) -> Value {
    let rsi = signal.rsi.unwrap_or(0.0);
    let (color, glyph) = match signal.bias {
        Bias::Long => (COLOR_LONG, "🟢"),
        Bias::Short => (COLOR_SHORT, "🔴"),
    };

    json!({
        "embeds": [{
            "title": EMBED_TITLE,
            "description": format!("**{}** — {} {}", signal.symbol, signal.signal_type, signal.context),
            "color": color,
            "fields": [
                { "name": "Symbol", "value": signal.symbol, "inline": true },
                { "name": "Timeframe", "value": signal.timeframe, "inline": true },
                {
                    "name": "Movement",
                    "value": format!("↑ {:.1}% / ↓ {:.1}%", signal.movement.up_pct, signal.movement.down_pct),
                    "inline": true
                },
                {
                    "name": "RSI (15m / 5m / 1m)",
                    // Single-timeframe pipeline: the 1m value stands in
                    // for all three slots.
                    "value": format!("{:.1} / {:.1} / {:.1}", rsi, rsi, rsi),
                    "inline": true
                },
                {
                    "name": "Funding",
                    "value": format!("{:.4}%", signal.funding_rate),
                    "inline": true
                },
                {
                    "name": "Bias",
                    "value": format!("{} {} · {}", glyph, signal.bias, signal.funding_bias),
                    "inline": true
                },
                {
                    "name": "Momentum",
                    "value": signal.momentum_label.to_string(),
                    "inline": true
                },
                {
                    "name": "Score",
                    "value": format!("{:.1}", signal.score),
                    "inline": true
                },
                {
                    "name": "Links",
                    "value": format!(
                        "[Chart](https://www.tradingview.com/chart/?symbol=BYBIT%3A{sym}.P) · [Bybit](https://www.bybit.com/trade/usdt/{sym})",
                        sym = signal.symbol
                    ),
                    "inline": false
                }
            ]
        }]
    })
}

/// Webhook delivery over HTTPS
pub struct WebhookSink {
    http: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Sink for WebhookSink {
    async fn deliver(&self, signal: &Signal) -> Result<()> {
        let response = self
            .http
            .post(&self.url)
            .json(&build_payload(signal))
            .send()
            .await
            .map_err(|e| Error::Sink(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Sink(format!(
                "webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Dry-run sink: logs the card instead of POSTing it
pub struct LogSink;

#[async_trait]
impl Sink for LogSink {
    async fn deliver(&self, signal: &Signal) -> Result<()> {
        info!(
            symbol = %signal.symbol,
            r#type = %signal.signal_type,
            bias = %signal.bias,
            score = signal.score,
            funding = signal.funding_rate,
            "dry-run alert"
        );
        Ok(())
    }
}
