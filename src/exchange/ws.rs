//! Bybit public stream client
//!
//! Maintains one long-lived connection carrying per-symbol funding and
//! ticker topics. Subscription intent survives reconnects: every symbol
//! ever subscribed is replayed after the socket comes back.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::exchange::types::{Funding, PriceData, FUNDING_SCALE};

const MAINNET_WS: &str = "wss://stream.bybit.com/v5/public/linear";
const TESTNET_WS: &str = "wss://stream-testnet.bybit.com/v5/public/linear";

/// Max topics per subscribe frame when replaying after reconnect
const SUBSCRIBE_CHUNK: usize = 10;

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// Configuration for the stream client
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub url: String,
    /// Delay before reconnect attempts
    pub reconnect_delay: Duration,
    /// Protocol-level ping interval
    pub ping_interval: Duration,
}

impl StreamConfig {
    pub fn new(testnet: bool, reconnect_delay_ms: u64, ping_interval_secs: u64) -> Self {
        Self {
            url: if testnet { TESTNET_WS } else { MAINNET_WS }.to_string(),
            reconnect_delay: Duration::from_millis(reconnect_delay_ms),
            ping_interval: Duration::from_secs(ping_interval_secs),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::new(false, 5_000, 20)
    }
}

/// Outgoing subscribe frame
#[derive(Debug, Serialize)]
struct SubscribeFrame {
    op: &'static str,
    args: Vec<String>,
}

impl SubscribeFrame {
    fn for_symbols<'a>(symbols: impl IntoIterator<Item = &'a str>) -> Self {
        let args = symbols
            .into_iter()
            .flat_map(|s| [format!("funding.{}", s), format!("tickers.{}", s)])
            .collect();
        Self {
            op: "subscribe",
            args,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WsFrame {
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    op: Option<String>,
    #[serde(default)]
    success: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FundingPayload {
    #[serde(default)]
    funding_rate: String,
    #[serde(default)]
    next_funding_time: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerPayload {
    #[serde(default)]
    last_price: String,
}

/// A parsed market-data frame
#[derive(Debug, Clone)]
enum StreamUpdate {
    Funding(Funding),
    Ticker(PriceData),
}

/// Parse one server frame. `Ok(None)` covers acks, pongs and other
/// non-data frames; malformed data frames surface as `Err` so the caller
/// can log and drop them.
fn parse_frame(text: &str) -> Result<Option<StreamUpdate>> {
    let frame: WsFrame = serde_json::from_str(text)?;

    if let Some(success) = frame.success {
        if !success {
            return Err(Error::Parse(format!("subscription rejected: {}", text)));
        }
        return Ok(None);
    }
    if frame.op.as_deref() == Some("pong") || frame.op.as_deref() == Some("ping") {
        return Ok(None);
    }

    let (topic, data) = match (frame.topic, frame.data) {
        (Some(topic), Some(data)) => (topic, data),
        _ => return Ok(None),
    };

    if let Some(symbol) = topic.strip_prefix("funding.") {
        let payload: FundingPayload = serde_json::from_value(data)?;
        let rate: f64 = payload
            .funding_rate
            .parse()
            .map_err(|_| Error::Parse(format!("bad fundingRate for {}", symbol)))?;
        return Ok(Some(StreamUpdate::Funding(Funding {
            symbol: symbol.to_string(),
            rate_pct: rate * FUNDING_SCALE,
            next_funding_time: payload.next_funding_time.parse().unwrap_or(0),
            timestamp: Utc::now(),
        })));
    }

    if let Some(symbol) = topic.strip_prefix("tickers.") {
        let payload: TickerPayload = serde_json::from_value(data)?;
        // Ticker deltas without a price change omit lastPrice
        if payload.last_price.is_empty() {
            return Ok(None);
        }
        let price: f64 = payload
            .last_price
            .parse()
            .map_err(|_| Error::Parse(format!("bad lastPrice for {}", symbol)))?;
        return Ok(Some(StreamUpdate::Ticker(PriceData {
            symbol: symbol.to_string(),
            last_price: price,
            timestamp: Utc::now(),
        })));
    }

    Ok(None)
}

/// Public stream client
pub struct MarketStream {
    config: StreamConfig,
    /// Subscription intent; survives reconnects
    intents: Arc<RwLock<BTreeSet<String>>>,
    cmd_tx: mpsc::UnboundedSender<String>,
    cmd_rx: StdRwLock<Option<mpsc::UnboundedReceiver<String>>>,
    funding_tx: mpsc::UnboundedSender<Funding>,
    ticker_tx: mpsc::UnboundedSender<PriceData>,
    shutdown: broadcast::Sender<()>,
    state: Arc<StdRwLock<ConnState>>,
}

impl MarketStream {
    /// Create the client plus its two output streams
    pub fn new(
        config: StreamConfig,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<Funding>,
        mpsc::UnboundedReceiver<PriceData>,
    ) {
        let (funding_tx, funding_rx) = mpsc::unbounded_channel();
        let (ticker_tx, ticker_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = broadcast::channel(1);

        (
            Self {
                config,
                intents: Arc::new(RwLock::new(BTreeSet::new())),
                cmd_tx,
                cmd_rx: StdRwLock::new(Some(cmd_rx)),
                funding_tx,
                ticker_tx,
                shutdown,
                state: Arc::new(StdRwLock::new(ConnState::Disconnected)),
            },
            funding_rx,
            ticker_rx,
        )
    }

    pub fn state(&self) -> ConnState {
        *self.state.read().unwrap()
    }

    /// Record subscription intent; if connected, the live socket picks the
    /// symbol up immediately. Idempotent.
    pub async fn subscribe(&self, symbol: &str) {
        let mut intents = self.intents.write().await;
        if intents.insert(symbol.to_string()) {
            let _ = self.cmd_tx.send(symbol.to_string());
        }
    }

    /// Start the connection loop
    pub fn start(&self) {
        let config = self.config.clone();
        let intents = self.intents.clone();
        let funding_tx = self.funding_tx.clone();
        let ticker_tx = self.ticker_tx.clone();
        let state = self.state.clone();
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut cmd_rx = self
            .cmd_rx
            .write()
            .unwrap()
            .take()
            .expect("stream already started");

        tokio::spawn(async move {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    info!("market stream shutting down");
                    break;
                }

                *state.write().unwrap() = ConnState::Connecting;
                match Self::connect_and_stream(
                    &config,
                    &intents,
                    &funding_tx,
                    &ticker_tx,
                    &state,
                    &mut cmd_rx,
                    &mut shutdown_rx,
                )
                .await
                {
                    Ok(()) => info!("market stream closed cleanly"),
                    Err(e) => error!("market stream error: {}", e),
                }

                *state.write().unwrap() = ConnState::Disconnected;

                tokio::select! {
                    _ = sleep(config.reconnect_delay) => {
                        warn!("reconnecting market stream in {:?}", config.reconnect_delay);
                    }
                    _ = shutdown_rx.recv() => {
                        info!("market stream shutting down");
                        break;
                    }
                }
            }
            *state.write().unwrap() = ConnState::Disconnected;
        });
    }

    /// Stop the client
    pub fn stop(&self) {
        *self.state.write().unwrap() = ConnState::Closing;
        let _ = self.shutdown.send(());
    }

    async fn connect_and_stream(
        config: &StreamConfig,
        intents: &RwLock<BTreeSet<String>>,
        funding_tx: &mpsc::UnboundedSender<Funding>,
        ticker_tx: &mpsc::UnboundedSender<PriceData>,
        state: &StdRwLock<ConnState>,
        cmd_rx: &mut mpsc::UnboundedReceiver<String>,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<()> {
        let url = url::Url::parse(&config.url)
            .map_err(|e| Error::Config(format!("Invalid stream URL: {}", e)))?;

        info!("connecting to {}", url);
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        *state.write().unwrap() = ConnState::Connected;
        info!("market stream connected");

        let (mut write, mut read) = ws_stream.split();

        // Pending single-symbol commands are covered by the full replay
        while cmd_rx.try_recv().is_ok() {}

        // Replay the whole intent set
        let symbols: Vec<String> = intents.read().await.iter().cloned().collect();
        for chunk in symbols.chunks(SUBSCRIBE_CHUNK) {
            let frame = SubscribeFrame::for_symbols(chunk.iter().map(String::as_str));
            write.send(Message::Text(serde_json::to_string(&frame)?)).await?;
        }
        if !symbols.is_empty() {
            info!("resubscribed {} symbols", symbols.len());
        }

        let mut ping_timer = tokio::time::interval(config.ping_interval);
        ping_timer.tick().await; // first tick is immediate

        loop {
            tokio::select! {
                _ = ping_timer.tick() => {
                    write.send(Message::Text(r#"{"op":"ping"}"#.to_string())).await?;
                    debug!("sent ping");
                }

                Some(symbol) = cmd_rx.recv() => {
                    let frame = SubscribeFrame::for_symbols([symbol.as_str()]);
                    write.send(Message::Text(serde_json::to_string(&frame)?)).await?;
                    debug!("subscribed {}", symbol);
                }

                _ = shutdown_rx.recv() => {
                    *state.write().unwrap() = ConnState::Closing;
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            match parse_frame(&text) {
                                Ok(Some(StreamUpdate::Funding(funding))) => {
                                    let _ = funding_tx.send(funding);
                                }
                                Ok(Some(StreamUpdate::Ticker(ticker))) => {
                                    let _ = ticker_tx.send(ticker);
                                }
                                Ok(None) => {}
                                Err(e) => {
                                    warn!("discarding malformed frame: {}", e);
                                }
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            write.send(Message::Pong(payload)).await?;
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("stream closed by server");
                            return Ok(());
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(Error::StreamDisconnected),
                        _ => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_frame_covers_both_topics() {
        let frame = SubscribeFrame::for_symbols(["BTCUSDT"]);
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""op":"subscribe""#));
        assert!(json.contains("funding.BTCUSDT"));
        assert!(json.contains("tickers.BTCUSDT"));
    }

    #[test]
    fn test_parse_funding_frame_scales_to_percent() {
        let update = parse_frame(
            r#"{"topic":"funding.ETHUSDT","data":{"fundingRate":"0.0005","nextFundingTime":"1712345678000"}}"#,
        )
        .unwrap()
        .unwrap();
        match update {
            StreamUpdate::Funding(f) => {
                assert_eq!(f.symbol, "ETHUSDT");
                assert!((f.rate_pct - 0.05).abs() < 1e-12);
                assert_eq!(f.next_funding_time, 1712345678000);
            }
            other => panic!("expected funding update, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_ticker_frame() {
        let update = parse_frame(
            r#"{"topic":"tickers.SOLUSDT","data":{"lastPrice":"147.25"}}"#,
        )
        .unwrap()
        .unwrap();
        match update {
            StreamUpdate::Ticker(t) => {
                assert_eq!(t.symbol, "SOLUSDT");
                assert_eq!(t.last_price, 147.25);
            }
            other => panic!("expected ticker update, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_pong_and_ack_frames_ignored() {
        assert!(parse_frame(r#"{"op":"pong"}"#).unwrap().is_none());
        assert!(parse_frame(r#"{"success":true,"op":"subscribe"}"#)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_parse_rejected_subscription_is_error() {
        assert!(parse_frame(r#"{"success":false,"op":"subscribe"}"#).is_err());
    }

    #[test]
    fn test_parse_malformed_frame_is_error() {
        assert!(parse_frame("not json").is_err());
        assert!(parse_frame(r#"{"topic":"funding.X","data":{"fundingRate":"abc"}}"#).is_err());
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let (stream, _f, _t) = MarketStream::new(StreamConfig::default());
        stream.subscribe("BTCUSDT").await;
        stream.subscribe("BTCUSDT").await;
        stream.subscribe("ETHUSDT").await;
        assert_eq!(stream.intents.read().await.len(), 2);
    }
}
