//! Scheduler / orchestrator
//!
//! Two triggers feed the same per-symbol pipeline: every stream update,
//! and a periodic sweep over the whole universe with priority
//! bucketing. The overlap is deliberate; the governor owns suppression,
//! so a symbol processed by both paths still alerts at most once per
//! cooldown window.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::exchange::{Funding, PriceData};
use crate::funding;
use crate::governor::{Dispatch, DispatchGovernor};
use crate::indicators::{self, RSI_PERIOD};
use crate::market::MarketStateStore;
use crate::persistence::SignalStore;
use crate::signal::{scorer, Evaluator};

/// Backup sweep period
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);
/// Parallelism per priority bucket
const HIGH_PRIORITY_BATCH: usize = 5;
const NORMAL_PRIORITY_BATCH: usize = 10;
/// Pause between sweep batches
const BATCH_DELAY: Duration = Duration::from_millis(1000);

/// High-priority thresholds
const HIGH_FUNDING_PCT: f64 = 0.03;
const HIGH_RSI: f64 = 75.0;
const LOW_RSI: f64 = 25.0;
const HIGH_VELOCITY: f64 = 0.0001;

#[derive(Clone)]
pub struct Scheduler {
    store: Arc<MarketStateStore>,
    evaluator: Arc<Evaluator>,
    governor: Arc<DispatchGovernor>,
    persistence: Option<Arc<dyn SignalStore>>,
    min_score: f64,
    shutdown: broadcast::Sender<()>,
}

/// A symbol is swept ahead of the pack when funding is loud, RSI is
/// pinned, or funding is moving fast.
pub fn is_high_priority(funding_pct: f64, rsi: Option<f64>, velocity: f64) -> bool {
    if funding_pct.abs() >= HIGH_FUNDING_PCT {
        return true;
    }
    if let Some(rsi) = rsi {
        if rsi >= HIGH_RSI || rsi <= LOW_RSI {
            return true;
        }
    }
    velocity.abs() > HIGH_VELOCITY
}

impl Scheduler {
    pub fn new(
        store: Arc<MarketStateStore>,
        evaluator: Arc<Evaluator>,
        governor: Arc<DispatchGovernor>,
        persistence: Option<Arc<dyn SignalStore>>,
        min_score: f64,
    ) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            store,
            evaluator,
            governor,
            persistence,
            min_score,
            shutdown,
        }
    }

    /// Stop the sweep and the stream consumers; in-flight evaluations
    /// drain on their own.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Consume both transports: ingest into the store, then evaluate the
    /// touched symbol. Evaluations are spawned so slow sinks never back
    /// up the stream reader.
    pub fn spawn_stream_consumers(
        &self,
        mut funding_rx: mpsc::UnboundedReceiver<Funding>,
        mut ticker_rx: mpsc::UnboundedReceiver<PriceData>,
    ) {
        let scheduler = self.clone();
        let mut shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    update = funding_rx.recv() => {
                        let Some(update) = update else { break };
                        let symbol = update.symbol.clone();
                        scheduler.store.ingest_funding(update);
                        scheduler.spawn_process(symbol);
                    }
                }
            }
            debug!("funding consumer stopped");
        });

        let scheduler = self.clone();
        let mut shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    update = ticker_rx.recv() => {
                        let Some(update) = update else { break };
                        let symbol = update.symbol.clone();
                        scheduler.store.ingest_ticker(update);
                        scheduler.spawn_process(symbol);
                    }
                }
            }
            debug!("ticker consumer stopped");
        });
    }

    /// Periodic backup sweep over the whole universe
    pub fn spawn_sweep(&self) {
        let scheduler = self.clone();
        let mut shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(SWEEP_INTERVAL);
            timer.tick().await; // the stream covers the first cycle
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("sweep stopped");
                        break;
                    }
                    _ = timer.tick() => scheduler.sweep().await,
                }
            }
        });
    }

    async fn sweep(&self) {
        let (high, normal) = self.partition();
        info!(
            high = high.len(),
            normal = normal.len(),
            "sweep starting"
        );

        for batch in high.chunks(HIGH_PRIORITY_BATCH) {
            futures_util::future::join_all(batch.iter().map(|s| self.process_symbol(s))).await;
            tokio::time::sleep(BATCH_DELAY).await;
        }
        for batch in normal.chunks(NORMAL_PRIORITY_BATCH) {
            futures_util::future::join_all(batch.iter().map(|s| self.process_symbol(s))).await;
            tokio::time::sleep(BATCH_DELAY).await;
        }
    }

    /// Split the universe into priority buckets from current store state
    fn partition(&self) -> (Vec<String>, Vec<String>) {
        let mut high = Vec::new();
        let mut normal = Vec::new();

        for symbol in self.store.symbols() {
            let funding_pct = self
                .store
                .funding(&symbol)
                .map(|f| f.rate_pct)
                .unwrap_or(0.0);
            let rsi = indicators::rsi(&self.store.price_history(&symbol), RSI_PERIOD);
            let velocity = funding::velocity(&self.store.funding_history(&symbol));

            if is_high_priority(funding_pct, rsi, velocity) {
                high.push(symbol);
            } else {
                normal.push(symbol);
            }
        }

        (high, normal)
    }

    fn spawn_process(&self, symbol: String) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.process_symbol(&symbol).await;
        });
    }

    /// The per-symbol pipeline: cheap governor probes, context gate,
    /// rules, score, best-effort persistence, governed dispatch.
    pub async fn process_symbol(&self, symbol: &str) {
        if self.governor.cooldown_active(symbol).await {
            return;
        }
        if self.governor.rate_limited().await {
            return;
        }

        let Some(ctx) = self.evaluator.context_for(symbol) else {
            return;
        };
        let Some(mut signal) = Evaluator::evaluate(&ctx) else {
            return;
        };
        signal.score = scorer::score(&ctx).total;

        if !scorer::meets_threshold(signal.score, self.min_score) {
            debug!(
                symbol = %symbol,
                score = signal.score,
                "candidate below threshold"
            );
            return;
        }

        if let Some(store) = &self.persistence {
            let store = store.clone();
            let ctx = ctx.clone();
            let snapshot_signal = signal.clone();
            tokio::spawn(async move {
                if let Err(e) = store.record_funding_snapshot(&ctx).await {
                    warn!("snapshot persistence failed: {}", e);
                }
                if let Err(e) = store.record_signal(&snapshot_signal).await {
                    warn!("signal persistence failed: {}", e);
                }
            });
        }

        match self.governor.try_dispatch(&signal).await {
            Dispatch::Sent => {}
            Dispatch::Suppressed(reason) => {
                debug!(symbol = %symbol, ?reason, "dispatch suppressed");
            }
        }
    }
}
