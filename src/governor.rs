//! Dispatch governor
//!
//! Owns every throttle between a scored signal and the sink: the score
//! threshold, the per-symbol cooldown and the global hourly budget. The
//! whole check → deliver → record sequence runs inside one critical
//! section, so concurrent triggers for the same signal cannot defeat
//! the caps. Cooldown and counter are only recorded after the sink
//! accepts.
//!
//! An optional Redis store backs both throttles; the first store error
//! permanently fails the governor over to its in-process state, which
//! is maintained as a mirror the whole time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::GovernorConfig;
use crate::notify::Sink;
use crate::signal::Signal;

const HOUR_MS: i64 = 3_600_000;

/// Why a signal did not go out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    Cooldown,
    RateLimited,
    BelowThreshold,
    SinkFailure,
}

/// Outcome of a dispatch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Sent,
    Suppressed(SuppressReason),
}

#[derive(Debug, Clone)]
pub struct GovernorSettings {
    pub cooldown: Duration,
    pub max_per_hour: u32,
    pub min_score: f64,
}

impl GovernorSettings {
    pub fn from_config(cfg: &GovernorConfig, min_score: f64) -> Self {
        Self {
            cooldown: Duration::from_secs(cfg.cooldown_seconds),
            max_per_hour: cfg.max_alerts_per_hour,
            min_score,
        }
    }
}

#[derive(Debug)]
struct RateWindow {
    count: u32,
    reset_at_ms: i64,
}

impl RateWindow {
    fn roll_if_due(&mut self, now_ms: i64) {
        if now_ms >= self.reset_at_ms {
            self.count = 0;
            self.reset_at_ms = now_ms + HOUR_MS;
        }
    }
}

#[derive(Debug)]
struct GovernorState {
    /// symbol → cooldown expiry, epoch milliseconds
    cooldowns: HashMap<String, i64>,
    window: RateWindow,
}

pub struct DispatchGovernor {
    settings: GovernorSettings,
    state: Mutex<GovernorState>,
    sink: Arc<dyn Sink>,
    redis: Option<redis::aio::MultiplexedConnection>,
    store_degraded: AtomicBool,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl DispatchGovernor {
    pub fn new(settings: GovernorSettings, sink: Arc<dyn Sink>) -> Self {
        Self {
            settings,
            state: Mutex::new(GovernorState {
                cooldowns: HashMap::new(),
                window: RateWindow {
                    count: 0,
                    reset_at_ms: now_ms() + HOUR_MS,
                },
            }),
            sink,
            redis: None,
            store_degraded: AtomicBool::new(false),
        }
    }

    /// Attach the optional Redis store. A connection failure here leaves
    /// the governor on its in-process state.
    pub async fn attach_store(&mut self, url: &str) {
        match redis::Client::open(url) {
            Ok(client) => match client.get_multiplexed_async_connection().await {
                Ok(conn) => {
                    info!("governor store connected");
                    self.redis = Some(conn);
                }
                Err(e) => warn!("governor store unavailable ({}); using in-process state", e),
            },
            Err(e) => warn!("invalid redis url ({}); using in-process state", e),
        }
    }

    /// Read-only probe for the scheduler's cheap early exit
    pub async fn cooldown_active(&self, symbol: &str) -> bool {
        let state = self.state.lock().await;
        state
            .cooldowns
            .get(symbol)
            .is_some_and(|expiry| *expiry > now_ms())
    }

    /// Read-only probe for the scheduler's cheap early exit
    pub async fn rate_limited(&self) -> bool {
        let mut state = self.state.lock().await;
        let now = now_ms();
        state.window.roll_if_due(now);
        state.window.count >= self.settings.max_per_hour
    }

    /// Gate and deliver one signal. Never returns an error: every
    /// failure mode maps to a suppression reason.
    pub async fn try_dispatch(&self, signal: &Signal) -> Dispatch {
        let mut state = self.state.lock().await;
        let now = now_ms();

        if signal.score < self.settings.min_score {
            debug!(
                symbol = %signal.symbol,
                score = signal.score,
                "suppressed below threshold"
            );
            return Dispatch::Suppressed(SuppressReason::BelowThreshold);
        }

        if self.is_cooling(&state, &signal.symbol, now).await {
            debug!(symbol = %signal.symbol, "suppressed by cooldown");
            return Dispatch::Suppressed(SuppressReason::Cooldown);
        }

        state.window.roll_if_due(now);
        if self.is_rate_limited(&state, now).await {
            debug!(symbol = %signal.symbol, "suppressed by hourly budget");
            return Dispatch::Suppressed(SuppressReason::RateLimited);
        }

        // Deliver inside the critical section; the throttles must not be
        // re-checkable until this attempt records or fails.
        if let Err(e) = self.sink.deliver(signal).await {
            warn!(symbol = %signal.symbol, "sink delivery failed: {}", e);
            return Dispatch::Suppressed(SuppressReason::SinkFailure);
        }

        self.record(&mut state, &signal.symbol, now).await;
        info!(
            symbol = %signal.symbol,
            score = signal.score,
            sent = state.window.count,
            "alert dispatched"
        );
        Dispatch::Sent
    }

    fn store_active(&self) -> bool {
        self.redis.is_some() && !self.store_degraded.load(Ordering::Relaxed)
    }

    fn degrade_store(&self, err: redis::RedisError) {
        if !self.store_degraded.swap(true, Ordering::Relaxed) {
            warn!("governor store error ({}); failing over to in-process state", err);
        }
    }

    async fn is_cooling(&self, state: &GovernorState, symbol: &str, now: i64) -> bool {
        if self.store_active() {
            let mut conn = self.redis.clone().unwrap();
            match conn.exists::<_, bool>(cooldown_key(symbol)).await {
                Ok(exists) => return exists,
                Err(e) => self.degrade_store(e),
            }
        }
        state
            .cooldowns
            .get(symbol)
            .is_some_and(|expiry| *expiry > now)
    }

    async fn is_rate_limited(&self, state: &GovernorState, now: i64) -> bool {
        if self.store_active() {
            let mut conn = self.redis.clone().unwrap();
            match conn.get::<_, Option<u32>>(rate_key(now)).await {
                Ok(count) => return count.unwrap_or(0) >= self.settings.max_per_hour,
                Err(e) => self.degrade_store(e),
            }
        }
        state.window.count >= self.settings.max_per_hour
    }

    async fn record(&self, state: &mut GovernorState, symbol: &str, now: i64) {
        // In-process state is always maintained so a store failover
        // keeps the throttles intact.
        state
            .cooldowns
            .insert(symbol.to_string(), now + self.settings.cooldown.as_millis() as i64);
        state.window.count += 1;

        if self.store_active() {
            let mut conn = self.redis.clone().unwrap();
            let result: redis::RedisResult<()> = async {
                conn.set_ex::<_, _, ()>(
                    cooldown_key(symbol),
                    1u8,
                    self.settings.cooldown.as_secs(),
                )
                .await?;
                conn.incr::<_, _, i64>(rate_key(now), 1).await?;
                conn.expire::<_, i64>(rate_key(now), HOUR_MS / 1000).await?;
                Ok(())
            }
            .await;
            if let Err(e) = result {
                self.degrade_store(e);
            }
        }
    }
}

fn cooldown_key(symbol: &str) -> String {
    format!("dynasty:cooldown:{}", symbol)
}

fn rate_key(now_ms: i64) -> String {
    format!("dynasty:alerts:{}", now_ms / HOUR_MS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    use crate::error::{Error, Result};
    use crate::signal::{Bias, FundingBias, MomentumLabel, Movement, SignalType};

    struct CountingSink {
        delivered: AtomicUsize,
    }

    impl CountingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                delivered: AtomicUsize::new(0),
            })
        }

        fn count(&self) -> usize {
            self.delivered.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Sink for CountingSink {
        async fn deliver(&self, _signal: &Signal) -> Result<()> {
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl Sink for FailingSink {
        async fn deliver(&self, _signal: &Signal) -> Result<()> {
            Err(Error::Sink("503".into()))
        }
    }

    fn signal(symbol: &str, score: f64) -> Signal {
        Signal {
            symbol: symbol.into(),
            signal_type: SignalType::Reversal,
            bias: Bias::Long,
            funding_rate: -0.05,
            funding_delta: -0.002,
            rsi: Some(25.0),
            score,
            price: 1.5,
            timeframe: "1m",
            context: "test".into(),
            momentum_label: MomentumLabel::Expansion,
            funding_bias: FundingBias::ShortOvercrowded,
            movement: Movement {
                up_pct: 2.0,
                down_pct: 2.0,
            },
        }
    }

    fn settings(max_per_hour: u32) -> GovernorSettings {
        GovernorSettings {
            cooldown: Duration::from_secs(300),
            max_per_hour,
            min_score: 75.0,
        }
    }

    #[tokio::test]
    async fn test_below_threshold_never_reaches_sink() {
        let sink = CountingSink::new();
        let governor = DispatchGovernor::new(settings(20), sink.clone());
        let outcome = governor.try_dispatch(&signal("FOOUSDT", 60.0)).await;
        assert_eq!(
            outcome,
            Dispatch::Suppressed(SuppressReason::BelowThreshold)
        );
        assert_eq!(sink.count(), 0);
    }

    #[tokio::test]
    async fn test_cooldown_dispatches_exactly_once() {
        let sink = CountingSink::new();
        let governor = DispatchGovernor::new(settings(20), sink.clone());
        assert_eq!(
            governor.try_dispatch(&signal("FOOUSDT", 85.0)).await,
            Dispatch::Sent
        );
        assert_eq!(
            governor.try_dispatch(&signal("FOOUSDT", 85.0)).await,
            Dispatch::Suppressed(SuppressReason::Cooldown)
        );
        assert_eq!(sink.count(), 1);
        assert!(governor.cooldown_active("FOOUSDT").await);
        assert!(!governor.cooldown_active("BARUSDT").await);
    }

    #[tokio::test]
    async fn test_expired_cooldown_allows_redispatch() {
        let sink = CountingSink::new();
        let governor = DispatchGovernor::new(settings(20), sink.clone());
        governor
            .state
            .lock()
            .await
            .cooldowns
            .insert("FOOUSDT".into(), now_ms() - 1);
        assert!(!governor.cooldown_active("FOOUSDT").await);
        assert_eq!(
            governor.try_dispatch(&signal("FOOUSDT", 85.0)).await,
            Dispatch::Sent
        );
    }

    #[tokio::test]
    async fn test_hourly_budget_caps_across_symbols() {
        let sink = CountingSink::new();
        let governor = DispatchGovernor::new(settings(2), sink.clone());
        assert_eq!(
            governor.try_dispatch(&signal("AUSDT", 85.0)).await,
            Dispatch::Sent
        );
        assert_eq!(
            governor.try_dispatch(&signal("BUSDT", 85.0)).await,
            Dispatch::Sent
        );
        assert_eq!(
            governor.try_dispatch(&signal("CUSDT", 85.0)).await,
            Dispatch::Suppressed(SuppressReason::RateLimited)
        );
        assert_eq!(sink.count(), 2);
        assert!(governor.rate_limited().await);
    }

    #[tokio::test]
    async fn test_window_rollover_resets_budget() {
        let sink = CountingSink::new();
        let governor = DispatchGovernor::new(settings(1), sink.clone());
        assert_eq!(
            governor.try_dispatch(&signal("AUSDT", 85.0)).await,
            Dispatch::Sent
        );
        // Force the window into the past
        governor.state.lock().await.window.reset_at_ms = now_ms() - 1;
        assert!(!governor.rate_limited().await);
        assert_eq!(
            governor.try_dispatch(&signal("BUSDT", 85.0)).await,
            Dispatch::Sent
        );
    }

    #[tokio::test]
    async fn test_sink_failure_consumes_nothing() {
        let governor = DispatchGovernor::new(settings(20), Arc::new(FailingSink));
        assert_eq!(
            governor.try_dispatch(&signal("FOOUSDT", 85.0)).await,
            Dispatch::Suppressed(SuppressReason::SinkFailure)
        );
        // Neither the cooldown nor the budget was touched
        assert!(!governor.cooldown_active("FOOUSDT").await);
        assert_eq!(governor.state.lock().await.window.count, 0);

        // A later attempt with a healthy sink goes straight through
        let sink = CountingSink::new();
        let governor = DispatchGovernor::new(settings(20), sink.clone());
        assert_eq!(
            governor.try_dispatch(&signal("FOOUSDT", 85.0)).await,
            Dispatch::Sent
        );
        assert_eq!(sink.count(), 1);
    }
}
