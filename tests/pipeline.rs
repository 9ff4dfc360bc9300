//! End-to-end pipeline scenarios: rules → score → governed dispatch,
//! with an in-process sink standing in for the webhook.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use dynasty_alerts::exchange::{Funding, Ticker};
use dynasty_alerts::governor::{Dispatch, DispatchGovernor, GovernorSettings, SuppressReason};
use dynasty_alerts::market::MarketStateStore;
use dynasty_alerts::notify::Sink;
use dynasty_alerts::scheduler::Scheduler;
use dynasty_alerts::signal::{
    scorer, Bias, Evaluator, FundingBias, MomentumLabel, Signal, SignalContext, SignalType,
};
use dynasty_alerts::Result;

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

fn ctx(symbol: &str, funding: f64, delta: f64, rsi: f64, momentum: f64) -> SignalContext {
    SignalContext {
        symbol: symbol.into(),
        funding_rate: funding,
        funding_delta: delta,
        rsi: Some(rsi),
        momentum: Some(momentum),
        price: 1.5,
        volume_24h: 5_000_000.0,
        btc: None,
    }
}

fn scored(ctx: &SignalContext) -> Signal {
    let mut signal = Evaluator::evaluate(ctx).expect("a rule should match");
    signal.score = scorer::score(ctx).total;
    signal
}

fn governor(sink: Arc<dyn Sink>, max_per_hour: u32) -> DispatchGovernor {
    DispatchGovernor::new(
        GovernorSettings {
            cooldown: Duration::from_secs(300),
            max_per_hour,
            min_score: 75.0,
        },
        sink,
    )
}

#[tokio::test]
async fn scenario_short_rsi_confluence_stays_below_threshold() {
    let context = ctx("FOOUSDT", 0.015, 0.001, 78.0, 1.2);
    let signal = scored(&context);

    assert_eq!(signal.signal_type, SignalType::Reversal);
    assert_eq!(signal.bias, Bias::Short);
    assert_eq!(signal.funding_bias, FundingBias::LongOvercrowded);
    assert_eq!(signal.momentum_label, MomentumLabel::Expansion);
    assert_eq!(signal.score, 60.0);

    let sink = CountingSink::new();
    let outcome = governor(sink.clone(), 20).try_dispatch(&signal).await;
    assert_eq!(
        outcome,
        Dispatch::Suppressed(SuppressReason::BelowThreshold)
    );
    assert_eq!(sink.count(), 0);
}

#[tokio::test]
async fn scenario_long_overextension_dispatches() {
    let context = ctx("FOOUSDT", -0.05, -0.002, 25.0, -1.5);
    let signal = scored(&context);

    assert_eq!(signal.signal_type, SignalType::Reversal);
    assert_eq!(signal.bias, Bias::Long);
    assert_eq!(signal.funding_bias, FundingBias::ShortOvercrowded);
    assert_eq!(signal.movement.up_pct, 2.0);
    assert_eq!(signal.movement.down_pct, 2.0);
    assert_eq!(signal.score, 85.0);

    let sink = CountingSink::new();
    let outcome = governor(sink.clone(), 20).try_dispatch(&signal).await;
    assert_eq!(outcome, Dispatch::Sent);
    assert_eq!(sink.count(), 1);
}

#[tokio::test]
async fn scenario_mild_trend_long_stays_below_threshold() {
    let context = ctx("FOOUSDT", 0.012, 0.001, 55.0, 0.4);
    let signal = scored(&context);

    assert_eq!(signal.signal_type, SignalType::Trend);
    assert_eq!(signal.bias, Bias::Long);
    assert_eq!(signal.score, 46.0);

    let sink = CountingSink::new();
    let outcome = governor(sink.clone(), 20).try_dispatch(&signal).await;
    assert_eq!(
        outcome,
        Dispatch::Suppressed(SuppressReason::BelowThreshold)
    );
}

#[tokio::test]
async fn scenario_divergence_short() {
    let context = ctx("FOOUSDT", -0.008, 0.0, 62.0, 1.5);
    let signal = scored(&context);
    assert_eq!(signal.signal_type, SignalType::Divergence);
    assert_eq!(signal.bias, Bias::Short);
}

#[tokio::test]
async fn scenario_cooldown_holds_on_repeat() {
    let context = ctx("FOOUSDT", -0.05, -0.002, 25.0, -1.5);
    let signal = scored(&context);

    let sink = CountingSink::new();
    let governor = governor(sink.clone(), 20);
    assert_eq!(governor.try_dispatch(&signal).await, Dispatch::Sent);
    // Same setup again well inside the 300 s window
    assert_eq!(
        governor.try_dispatch(&signal).await,
        Dispatch::Suppressed(SuppressReason::Cooldown)
    );
    assert_eq!(sink.count(), 1);
}

#[tokio::test]
async fn scenario_hourly_budget_caps_distinct_symbols() {
    let sink = CountingSink::new();
    let governor = governor(sink.clone(), 2);

    let mut outcomes = Vec::new();
    for symbol in ["AAAUSDT", "BBBUSDT", "CCCUSDT"] {
        let signal = scored(&ctx(symbol, -0.05, -0.002, 25.0, -1.5));
        outcomes.push(governor.try_dispatch(&signal).await);
    }

    assert_eq!(outcomes[0], Dispatch::Sent);
    assert_eq!(outcomes[1], Dispatch::Sent);
    assert_eq!(
        outcomes[2],
        Dispatch::Suppressed(SuppressReason::RateLimited)
    );
    assert_eq!(sink.count(), 2);
}

// Full store-backed path: seeded market state through the scheduler.

fn seeded_store() -> Arc<MarketStateStore> {
    let store = Arc::new(MarketStateStore::new());
    let now = Utc::now();

    // 40 falling closes: RSI pinned low, momentum well negative
    let closes: Vec<f64> = (0..40).map(|i| 100.0 - i as f64).collect();
    store.seed_symbol(
        "DOOMUSDT",
        closes,
        Some(Ticker {
            symbol: "DOOMUSDT".into(),
            last_price: 61.0,
            turnover_24h: 8_000_000.0,
            open_interest_value: 2_000_000.0,
            timestamp: now,
        }),
        Some(Funding {
            symbol: "DOOMUSDT".into(),
            rate_pct: -0.048,
            next_funding_time: 0,
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }),
    );
    // A second, more negative print gives delta < 0
    store.ingest_funding(Funding {
        symbol: "DOOMUSDT".into(),
        rate_pct: -0.05,
        next_funding_time: 0,
        timestamp: Utc.timestamp_opt(1_700_000_060, 0).unwrap(),
    });
    store
}

#[tokio::test]
async fn store_backed_pipeline_dispatches_once() {
    let store = seeded_store();
    let evaluator = Arc::new(Evaluator::new(store.clone(), false));
    let sink = CountingSink::new();
    let governor = Arc::new(DispatchGovernor::new(
        GovernorSettings {
            cooldown: Duration::from_secs(300),
            max_per_hour: 20,
            min_score: 75.0,
        },
        sink.clone(),
    ));
    let scheduler = Scheduler::new(store, evaluator, governor, None, 75.0);

    scheduler.process_symbol("DOOMUSDT").await;
    assert_eq!(sink.count(), 1);

    // The sweep path touching the same symbol is a no-op inside the
    // cooldown window
    scheduler.process_symbol("DOOMUSDT").await;
    assert_eq!(sink.count(), 1);
}

#[tokio::test]
async fn store_backed_context_matches_pure_evaluation() {
    let store = seeded_store();
    let evaluator = Evaluator::new(store, false);
    let context = evaluator.context_for("DOOMUSDT").expect("context");

    assert_eq!(context.funding_rate, -0.05);
    assert!((context.funding_delta - -0.002).abs() < 1e-12);
    let rsi = context.rsi.expect("rsi");
    assert!(rsi <= 30.0, "falling tape should pin RSI low, got {}", rsi);
    assert!(context.momentum.expect("momentum") < -1.0);

    // Same context, same signal, every time
    let a = Evaluator::evaluate(&context);
    let b = Evaluator::evaluate(&context);
    assert_eq!(format!("{:?}", a), format!("{:?}", b));
}
