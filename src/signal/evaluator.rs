//! Rule evaluator
//!
//! Builds a per-symbol evaluation context behind a cheap early-exit
//! gate, then applies the ordered rule set. At most one candidate per
//! evaluation; cooldown and rate limits are not this module's concern.

use std::sync::Arc;

use crate::funding;
use crate::indicators::{self, MOMENTUM_PERIOD, RSI_PERIOD};
use crate::market::MarketStateStore;
use crate::signal::types::{
    Bias, BtcContext, FundingBias, MomentumLabel, Movement, Signal, SignalContext, SignalType,
};

/// Closes required before a symbol is evaluated at all
const MIN_SERIES_LEN: usize = 20;
/// Below this |funding| the symbol is only interesting on an RSI extreme
const FUNDING_FLOOR_PCT: f64 = 0.01;
const RSI_GATE_HIGH: f64 = 75.0;
const RSI_GATE_LOW: f64 = 25.0;

pub struct Evaluator {
    store: Arc<MarketStateStore>,
    enable_btc_context: bool,
}

impl Evaluator {
    pub fn new(store: Arc<MarketStateStore>, enable_btc_context: bool) -> Self {
        Self {
            store,
            enable_btc_context,
        }
    }

    /// Early-exit gate: assemble the full context only for symbols worth
    /// the indicator math.
    pub fn context_for(&self, symbol: &str) -> Option<SignalContext> {
        let market = self.store.market(symbol)?;
        let funding = self.store.funding(symbol)?;
        let closes = self.store.price_history(symbol);
        if closes.len() < MIN_SERIES_LEN {
            return None;
        }

        let rsi = indicators::rsi(&closes, RSI_PERIOD);
        if funding.rate_pct.abs() < FUNDING_FLOOR_PCT {
            let rsi = rsi?;
            if rsi <= RSI_GATE_HIGH && rsi >= RSI_GATE_LOW {
                return None;
            }
        }

        let history = self.store.funding_history(symbol);
        let btc = if self.enable_btc_context {
            self.btc_context()
        } else {
            None
        };

        Some(SignalContext {
            symbol: symbol.to_string(),
            funding_rate: funding.rate_pct,
            funding_delta: funding::delta(&history),
            rsi,
            momentum: indicators::momentum(&closes, MOMENTUM_PERIOD),
            price: market.last_price,
            volume_24h: market.turnover_24h,
            btc,
        })
    }

    fn btc_context(&self) -> Option<BtcContext> {
        let market = self.store.market("BTCUSDT")?;
        let funding = self.store.funding("BTCUSDT")?;
        Some(BtcContext {
            price: market.last_price,
            funding_rate_pct: funding.rate_pct,
        })
    }

    /// Apply the ordered rule set to a context. Pure and deterministic;
    /// the first matching rule wins.
    pub fn evaluate(ctx: &SignalContext) -> Option<Signal> {
        let (signal_type, bias, context) = rsi_confluence(ctx)
            .or_else(|| overextension_reversal(ctx))
            .or_else(|| trend_confirmation(ctx))
            .or_else(|| divergence(ctx))?;

        let momentum = ctx.momentum.unwrap_or(0.0);
        let momentum_label = match ctx.rsi {
            Some(rsi) if indicators::is_exhaustion(rsi, momentum) => MomentumLabel::Exhaustion,
            _ => MomentumLabel::Expansion,
        };

        Some(Signal {
            symbol: ctx.symbol.clone(),
            signal_type,
            bias,
            funding_rate: ctx.funding_rate,
            funding_delta: ctx.funding_delta,
            rsi: ctx.rsi,
            score: 0.0,
            price: ctx.price,
            timeframe: "1m",
            context,
            momentum_label,
            funding_bias: FundingBias::from_funding(ctx.funding_rate),
            movement: Movement::from_momentum(momentum),
        })
    }
}

/// RSI extreme against same-signed funding: late crowd at the turn
fn rsi_confluence(ctx: &SignalContext) -> Option<(SignalType, Bias, String)> {
    let rsi = ctx.rsi?;
    if rsi < 30.0 && ctx.funding_rate < -0.01 {
        return Some((
            SignalType::Reversal,
            Bias::Long,
            format!("RSI {:.1} oversold while shorts keep paying to stay in", rsi),
        ));
    }
    if rsi > 75.0 && ctx.funding_rate > 0.01 {
        return Some((
            SignalType::Reversal,
            Bias::Short,
            format!("RSI {:.1} overbought while longs keep paying to stay in", rsi),
        ));
    }
    None
}

/// Heavy funding, stretched RSI, and the move still accelerating
fn overextension_reversal(ctx: &SignalContext) -> Option<(SignalType, Bias, String)> {
    let rsi = ctx.rsi?;
    let momentum = ctx.momentum?;
    if ctx.funding_rate <= -0.04
        && rsi <= 30.0
        && momentum < -1.0
        && ctx.funding_delta < 0.0
    {
        return Some((
            SignalType::Reversal,
            Bias::Long,
            format!(
                "Shorts paying {:.4}% into a stretched {:.1}% drop",
                ctx.funding_rate, momentum
            ),
        ));
    }
    if ctx.funding_rate >= 0.04 && rsi >= 70.0 && momentum > 1.0 && ctx.funding_delta > 0.0 {
        return Some((
            SignalType::Reversal,
            Bias::Short,
            format!(
                "Longs paying {:.4}% into a stretched {:.1}% rally",
                ctx.funding_rate, momentum
            ),
        ));
    }
    None
}

/// Moderate funding building in the direction of the move
fn trend_confirmation(ctx: &SignalContext) -> Option<(SignalType, Bias, String)> {
    let momentum = ctx.momentum?;
    if (0.005..=0.02).contains(&ctx.funding_rate) && ctx.funding_delta > 0.0 && momentum > 0.0 {
        return Some((
            SignalType::Trend,
            Bias::Long,
            "Funding building alongside upward momentum".to_string(),
        ));
    }
    if (-0.02..=-0.005).contains(&ctx.funding_rate) && ctx.funding_delta < 0.0 && momentum < 0.0 {
        return Some((
            SignalType::Trend,
            Bias::Short,
            "Funding sinking alongside downward momentum".to_string(),
        ));
    }
    None
}

/// Price and funding pulling opposite ways
fn divergence(ctx: &SignalContext) -> Option<(SignalType, Bias, String)> {
    let momentum = ctx.momentum?;
    if momentum < -1.0 && ctx.funding_rate > 0.005 {
        return Some((
            SignalType::Divergence,
            Bias::Long,
            format!(
                "Price down {:.1}% but longs still paying {:.4}%",
                -momentum, ctx.funding_rate
            ),
        ));
    }
    if momentum > 1.0 && ctx.funding_rate < -0.005 {
        return Some((
            SignalType::Divergence,
            Bias::Short,
            format!(
                "Price up {:.1}% but shorts still paying {:.4}%",
                momentum, -ctx.funding_rate
            ),
        ));
    }
    None
}
