//! Weighted signal scoring
//!
//! Five sub-scores on a 0–100 scale, blended by fixed weights. Pure.

use crate::indicators::round2;
use crate::signal::types::SignalContext;

const WEIGHT_FUNDING: f64 = 40.0;
const WEIGHT_DELTA: f64 = 20.0;
const WEIGHT_RSI_MOMENTUM: f64 = 20.0;
const WEIGHT_VOLUME: f64 = 10.0;
const WEIGHT_BTC: f64 = 10.0;

/// Sub-score used when an input is missing
const NEUTRAL: f64 = 50.0;

/// Per-factor breakdown alongside the blended total
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreBreakdown {
    pub funding: f64,
    pub delta: f64,
    pub rsi_momentum: f64,
    pub volume: f64,
    pub btc: f64,
    pub total: f64,
}

/// Blend the five factors into a 0–100 score
pub fn score(ctx: &SignalContext) -> ScoreBreakdown {
    let funding = funding_extremity(ctx.funding_rate);
    let delta = delta_score(ctx.funding_delta, ctx.funding_rate);
    let rsi_momentum = rsi_momentum_score(ctx.rsi, ctx.momentum);
    let volume = volume_score(ctx.volume_24h);
    let btc = btc_score(ctx.btc.map(|b| b.funding_rate_pct));

    let total = round2(
        (funding * WEIGHT_FUNDING
            + delta * WEIGHT_DELTA
            + rsi_momentum * WEIGHT_RSI_MOMENTUM
            + volume * WEIGHT_VOLUME
            + btc * WEIGHT_BTC)
            / 100.0,
    );

    ScoreBreakdown {
        funding,
        delta,
        rsi_momentum,
        volume,
        btc,
        total,
    }
}

pub fn meets_threshold(score: f64, threshold: f64) -> bool {
    score >= threshold
}

/// Step function of |funding|. Strict comparisons: a print sitting
/// exactly on a boundary takes the lower step.
fn funding_extremity(funding_rate: f64) -> f64 {
    let f = funding_rate.abs();
    if f > 0.04 {
        100.0
    } else if f > 0.03 {
        90.0
    } else if f > 0.02 {
        75.0
    } else if f > 0.015 {
        60.0
    } else if f > 0.01 {
        45.0
    } else if f > 0.005 {
        30.0
    } else if f > 0.002 {
        15.0
    } else {
        0.0
    }
}

fn delta_score(delta: f64, funding_rate: f64) -> f64 {
    if delta == 0.0 {
        return NEUTRAL;
    }
    let d = delta.abs();
    if d >= 0.01 {
        100.0
    } else if d >= 0.005 {
        85.0
    } else if d >= 0.002 {
        70.0
    } else if d >= 0.001 {
        55.0
    } else if delta.signum() == funding_rate.signum() {
        // Small but building in the same direction as the rate itself
        (60.0 + d * 10_000.0).min(100.0)
    } else {
        40.0
    }
}

fn rsi_momentum_score(rsi: Option<f64>, momentum: Option<f64>) -> f64 {
    let (Some(rsi), Some(m)) = (rsi, momentum) else {
        return NEUTRAL;
    };
    if (rsi >= 70.0 && m > 0.0) || (rsi <= 30.0 && m < 0.0) {
        100.0
    } else if m.abs() > 2.0 && (40.0..=60.0).contains(&rsi) {
        85.0
    } else if (rsi >= 60.0 && m > 1.0) || (rsi <= 40.0 && m < -1.0) {
        70.0
    } else if m.abs() > 0.5 {
        50.0
    } else {
        30.0
    }
}

// TODO: replace the placeholder with a real spike measure once rolling
// volume history is tracked per symbol.
fn volume_score(volume_24h: f64) -> f64 {
    if volume_24h > 0.0 {
        60.0
    } else {
        NEUTRAL
    }
}

fn btc_score(btc_funding_pct: Option<f64>) -> f64 {
    let Some(f) = btc_funding_pct.map(f64::abs) else {
        return NEUTRAL;
    };
    if f >= 0.02 {
        80.0
    } else if f >= 0.01 {
        65.0
    } else if f >= 0.005 {
        55.0
    } else {
        NEUTRAL
    }
}
