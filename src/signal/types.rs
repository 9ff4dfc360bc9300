//! Signal domain types

use serde::Serialize;
use std::fmt;

/// Rule family that produced a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalType {
    Reversal,
    Trend,
    Divergence,
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalType::Reversal => write!(f, "REVERSAL"),
            SignalType::Trend => write!(f, "TREND"),
            SignalType::Divergence => write!(f, "DIVERGENCE"),
        }
    }
}

/// Direction of the trade idea
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Bias {
    Long,
    Short,
}

impl fmt::Display for Bias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bias::Long => write!(f, "LONG"),
            Bias::Short => write!(f, "SHORT"),
        }
    }
}

/// Qualitative momentum read: extreme RSI with a big move, or mid-range
/// RSI still expanding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MomentumLabel {
    Exhaustion,
    Expansion,
}

impl fmt::Display for MomentumLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MomentumLabel::Exhaustion => write!(f, "Exhaustion"),
            MomentumLabel::Expansion => write!(f, "Expansion"),
        }
    }
}

/// Which side is overcrowded, read off the sign of funding: positive
/// funding means longs pay (longs crowded), negative means shorts pay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FundingBias {
    LongOvercrowded,
    ShortOvercrowded,
}

impl FundingBias {
    pub fn from_funding(funding_rate_pct: f64) -> Self {
        if funding_rate_pct > 0.0 {
            FundingBias::LongOvercrowded
        } else {
            FundingBias::ShortOvercrowded
        }
    }
}

impl fmt::Display for FundingBias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FundingBias::LongOvercrowded => write!(f, "LONG Overcrowded"),
            FundingBias::ShortOvercrowded => write!(f, "SHORT Overcrowded"),
        }
    }
}

/// Display-only expected movement band derived from momentum
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Movement {
    pub up_pct: f64,
    pub down_pct: f64,
}

impl Movement {
    pub fn from_momentum(momentum: f64) -> Self {
        Self {
            up_pct: momentum.max(2.0),
            down_pct: (-momentum).max(2.0),
        }
    }
}

/// BTC market backdrop attached to evaluations
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BtcContext {
    pub price: f64,
    pub funding_rate_pct: f64,
}

/// Everything a single evaluation needs, assembled once and then read
/// by the rules and the scorer. Ephemeral.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalContext {
    pub symbol: String,
    /// Funding rate in percent
    pub funding_rate: f64,
    /// Funding delta in percent
    pub funding_delta: f64,
    pub rsi: Option<f64>,
    pub momentum: Option<f64>,
    pub price: f64,
    pub volume_24h: f64,
    pub btc: Option<BtcContext>,
}

/// A scored trade idea, ready for the dispatch governor
#[derive(Debug, Clone, Serialize)]
pub struct Signal {
    pub symbol: String,
    #[serde(rename = "type")]
    pub signal_type: SignalType,
    pub bias: Bias,
    pub funding_rate: f64,
    pub funding_delta: f64,
    pub rsi: Option<f64>,
    pub score: f64,
    pub price: f64,
    pub timeframe: &'static str,
    pub context: String,
    pub momentum_label: MomentumLabel,
    pub funding_bias: FundingBias,
    pub movement: Movement,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_funding_bias_from_sign() {
        assert_eq!(
            FundingBias::from_funding(0.015),
            FundingBias::LongOvercrowded
        );
        assert_eq!(
            FundingBias::from_funding(-0.05),
            FundingBias::ShortOvercrowded
        );
    }

    #[test]
    fn test_labels_render() {
        assert_eq!(SignalType::Reversal.to_string(), "REVERSAL");
        assert_eq!(Bias::Short.to_string(), "SHORT");
        assert_eq!(
            FundingBias::LongOvercrowded.to_string(),
            "LONG Overcrowded"
        );
        assert_eq!(MomentumLabel::Expansion.to_string(), "Expansion");
    }

    #[test]
    fn test_movement_floor() {
        let movement = Movement::from_momentum(1.2);
        assert_eq!(movement.up_pct, 2.0);
        assert_eq!(movement.down_pct, 2.0);

        let movement = Movement::from_momentum(4.5);
        assert_eq!(movement.up_pct, 4.5);
        assert_eq!(movement.down_pct, 2.0);

        let movement = Movement::from_momentum(-3.0);
        assert_eq!(movement.up_pct, 2.0);
        assert_eq!(movement.down_pct, 3.0);
    }
}
