//! Indicator math
//!
//! Pure, deterministic functions over a close-price series (oldest
//! first). No synchronization, no I/O.

/// Wilder RSI lookback
pub const RSI_PERIOD: usize = 14;
/// Momentum lookback
pub const MOMENTUM_PERIOD: usize = 10;

/// Round to two decimals
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Wilder-smoothed RSI. `None` until `period + 1` closes are available;
/// 100 when the average loss is zero.
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for window in closes[..=period].windows(2) {
        let change = window[1] - window[0];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss += -change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;

    for window in closes[period..].windows(2) {
        let change = window[1] - window[0];
        let (gain, loss) = if change > 0.0 {
            (change, 0.0)
        } else {
            (0.0, -change)
        };
        avg_gain = (avg_gain * (period - 1) as f64 + gain) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        return Some(100.0);
    }

    let rs = avg_gain / avg_loss;
    Some(round2(100.0 - 100.0 / (1.0 + rs)))
}

/// Percent price change over `period` closes
pub fn momentum(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }
    let last = *closes.last()?;
    let base = closes[closes.len() - 1 - period];
    if base == 0.0 {
        return None;
    }
    Some(round2((last - base) / base * 100.0))
}

/// Extreme RSI with a strong move behind it
pub fn is_exhaustion(rsi: f64, momentum: f64) -> bool {
    (rsi >= 70.0 || rsi <= 30.0) && momentum.abs() > 2.0
}

/// Mid-range RSI with room to run
pub fn is_expansion(rsi: f64, momentum: f64) -> bool {
    (40.0..=60.0).contains(&rsi) && momentum.abs() > 1.5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsi_needs_period_plus_one() {
        let closes: Vec<f64> = (0..RSI_PERIOD).map(|i| i as f64).collect();
        assert!(rsi(&closes, RSI_PERIOD).is_none());
        let closes: Vec<f64> = (0..=RSI_PERIOD).map(|i| i as f64).collect();
        assert!(rsi(&closes, RSI_PERIOD).is_some());
    }

    #[test]
    fn test_rsi_all_gains_is_100() {
        let closes: Vec<f64> = (1..=30).map(|i| i as f64).collect();
        assert_eq!(rsi(&closes, RSI_PERIOD), Some(100.0));
    }

    #[test]
    fn test_rsi_flat_series_is_100() {
        // No losses at all: average loss is zero
        let closes = vec![5.0; 20];
        assert_eq!(rsi(&closes, RSI_PERIOD), Some(100.0));
    }

    #[test]
    fn test_rsi_downtrend_is_low() {
        let closes: Vec<f64> = (1..=30).rev().map(|i| i as f64).collect();
        let value = rsi(&closes, RSI_PERIOD).unwrap();
        assert!(value < 10.0, "downtrend RSI was {}", value);
    }

    #[test]
    fn test_rsi_always_in_range() {
        // Deterministic zig-zag with drifting amplitude
        let closes: Vec<f64> = (0..200)
            .map(|i| 100.0 + ((i * 7) % 13) as f64 - ((i * 3) % 11) as f64)
            .collect();
        for len in (RSI_PERIOD + 1)..closes.len() {
            let value = rsi(&closes[..len], RSI_PERIOD).unwrap();
            assert!((0.0..=100.0).contains(&value), "RSI {} out of range", value);
        }
    }

    #[test]
    fn test_momentum_basic() {
        let mut closes = vec![100.0; 10];
        closes.push(105.0);
        assert_eq!(momentum(&closes, MOMENTUM_PERIOD), Some(5.0));
    }

    #[test]
    fn test_momentum_negative() {
        let mut closes = vec![200.0; 10];
        closes.push(190.0);
        assert_eq!(momentum(&closes, MOMENTUM_PERIOD), Some(-5.0));
    }

    #[test]
    fn test_momentum_insufficient_data() {
        assert!(momentum(&[1.0, 2.0, 3.0], MOMENTUM_PERIOD).is_none());
    }

    #[test]
    fn test_momentum_rounding() {
        let mut closes = vec![3.0; 10];
        closes.push(3.1);
        // (0.1 / 3.0) * 100 = 3.333...
        assert_eq!(momentum(&closes, MOMENTUM_PERIOD), Some(3.33));
    }

    #[test]
    fn test_exhaustion_classification() {
        assert!(is_exhaustion(75.0, 2.5));
        assert!(is_exhaustion(25.0, -3.0));
        assert!(!is_exhaustion(75.0, 1.0)); // move too small
        assert!(!is_exhaustion(50.0, 5.0)); // RSI not extreme
    }

    #[test]
    fn test_expansion_classification() {
        assert!(is_expansion(50.0, 2.0));
        assert!(is_expansion(40.0, -1.6));
        assert!(!is_expansion(65.0, 2.0)); // RSI out of band
        assert!(!is_expansion(50.0, 1.0)); // move too small
    }
}
