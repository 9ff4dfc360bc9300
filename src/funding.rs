//! Funding-rate derivatives
//!
//! Delta and velocity over the short funding history the market store
//! maintains. Pure views; the store owns the data.

use crate::exchange::Funding;

/// Change between the two most recent observations, in percent.
/// Zero until two observations exist.
pub fn delta(history: &[Funding]) -> f64 {
    match history {
        [.., previous, latest] => latest.rate_pct - previous.rate_pct,
        _ => 0.0,
    }
}

/// Rate of change per second between the two most recent observations.
/// Zero when the time delta is non-positive.
pub fn velocity(history: &[Funding]) -> f64 {
    let [.., previous, latest] = history else {
        return 0.0;
    };
    let elapsed = (latest.timestamp - previous.timestamp).num_milliseconds() as f64 / 1000.0;
    if elapsed <= 0.0 {
        return 0.0;
    }
    (latest.rate_pct - previous.rate_pct) / elapsed
}
