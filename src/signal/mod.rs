//! Signal evaluation: context gating, rule set and scoring.

pub mod evaluator;
pub mod scorer;
pub mod types;

pub use evaluator::Evaluator;
pub use types::{Bias, BtcContext, FundingBias, MomentumLabel, Movement, Signal, SignalContext, SignalType};
