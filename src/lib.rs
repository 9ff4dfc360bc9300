//! Dynasty Alerts Library
//!
//! Real-time funding-rate signal scanner for Bybit USDT linear perpetuals.

pub mod cli;
pub mod config;
pub mod error;
pub mod exchange;
pub mod funding;
pub mod governor;
pub mod indicators;
pub mod market;
pub mod notify;
pub mod persistence;
pub mod scheduler;
pub mod signal;
pub mod universe;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
