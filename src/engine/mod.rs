//! Core trading engine components.
//!
//! This module provides the fundamental types for paper trading:
//! - `Candle`: OHLCV data the engine is driven by.
//! - `Order`: Market and limit orders, filled by the ledger.
//! - `Position` and `Trade`: open exposure and completed round trips.
//! - `Ledger`: the paper broker, tracking balance, positions and fees.
//! - `Backtest`: the candle loop binding a strategy to the ledger.

mod account;
mod backtest;
mod candle;
mod ledger;
mod order;
mod position;
mod signal;

pub use account::*;
pub use backtest::*;
pub use candle::*;
pub use ledger::*;
pub use order::*;
pub use position::*;
pub use signal::*;
