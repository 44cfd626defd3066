//! # candlecore: paper-trading ledger and backtest engine
//!
//! **candlecore** simulates order execution and tracks portfolio state for a
//! candle-driven trading strategy, without touching real markets.
//!
//! ## Core Components
//! | Component   | Description                                                                                     |
//! |-------------|-------------------------------------------------------------------------------------------------|
//! | **`Candle`** | Immutable OHLCV sample, validated by `CandleBuilder`.                                         |
//! | **`Order`**  | Market or limit order; filled, rejected or cancelled by the ledger.                           |
//! | **`Position`** | Open exposure per symbol with a volume-weighted entry price.                                |
//! | **`Trade`** | Immutable record of a closed (or partially closed) position.                                   |
//! | **`Ledger`** | The paper broker: balance, positions, fees and trade history behind one lock.                 |
//! | **`Backtest`** | The engine feeding candles to a `Strategy` and its signals to the ledger.                   |
//! | **`StateStore`** | Checkpoints of the ledger (`FileStore`, `MemoryStore`).                                   |
//! | **`Metrics`** | P&L, drawdown, Sharpe ratio, win rate and more.                                              |
//!
//! ## Execution model
//! - Market orders fill immediately at the mark price moved against the order
//!   by `slippage_bps`; the fee is `price × quantity × taker_fee`.
//! - Buys debit `value + fee` and open or average a long position.
//! - Sells close or reduce the position, credit `value − fee` and append a `Trade`.
//! - Limit orders are queued as pending until cancelled.
//! - A rejected order never mutates the ledger.
//!
//! ## Getting Started
//! ```rust
//! use std::sync::Arc;
//!
//! use candlecore::prelude::*;
//!
//! let candles: Vec<Candle> = [100.0, 110.0]
//!     .iter()
//!     .map(|c| CandleBuilder::builder().open(*c).high(*c).low(*c).close(*c).build().unwrap())
//!     .collect();
//!
//! let ledger = Arc::new(Ledger::new(LedgerConfig::default()).unwrap());
//! let strategy = |candle: &Candle, account: &Account| -> Result<Signal> {
//!     Ok(match account.position("BTC/USD") {
//!         None => Signal::buy("BTC/USD", 1.0, "enter"),
//!         Some(p) => Signal::sell("BTC/USD", p.quantity(), format!("exit at {}", candle.close())),
//!     })
//! };
//!
//! let mut backtest = Backtest::new(ledger, strategy, Arc::new(MemoryStore::new()), RunOptions::default()).unwrap();
//! let report = backtest.run(&candles).unwrap();
//! assert_eq!(report.orders_filled, 2);
//! assert!((backtest.balance() - 10009.685005).abs() < 1e-9);
//!
//! #[cfg(feature = "metrics")]
//! println!("{}", Metrics::from(&backtest));
//! ```
//!
//! ## Error Handling
//! Order rejections (`InvalidOrder`, `InsufficientBalance`) and checkpoint
//! failures are logged and the run goes on. A strategy error ends the run with
//! `RunOutcome::Failed`; state applied before it is kept.
#![warn(missing_docs)]

/// Core trading engine components: candles, orders, positions, ledger and backtest logic.
pub mod engine;

/// Error types for the library.
pub mod errors;

/// Configuration file and environment overrides.
pub mod config;

/// Ledger checkpoints.
pub mod store;

/// Strategy trait and the moving-average crossover.
pub mod strategy;

/// Utility functions and helpers.
mod utils;

pub use utils::load_candles;

/// Performance metrics: drawdown, Sharpe ratio, win rate, etc.
#[cfg(feature = "metrics")]
pub mod metrics;

/// Re-exports of commonly used types and traits for convenience.
pub mod prelude {
    pub use super::*;
    pub use crate::config::*;
    pub use crate::engine::*;
    pub use crate::errors::*;
    pub use crate::store::*;
    pub use crate::strategy::*;

    #[cfg(feature = "metrics")]
    pub use crate::metrics::*;
}

use std::ops::{Div, Mul, Sub};

/// Trait for performing percentage-based calculations.
///
/// Used for slippage (a fraction of the mark price) and returns.
pub trait PercentCalculus<Rhs = Self> {
    /// Calculates the absolute value of a percentage.
    ///
    /// ### Arguments
    /// * `percent` - The percentage to calculate (e.g., 10.0 for 10%).
    ///
    /// ### Returns
    /// The absolute value of the given percentage.
    fn how_many(self, percent: Rhs) -> Self;

    /// Calculates the percentage change between two values.
    ///
    /// ### Arguments
    /// * `new` - The new value to compare with.
    ///
    /// ### Returns
    /// The percentage change from the original value to the new value.
    fn change(self, new: Rhs) -> Self;
}

impl PercentCalculus for f64 {
    fn how_many(self, percent: Self) -> Self {
        percent.mul(self.div(100.0))
    }

    fn change(self, new: Self) -> Self {
        new.sub(self).div(self).mul(100.0)
    }
}

#[cfg(test)]
mod percent {
    use super::*;

    #[test]
    fn how_many() {
        assert_eq!(10.0, 100.0.how_many(10.0));
        // 5 bps of 110
        assert!((110.0.how_many(0.05) - 0.055).abs() < 1e-12);
    }

    #[test]
    fn change() {
        assert_eq!(10.0, 100.0.change(110.0));
        assert_eq!(-25.0, 100.0.change(75.0));
    }
}
