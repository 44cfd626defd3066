//! Performance metrics for backtesting.
//!
//! This module provides tools to calculate:
//! - Max drawdown
//! - Profit factor
//! - Sharpe ratio
//! - Win rate, average and extreme wins and losses
//!
//! Trade statistics come from the ledger's trade history (net P&L); drawdown
//! and Sharpe ratio from the equity curve the engine records per candle.
//!
//! It needs to enable `metrics` feature to use it.

use std::{fmt, sync::Arc};

use crate::{PercentCalculus, engine::*, strategy::Strategy};

/// A collection of trading metrics calculated from a finished backtest.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Metrics {
    initial_balance: f64,
    balance: f64,
    equity: f64,
    fees: f64,
    trades: Arc<Vec<Trade>>,
    equity_curve: Vec<EquityPoint>,
}

impl<S: Strategy> From<&Backtest<S>> for Metrics {
    fn from(value: &Backtest<S>) -> Self {
        let account = value.account();
        Self {
            initial_balance: value.initial_balance(),
            balance: account.balance,
            equity: account.equity,
            fees: value.fees_paid(),
            trades: account.trade_history,
            equity_curve: value.equity_curve().to_vec(),
        }
    }
}

impl Metrics {
    /// Creates a new `Metrics` instance from raw figures.
    pub fn new(
        initial_balance: f64,
        balance: f64,
        equity: f64,
        fees: f64,
        trades: Vec<Trade>,
        equity_curve: Vec<EquityPoint>,
    ) -> Self {
        Self {
            initial_balance,
            balance,
            equity,
            fees,
            trades: Arc::new(trades),
            equity_curve,
        }
    }

    /// Returns the initial balance.
    pub fn initial_balance(&self) -> f64 {
        self.initial_balance
    }

    /// Returns the final cash balance.
    pub fn balance(&self) -> f64 {
        self.balance
    }

    /// Returns the final equity.
    pub fn equity(&self) -> f64 {
        self.equity
    }

    /// Returns the cumulative fees paid.
    pub fn fees(&self) -> f64 {
        self.fees
    }

    /// Returns the closed trades.
    pub fn trades(&self) -> std::slice::Iter<'_, Trade> {
        self.trades.iter()
    }

    /// Final equity minus the initial balance.
    pub fn total_pnl(&self) -> f64 {
        self.equity - self.initial_balance
    }

    /// Total return as a percentage of the initial balance.
    pub fn return_pct(&self) -> f64 {
        self.initial_balance.change(self.equity)
    }

    /// Trades with a positive net P&L.
    pub fn winning_trades(&self) -> usize {
        self.trades.iter().filter(|t| t.net_pnl > 0.0).count()
    }

    /// Trades with a zero or negative net P&L.
    pub fn losing_trades(&self) -> usize {
        self.trades.len() - self.winning_trades()
    }

    /// Computes the win rate as a percentage of winning trades.
    pub fn win_rate(&self) -> f64 {
        if self.trades.is_empty() {
            return 0.0;
        }
        (self.winning_trades() as f64 / self.trades.len() as f64) * 100.0
    }

    fn gross(&self) -> (f64, f64) {
        self.trades.iter().fold((0.0, 0.0), |(gains, losses), t| {
            if t.net_pnl > 0.0 {
                (gains + t.net_pnl, losses)
            } else {
                (gains, losses + t.net_pnl.abs())
            }
        })
    }

    /// Mean net P&L of winning trades.
    pub fn average_win(&self) -> f64 {
        match self.winning_trades() {
            0 => 0.0,
            n => self.gross().0 / n as f64,
        }
    }

    /// Mean net P&L of losing trades (zero or negative).
    pub fn average_loss(&self) -> f64 {
        match self.losing_trades() {
            0 => 0.0,
            n => -self.gross().1 / n as f64,
        }
    }

    /// Best single trade by net P&L, or zero.
    pub fn max_win(&self) -> f64 {
        self.trades.iter().map(|t| t.net_pnl).fold(0.0, f64::max)
    }

    /// Worst single trade by net P&L, or zero.
    pub fn max_loss(&self) -> f64 {
        self.trades.iter().map(|t| t.net_pnl).fold(0.0, f64::min)
    }

    /// Computes the profit factor: gross wins over gross losses.
    pub fn profit_factor(&self) -> f64 {
        let (total_gains, total_losses) = self.gross();
        if total_losses == 0.0 {
            return f64::INFINITY;
        }
        total_gains / total_losses
    }

    /// Computes the maximum drawdown of the equity curve as a percentage.
    pub fn max_drawdown(&self) -> f64 {
        let mut max_peak = self.initial_balance;
        let mut max_drawdown = 0.0;

        for point in &self.equity_curve {
            if point.equity > max_peak {
                max_peak = point.equity;
            }
            let drawdown = (max_peak - point.equity) / max_peak;
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
            }
        }

        max_drawdown * 100.0
    }

    /// Computes the Sharpe ratio of the per-candle equity returns.
    ///
    /// `risk_free_rate` is the per-candle risk-free return (e.g., 0.0 for simplicity).
    /// Undefined (NaN) without recorded equity, zero for a flat curve.
    pub fn sharpe_ratio(&self, risk_free_rate: f64) -> f64 {
        if self.equity_curve.is_empty() {
            return f64::NAN;
        }

        let mut returns = Vec::with_capacity(self.equity_curve.len());
        let mut previous = self.initial_balance;

        for point in &self.equity_curve {
            returns.push((point.equity - previous) / previous);
            previous = point.equity;
        }

        let mean_return = returns.iter().sum::<f64>() / returns.len() as f64;
        let std_dev = (returns.iter().map(|r| (r - mean_return).powi(2)).sum::<f64>() / returns.len() as f64).sqrt();

        if std_dev == 0.0 {
            return 0.0;
        }
        (mean_return - risk_free_rate) / std_dev
    }
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Backtest Metrics ===")?;
        writeln!(f, "Initial Balance: {:.2}", self.initial_balance)?;
        writeln!(f, "Final Balance: {:.2}", self.balance)?;
        writeln!(f, "Final Equity: {:.2}", self.equity)?;
        writeln!(f, "Profit & Loss (P&L): {:.2} ({:.2}%)", self.total_pnl(), self.return_pct())?;
        writeln!(f, "Fees paid: {:.2}", self.fees)?;
        writeln!(f)?;
        writeln!(
            f,
            "Trades: {} ({} won, {} lost)",
            self.trades.len(),
            self.winning_trades(),
            self.losing_trades()
        )?;
        writeln!(f, "Win Rate: {:.2}%", self.win_rate())?;
        writeln!(f, "Average Win: {:.2}", self.average_win())?;
        writeln!(f, "Average Loss: {:.2}", self.average_loss())?;
        writeln!(f, "Max Win: {:.2}", self.max_win())?;
        writeln!(f, "Max Loss: {:.2}", self.max_loss())?;
        writeln!(f, "Profit Factor: {:.2}", self.profit_factor())?;
        writeln!(f, "Max Drawdown: {:.2}%", self.max_drawdown())?;
        write!(f, "Sharpe Ratio (risk-free rate = 0.0): {:.2}", self.sharpe_ratio(0.0))
    }
}

#[cfg(test)]
use chrono::DateTime;

#[cfg(test)]
fn create_trade(net_pnl: f64) -> Trade {
    Trade {
        id: crate::utils::new_id(),
        symbol: "BTC/USD".into(),
        side: PositionSide::Long,
        entry_price: 100.0,
        exit_price: 100.0 + net_pnl,
        quantity: 1.0,
        pnl: net_pnl,
        fee: 0.0,
        net_pnl,
        opened_at: DateTime::default(),
        closed_at: DateTime::default(),
    }
}

#[cfg(test)]
fn curve(equities: &[f64]) -> Vec<EquityPoint> {
    equities
        .iter()
        .map(|equity| EquityPoint {
            timestamp: DateTime::default(),
            balance: *equity,
            equity: *equity,
        })
        .collect()
}

#[cfg(test)]
#[test]
fn max_drawdown() {
    let metrics = Metrics::new(10000.0, 0.0, 0.0, 0.0, vec![], curve(&[10000.0, 12000.0, 9000.0, 11000.0]));
    assert_eq!(metrics.max_drawdown(), 25.0); // (12000 - 9000) / 12000 = 25%
}

#[cfg(test)]
#[test]
fn max_drawdown_no_events() {
    let metrics = Metrics::new(10000.0, 10000.0, 10000.0, 0.0, vec![], vec![]);
    assert_eq!(metrics.max_drawdown(), 0.0);
}

#[cfg(test)]
#[test]
fn profit_factor() {
    let trades = vec![create_trade(20.0), create_trade(-10.0)];
    let metrics = Metrics::new(10000.0, 0.0, 0.0, 0.0, trades, vec![]);
    assert_eq!(metrics.profit_factor(), 2.0); // 20 / 10 = 2.0
}

#[cfg(test)]
#[test]
fn profit_factor_no_losses() {
    let metrics = Metrics::new(10000.0, 0.0, 0.0, 0.0, vec![create_trade(20.0)], vec![]);
    assert_eq!(metrics.profit_factor(), f64::INFINITY);

    let metrics = Metrics::new(10000.0, 0.0, 0.0, 0.0, vec![], vec![]);
    assert_eq!(metrics.profit_factor(), f64::INFINITY);
}

#[cfg(test)]
#[test]
fn sharpe_ratio() {
    let metrics = Metrics::new(10000.0, 0.0, 0.0, 0.0, vec![], curve(&[10000.0, 10500.0, 10300.0, 10700.0]));
    let sharpe = metrics.sharpe_ratio(0.0);
    assert!(sharpe > 0.0 && sharpe < 1.0);

    let metrics = Metrics::new(10000.0, 0.0, 0.0, 0.0, vec![], vec![]);
    assert!(metrics.sharpe_ratio(0.0).is_nan());
}

#[cfg(test)]
#[test]
fn sharpe_ratio_flat_curve() {
    let metrics = Metrics::new(10000.0, 10000.0, 10000.0, 0.0, vec![], curve(&[10000.0, 10000.0, 10000.0]));
    assert_eq!(metrics.sharpe_ratio(0.0), 0.0);
    assert!(metrics.to_string().ends_with("Sharpe Ratio (risk-free rate = 0.0): 0.00"));
}

#[cfg(test)]
#[test]
fn trade_statistics() {
    let trades = vec![create_trade(30.0), create_trade(10.0), create_trade(-5.0), create_trade(0.0)];
    let metrics = Metrics::new(10000.0, 10035.0, 10035.0, 1.0, trades, vec![]);

    assert_eq!(metrics.winning_trades(), 2);
    assert_eq!(metrics.losing_trades(), 2);
    assert_eq!(metrics.win_rate(), 50.0);
    assert_eq!(metrics.average_win(), 20.0);
    assert_eq!(metrics.average_loss(), -2.5);
    assert_eq!(metrics.max_win(), 30.0);
    assert_eq!(metrics.max_loss(), -5.0);
    assert_eq!(metrics.total_pnl(), 35.0);
    assert!((metrics.return_pct() - 0.35).abs() < 1e-9);
}

#[cfg(test)]
#[test]
fn from_backtest() {
    use crate::{errors::Result, store::MemoryStore};

    let candles: Vec<Candle> = [100.0, 110.0]
        .iter()
        .map(|c| CandleBuilder::builder().open(*c).high(*c).low(*c).close(*c).build().unwrap())
        .collect();
    let mut step = 0;
    let strategy = move |_: &Candle, _: &Account| -> Result<Signal> {
        step += 1;
        Ok(match step {
            1 => Signal::buy("BTC/USD", 1.0, "enter"),
            _ => Signal::sell("BTC/USD", 1.0, "exit"),
        })
    };

    let ledger = Arc::new(Ledger::new(LedgerConfig::default()).unwrap());
    let mut bt = Backtest::new(ledger, strategy, Arc::new(MemoryStore::new()), RunOptions::default()).unwrap();
    bt.run(&candles).unwrap();

    let metrics = Metrics::from(&bt);
    assert_eq!(metrics.trades().count(), 1);
    assert_eq!(metrics.win_rate(), 100.0);
    assert!((metrics.total_pnl() - 9.685005).abs() < 1e-9);
    assert!(metrics.to_string().starts_with("=== Backtest Metrics ==="));
}
