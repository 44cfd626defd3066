use std::collections::VecDeque;

use crate::{
    engine::{Account, Candle, Signal, Trade},
    errors::{Error, Result},
};

/// A source of trading signals.
///
/// `on_candle` is called once per candle with a read-only view of the account.
/// Returning an error stops the backtest. Any
/// `FnMut(&Candle, &Account) -> Result<Signal>` closure is a strategy.
pub trait Strategy {
    /// Display name, used in logs.
    fn name(&self) -> &str {
        "strategy"
    }

    /// Decides what to do on `candle`.
    fn on_candle(&mut self, candle: &Candle, account: &Account) -> Result<Signal>;

    /// Called once for every trade closed by one of this strategy's orders.
    fn on_trade(&mut self, _trade: &Trade) {}
}

impl<F> Strategy for F
where
    F: FnMut(&Candle, &Account) -> Result<Signal>,
{
    fn on_candle(&mut self, candle: &Candle, account: &Account) -> Result<Signal> {
        self(candle, account)
    }
}

/// Simple moving-average crossover.
///
/// Buys `position_size / close` units when the fast average crosses above the
/// slow one and no position is open; sells the whole position on the opposite
/// cross.
#[derive(Debug, Clone)]
pub struct SmaCrossover {
    symbol: String,
    fast_period: usize,
    slow_period: usize,
    position_size: f64,
    closes: VecDeque<f64>,
    previous: Option<(f64, f64)>,
    trades: usize,
}

impl SmaCrossover {
    /// Creates the strategy; `fast_period` must be shorter than `slow_period`.
    pub fn new(symbol: impl Into<String>, fast_period: usize, slow_period: usize, position_size: f64) -> Result<Self> {
        if fast_period == 0 || fast_period >= slow_period {
            return Err(Error::Config(format!(
                "periods must satisfy 0 < fast < slow (got: {fast_period}, {slow_period})"
            )));
        }
        if !position_size.is_finite() || position_size <= 0.0 {
            return Err(Error::Config(format!("position size must be positive (got: {position_size})")));
        }

        Ok(Self {
            symbol: symbol.into(),
            fast_period,
            slow_period,
            position_size,
            closes: VecDeque::with_capacity(slow_period + 1),
            previous: None,
            trades: 0,
        })
    }

    /// Number of trades reported through [`Strategy::on_trade`].
    pub fn trades(&self) -> usize {
        self.trades
    }

    fn average(&self, period: usize) -> f64 {
        self.closes.iter().rev().take(period).sum::<f64>() / period as f64
    }
}

impl Strategy for SmaCrossover {
    fn name(&self) -> &str {
        "sma_crossover"
    }

    fn on_candle(&mut self, candle: &Candle, account: &Account) -> Result<Signal> {
        self.closes.push_back(candle.close());
        if self.closes.len() > self.slow_period {
            self.closes.pop_front();
        }
        if self.closes.len() < self.slow_period {
            return Ok(Signal::hold(&self.symbol));
        }

        let fast = self.average(self.fast_period);
        let slow = self.average(self.slow_period);
        let Some((prev_fast, prev_slow)) = self.previous.replace((fast, slow)) else {
            return Ok(Signal::hold(&self.symbol));
        };

        let open = account
            .position(&self.symbol)
            .map(|p| p.quantity())
            .filter(|q| *q > 0.0);

        match open {
            None if prev_fast <= prev_slow && fast > slow => Ok(Signal::buy(
                &self.symbol,
                self.position_size / candle.close(),
                "fast MA crossed above slow MA",
            )),
            Some(quantity) if prev_fast >= prev_slow && fast < slow => {
                Ok(Signal::sell(&self.symbol, quantity, "fast MA crossed below slow MA"))
            }
            _ => Ok(Signal::hold(&self.symbol)),
        }
    }

    fn on_trade(&mut self, _trade: &Trade) {
        self.trades += 1;
    }
}
