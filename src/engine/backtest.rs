use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, TryRecvError},
    },
    thread,
    time::Duration,
};

#[cfg(feature = "metrics")]
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::{
    engine::*,
    errors::{Error, Result},
    store::StateStore,
    strategy::Strategy,
};

/// Cooperative cancellation, checked once before each candle.
pub trait RunControl {
    /// Returns true when the run must stop.
    fn should_cancel(&self) -> bool;
}

impl RunControl for AtomicBool {
    fn should_cancel(&self) -> bool {
        self.load(Ordering::SeqCst)
    }
}

/// A run that is never cancelled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopControl;

impl RunControl for NoopControl {
    fn should_cancel(&self) -> bool {
        false
    }
}

/// Engine settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    /// Symbol whose mark price is fed from the candle closes.
    pub symbol: String,
    /// Save the ledger every `checkpoint_interval` processed candles.
    pub checkpoint_interval: usize,
    /// How long a checkpoint may take before the engine moves on.
    pub checkpoint_timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            symbol: "BTC/USD".into(),
            checkpoint_interval: 10,
            checkpoint_timeout: Duration::from_secs(5),
        }
    }
}

/// `NotStarted -> Running -> Completed | Cancelled | Failed`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunStatus {
    #[default]
    NotStarted,
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    Completed,
    Cancelled,
    /// The strategy returned an error; state applied before that candle is kept.
    Failed(Error),
}

/// Summary of a run.
#[derive(Debug)]
pub struct RunReport {
    /// Candles fully processed.
    pub processed: usize,
    pub outcome: RunOutcome,
    pub orders_filled: usize,
    pub orders_rejected: usize,
    /// Sell signals dropped because no position was open.
    pub signals_ignored: usize,
    /// Successful checkpoints.
    pub checkpoints: usize,
}

impl RunReport {
    fn new() -> Self {
        Self {
            processed: 0,
            outcome: RunOutcome::Completed,
            orders_filled: 0,
            orders_rejected: 0,
            signals_ignored: 0,
            checkpoints: 0,
        }
    }
}

/// Account value after a processed candle.
#[cfg(feature = "metrics")]
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub balance: f64,
    pub equity: f64,
}

/// Candle-driven backtesting engine.
///
/// Feeds each candle to the strategy, turns its signal into a market order on
/// the shared [`Ledger`] and checkpoints the ledger through a [`StateStore`].
pub struct Backtest<S> {
    ledger: Arc<Ledger>,
    strategy: S,
    store: Arc<dyn StateStore>,
    options: RunOptions,
    status: RunStatus,
    /// Save still running after its deadline.
    in_flight: Option<Receiver<Result<()>>>,
    #[cfg(feature = "metrics")]
    equity_curve: Vec<EquityPoint>,
}

impl<S> std::ops::Deref for Backtest<S> {
    type Target = Ledger;

    fn deref(&self) -> &Self::Target {
        &self.ledger
    }
}

impl<S: Strategy> Backtest<S> {
    /// Creates a new backtest instance.
    ///
    /// ### Example
    /// ```rust
    /// use std::sync::Arc;
    ///
    /// use candlecore::prelude::*;
    ///
    /// let candle = CandleBuilder::builder()
    ///     .open(100.0)
    ///     .high(110.0)
    ///     .low(95.0)
    ///     .close(105.0)
    ///     .build()
    ///     .unwrap();
    ///
    /// let ledger = Arc::new(Ledger::new(LedgerConfig::default()).unwrap());
    /// let strategy = |_: &Candle, _: &Account| -> Result<Signal> { Ok(Signal::buy("BTC/USD", 1.0, "always")) };
    ///
    /// let mut bt = Backtest::new(ledger, strategy, Arc::new(MemoryStore::new()), RunOptions::default()).unwrap();
    /// let report = bt.run(&[candle]).unwrap();
    /// assert_eq!(report.orders_filled, 1);
    /// ```
    pub fn new(ledger: Arc<Ledger>, strategy: S, store: Arc<dyn StateStore>, options: RunOptions) -> Result<Self> {
        if options.checkpoint_interval == 0 {
            return Err(Error::Config("checkpoint interval must be at least 1".into()));
        }
        if options.symbol.trim().is_empty() {
            return Err(Error::Config("symbol is empty".into()));
        }

        Ok(Self {
            ledger,
            strategy,
            store,
            options,
            status: RunStatus::NotStarted,
            in_flight: None,
            #[cfg(feature = "metrics")]
            equity_curve: Vec::new(),
        })
    }

    /// Returns the shared ledger.
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Returns the balance and equity recorded after each processed candle.
    #[cfg(feature = "metrics")]
    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity_curve
    }

    /// Loads the last checkpoint into the ledger.
    ///
    /// Best-effort: on failure the ledger keeps its current state and `false` is returned.
    pub fn restore(&self) -> bool {
        match self.store.load_state(&self.ledger) {
            Ok(()) => {
                info!(balance = self.ledger.balance(), "state restored");
                true
            }
            Err(error) => {
                warn!(%error, "no state restored, starting fresh");
                false
            }
        }
    }

    /// Runs the strategy over `candles`.
    pub fn run(&mut self, candles: &[Candle]) -> Result<RunReport> {
        self.run_with_control(candles, &NoopControl)
    }

    /// Runs the strategy over `candles`, stopping early once `control` asks to.
    ///
    /// Order rejections and checkpoint failures are logged and the run goes on;
    /// a strategy error ends it with [`RunOutcome::Failed`].
    pub fn run_with_control<C>(&mut self, candles: &[Candle], control: &C) -> Result<RunReport>
    where
        C: RunControl + ?Sized,
    {
        if candles.is_empty() {
            return Err(Error::CandleDataEmpty);
        }

        self.status = RunStatus::Running;
        info!(
            strategy = self.strategy.name(),
            symbol = %self.options.symbol,
            candles = candles.len(),
            balance = self.ledger.balance(),
            "backtest started"
        );

        let mut report = RunReport::new();
        for (index, candle) in candles.iter().enumerate() {
            if control.should_cancel() {
                info!(processed = report.processed, "backtest cancelled");
                self.status = RunStatus::Cancelled;
                report.outcome = RunOutcome::Cancelled;
                return Ok(report);
            }

            self.ledger.update_market_price(&self.options.symbol, candle.close());
            let account = self.ledger.account();
            let signal = match self.strategy.on_candle(candle, &account) {
                Ok(signal) => signal,
                Err(err) => {
                    let err = match err {
                        Error::Strategy(_) => err,
                        other => Error::Strategy(other.to_string()),
                    };
                    error!(candle_index = index, error = %err, "strategy failed, stopping backtest");
                    self.status = RunStatus::Failed;
                    report.outcome = RunOutcome::Failed(err);
                    return Ok(report);
                }
            };
            drop(account);

            self.apply(index, candle, signal, &mut report);
            report.processed += 1;

            #[cfg(feature = "metrics")]
            {
                let account = self.ledger.account();
                self.equity_curve.push(EquityPoint {
                    timestamp: candle.timestamp(),
                    balance: account.balance,
                    equity: account.equity,
                });
            }

            let last = index + 1 == candles.len();
            if last || report.processed % self.options.checkpoint_interval == 0 {
                self.checkpoint(index, last, &mut report);
            }
        }

        self.status = RunStatus::Completed;
        info!(
            processed = report.processed,
            filled = report.orders_filled,
            rejected = report.orders_rejected,
            balance = self.ledger.balance(),
            equity = self.ledger.equity(),
            "backtest completed"
        );
        Ok(report)
    }

    fn apply(&mut self, index: usize, candle: &Candle, signal: Signal, report: &mut RunReport) {
        let side = match signal.action {
            SignalAction::Hold => return,
            SignalAction::Buy => OrderSide::Buy,
            SignalAction::Sell => {
                let open = self
                    .ledger
                    .position(&signal.symbol)
                    .is_some_and(|p| p.quantity() > 0.0);
                if !open {
                    debug!(candle_index = index, symbol = %signal.symbol, "sell signal without position, ignored");
                    report.signals_ignored += 1;
                    return;
                }
                OrderSide::Sell
            }
        };

        let mut order = Order::from((
            signal.symbol.as_str(),
            OrderType::Market(candle.close()),
            signal.quantity,
            side,
        ))
        .at(candle.timestamp());

        match self.ledger.place_order(&mut order) {
            Ok(trade) => {
                report.orders_filled += 1;
                if let Some(trade) = trade {
                    self.strategy.on_trade(&trade);
                }
            }
            Err(error) if error.is_order_rejection() => {
                report.orders_rejected += 1;
                warn!(candle_index = index, %error, reason = %signal.reason, "order rejected, continuing");
            }
            Err(error) => {
                report.orders_rejected += 1;
                error!(candle_index = index, %error, reason = %signal.reason, "order failed unexpectedly, continuing");
            }
        }
    }

    // At most one save runs at a time, so a late save can never land after a newer one.
    // The final save waits for any earlier one before it starts.
    fn checkpoint(&mut self, index: usize, last: bool, report: &mut RunReport) {
        if let Some(previous) = self.in_flight.take() {
            let finished = if last {
                previous.recv().map_err(|_| TryRecvError::Disconnected)
            } else {
                previous.try_recv()
            };
            match finished {
                Ok(result) => Self::record_save(index, result, report),
                Err(TryRecvError::Empty) => {
                    warn!(candle_index = index, "previous checkpoint still running, skipped");
                    self.in_flight = Some(previous);
                    return;
                }
                Err(TryRecvError::Disconnected) => warn!(candle_index = index, "checkpoint worker died"),
            }
        }

        let (tx, rx) = mpsc::channel();
        let store = Arc::clone(&self.store);
        let ledger = Arc::clone(&self.ledger);
        thread::spawn(move || {
            if let Err(mpsc::SendError(Err(error))) = tx.send(store.save_state(&ledger)) {
                warn!(%error, "late checkpoint failed");
            }
        });

        match rx.recv_timeout(self.options.checkpoint_timeout) {
            Ok(result) => Self::record_save(index, result, report),
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    candle_index = index,
                    timeout_ms = self.options.checkpoint_timeout.as_millis() as u64,
                    "checkpoint timed out"
                );
                self.in_flight = Some(rx);
            }
            Err(RecvTimeoutError::Disconnected) => warn!(candle_index = index, "checkpoint worker died"),
        }
    }

    fn record_save(index: usize, result: Result<()>, report: &mut RunReport) {
        match result {
            Ok(()) => {
                report.checkpoints += 1;
                debug!(candle_index = index, "checkpoint saved");
            }
            Err(error) if error.is_persistence() => warn!(candle_index = index, %error, "checkpoint failed"),
            Err(error) => error!(candle_index = index, %error, "checkpoint failed unexpectedly"),
        }
    }
}
