use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    PercentCalculus,
    engine::*,
    errors::{Error, Result},
    utils::new_id,
};

/// Fee and slippage model of the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Starting cash.
    pub initial_balance: f64,
    /// Fee rate charged on every fill (e.g. `0.001` for 0.1%).
    pub taker_fee: f64,
    /// Configured for completeness; fills are always charged the taker rate.
    pub maker_fee: f64,
    /// Adverse price move applied to market fills, in basis points of the mark price.
    pub slippage_bps: f64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            initial_balance: 10_000.0,
            taker_fee: 0.001,
            maker_fee: 0.0005,
            slippage_bps: 5.0,
        }
    }
}

impl LedgerConfig {
    /// Checks the balance is positive, fee rates lie in `[0, 1]` and slippage is not negative.
    pub fn validate(&self) -> Result<()> {
        if !self.initial_balance.is_finite() || self.initial_balance <= 0.0 {
            return Err(Error::NegZeroBalance(self.initial_balance));
        }
        for (name, rate) in [("taker_fee", self.taker_fee), ("maker_fee", self.maker_fee)] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(Error::Config(format!("{name} must be within [0, 1] (got: {rate})")));
            }
        }
        if !self.slippage_bps.is_finite() || self.slippage_bps < 0.0 {
            return Err(Error::Config(format!(
                "slippage_bps must not be negative (got: {})",
                self.slippage_bps
            )));
        }
        Ok(())
    }

    fn slippage(&self, mark: f64) -> f64 {
        // bps -> percent
        mark.how_many(self.slippage_bps / 100.0)
    }
}

/// Serializable copy of the whole ledger state, used for checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub balance: f64,
    pub initial_balance: f64,
    pub fees_paid: f64,
    pub positions: Vec<Position>,
    pub open_orders: Vec<Order>,
    pub trades: Arc<Vec<Trade>>,
    pub marks: BTreeMap<String, f64>,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug)]
struct LedgerState {
    balance: f64,
    initial_balance: f64,
    fees_paid: f64,
    positions: BTreeMap<String, Position>,
    open_orders: Vec<Order>,
    trades: Arc<Vec<Trade>>,
    marks: HashMap<String, f64>,
    updated_at: DateTime<Utc>,
}

impl LedgerState {
    fn equity(&self) -> f64 {
        self.balance + self.positions.values().map(Position::unrealized_pnl).sum::<f64>()
    }
}

/// The paper broker.
///
/// Owns the cash balance, open positions, pending orders and trade history
/// behind a single read-write lock. Every fill (balance, position and trade
/// bookkeeping) happens inside one write-lock critical section, so readers
/// never observe a half-applied execution.
#[derive(Debug)]
pub struct Ledger {
    config: LedgerConfig,
    state: RwLock<LedgerState>,
}

impl Ledger {
    /// Creates a ledger holding `config.initial_balance` in cash.
    ///
    /// ### Example
    /// ```rust
    /// use candlecore::prelude::*;
    ///
    /// let ledger = Ledger::new(LedgerConfig::default()).unwrap();
    /// ledger.update_market_price("BTC/USD", 100.0);
    ///
    /// let mut order = Order::from(("BTC/USD", OrderType::Market(0.0), 1.0, OrderSide::Buy));
    /// ledger.place_order(&mut order).unwrap();
    ///
    /// assert_eq!(order.status(), OrderStatus::Filled);
    /// assert!(ledger.position("BTC/USD").is_some());
    /// ```
    pub fn new(config: LedgerConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            state: RwLock::new(LedgerState {
                balance: config.initial_balance,
                initial_balance: config.initial_balance,
                fees_paid: 0.0,
                positions: BTreeMap::new(),
                open_orders: Vec::new(),
                trades: Arc::new(Vec::new()),
                marks: HashMap::new(),
                updated_at: Utc::now(),
            }),
        })
    }

    /// Returns the fee and slippage model.
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Returns the realized cash balance.
    pub fn balance(&self) -> f64 {
        self.state.read().balance
    }

    /// Returns the balance plus unrealized P&L.
    pub fn equity(&self) -> f64 {
        self.state.read().equity()
    }

    /// Returns the starting cash of the current session (restored from checkpoints).
    pub fn initial_balance(&self) -> f64 {
        self.state.read().initial_balance
    }

    /// Returns the cumulative fees paid.
    pub fn fees_paid(&self) -> f64 {
        self.state.read().fees_paid
    }

    /// Returns the latest mark price recorded for `symbol`.
    pub fn mark_price(&self, symbol: &str) -> Option<f64> {
        self.state.read().marks.get(symbol).copied()
    }

    /// Returns a copy of the open position for `symbol`.
    pub fn position(&self, symbol: &str) -> Option<Position> {
        self.state.read().positions.get(symbol).cloned()
    }

    /// Returns a copy of the pending orders.
    pub fn open_orders(&self) -> Vec<Order> {
        self.state.read().open_orders.clone()
    }

    /// Returns the trade history.
    pub fn trades(&self) -> Arc<Vec<Trade>> {
        Arc::clone(&self.state.read().trades)
    }

    /// Returns an independently owned snapshot of the account.
    pub fn account(&self) -> Account {
        let state = self.state.read();
        Account {
            balance: state.balance,
            equity: state.equity(),
            positions: state.positions.values().cloned().collect(),
            open_orders: state.open_orders.clone(),
            trade_history: Arc::clone(&state.trades),
            updated_at: Utc::now(),
        }
    }

    /// Records the latest market price of `symbol` and re-marks its open position.
    ///
    /// Balance is never affected. Non-finite or non-positive prices are ignored.
    pub fn update_market_price(&self, symbol: &str, price: f64) {
        if !price.is_finite() || price <= 0.0 {
            warn!(symbol, price, "ignoring invalid market price");
            return;
        }

        let mut state = self.state.write();
        state.marks.insert(symbol.to_owned(), price);
        if let Some(position) = state.positions.get_mut(symbol) {
            position.mark(price);
        }
        state.updated_at = Utc::now();
    }

    /// Submits an order.
    ///
    /// The ledger assigns the order a fresh identifier. A market order fills
    /// immediately at the mark price adjusted by slippage; a limit order is
    /// queued as pending. On error the order is marked rejected and the ledger
    /// state is left untouched.
    ///
    /// An order is submitted once: resubmitting one that already carries an
    /// identifier, or that is terminal, fails with [`Error::InvalidOrder`] and
    /// leaves both the order and the ledger as they were.
    ///
    /// ### Returns
    /// The trade produced when a sell closes (part of) a position.
    pub fn place_order(&self, order: &mut Order) -> Result<Option<Trade>> {
        if order.status().is_terminal() || order.id().is_some() {
            let status = format!("{:?}", order.status()).to_lowercase();
            warn!(order_id = order.id(), %status, "order resubmitted, ignored");
            return Err(Error::InvalidOrder(format!("order already {status}")));
        }

        let mut guard = self.state.write();
        order.assign_id(new_id());

        let result = self.execute(&mut guard, order);
        if let Err(error) = &result {
            order.set_status(OrderStatus::Rejected);
            warn!(
                order_id = order.id(),
                symbol = order.symbol(),
                side = ?order.side(),
                quantity = order.quantity(),
                %error,
                "order rejected"
            );
        }
        result
    }

    fn execute(&self, state: &mut LedgerState, order: &mut Order) -> Result<Option<Trade>> {
        let quantity = order.quantity();
        if !quantity.is_finite() || quantity <= 0.0 {
            return Err(Error::InvalidOrder(format!("quantity must be positive (got: {quantity})")));
        }
        if order.symbol().trim().is_empty() {
            return Err(Error::InvalidOrder("symbol is empty".into()));
        }

        let stated_price = order.order_type().inner();
        if !order.order_type().is_market() {
            if !stated_price.is_finite() || stated_price <= 0.0 {
                return Err(Error::InvalidOrder(format!("limit price must be positive (got: {stated_price})")));
            }
            order.set_status(OrderStatus::Pending);
            state.open_orders.push(order.clone());
            state.updated_at = Utc::now();
            info!(
                order_id = order.id(),
                symbol = order.symbol(),
                side = ?order.side(),
                quantity,
                price = stated_price,
                "limit order queued"
            );
            return Ok(None);
        }

        let mark = match state.marks.get(order.symbol()) {
            Some(mark) => *mark,
            None if stated_price.is_finite() && stated_price > 0.0 => {
                debug!(symbol = order.symbol(), price = stated_price, "no mark price, using the order price");
                stated_price
            }
            None => {
                return Err(Error::InvalidOrder(format!(
                    "no market price for {} and no valid order price",
                    order.symbol()
                )));
            }
        };
        let slippage = self.config.slippage(mark);

        let (fill, trade) = match order.side() {
            OrderSide::Buy => (self.buy(state, order, mark + slippage, slippage)?, None),
            OrderSide::Sell => {
                let (fill, trade) = self.sell(state, order, mark - slippage, slippage)?;
                (fill, Some(trade))
            }
        };

        order.set_filled(fill);
        state.fees_paid += fill.fee;
        state.updated_at = Utc::now();

        info!(
            order_id = order.id(),
            symbol = order.symbol(),
            side = ?order.side(),
            quantity = fill.quantity,
            price = fill.price,
            fee = fill.fee,
            balance = state.balance,
            "order filled"
        );
        Ok(trade)
    }

    fn buy(&self, state: &mut LedgerState, order: &Order, price: f64, slippage: f64) -> Result<Fill> {
        let quantity = order.quantity();
        let value = price * quantity;
        let fee = value * self.config.taker_fee;
        let required = value + fee;
        if required > state.balance {
            return Err(Error::InsufficientBalance {
                required,
                available: state.balance,
            });
        }

        state.balance -= required;
        match state.positions.get_mut(order.symbol()) {
            Some(position) => position.average_in(price, quantity),
            None => {
                let position = Position::from((order.symbol(), PositionSide::Long, price, quantity, order.timestamp()));
                state.positions.insert(order.symbol().to_owned(), position);
            }
        }

        Ok(Fill {
            price,
            quantity,
            fee,
            slippage,
        })
    }

    fn sell(&self, state: &mut LedgerState, order: &Order, price: f64, slippage: f64) -> Result<(Fill, Trade)> {
        let symbol = order.symbol();
        let position = state
            .positions
            .get_mut(symbol)
            .ok_or_else(|| Error::InvalidOrder(format!("no open position for {symbol}")))?;

        let requested = order.quantity();
        if requested > position.quantity() + POSITION_EPSILON {
            return Err(Error::InvalidOrder(format!(
                "sell quantity {requested} exceeds open quantity {}",
                position.quantity()
            )));
        }

        let quantity = requested.min(position.quantity());
        let value = price * quantity;
        let fee = value * self.config.taker_fee;
        let pnl = position.estimate_pnl(price, quantity);

        let trade = Trade {
            id: new_id(),
            symbol: symbol.to_owned(),
            side: position.side(),
            entry_price: position.entry_price(),
            exit_price: price,
            quantity,
            pnl,
            fee,
            net_pnl: pnl - fee,
            opened_at: position.opened_at(),
            closed_at: order.timestamp(),
        };

        position.reduce(quantity);
        if position.is_closed() {
            state.positions.remove(symbol);
        }
        state.balance += value - fee;
        Arc::make_mut(&mut state.trades).push(trade.clone());

        Ok((
            Fill {
                price,
                quantity,
                fee,
                slippage,
            },
            trade,
        ))
    }

    /// Removes a pending order and marks it cancelled.
    pub fn cancel_order(&self, id: &str) -> Result<Order> {
        let mut state = self.state.write();
        let index = state
            .open_orders
            .iter()
            .position(|o| o.id() == Some(id) && o.status() == OrderStatus::Pending)
            .ok_or_else(|| Error::OrderNotFound(id.to_owned()))?;

        let mut order = state.open_orders.remove(index);
        order.set_status(OrderStatus::Cancelled);
        state.updated_at = Utc::now();
        info!(order_id = id, symbol = order.symbol(), "order cancelled");
        Ok(order)
    }

    /// Copies the whole ledger state.
    pub fn snapshot(&self) -> LedgerSnapshot {
        let state = self.state.read();
        LedgerSnapshot {
            balance: state.balance,
            initial_balance: state.initial_balance,
            fees_paid: state.fees_paid,
            positions: state.positions.values().cloned().collect(),
            open_orders: state.open_orders.clone(),
            trades: Arc::clone(&state.trades),
            marks: state.marks.iter().map(|(s, p)| (s.clone(), *p)).collect(),
            saved_at: Utc::now(),
        }
    }

    /// Replaces the ledger state with `snapshot` after validating it.
    pub fn restore(&self, snapshot: LedgerSnapshot) -> Result<()> {
        if !snapshot.balance.is_finite() || snapshot.balance < 0.0 {
            return Err(Error::NegZeroBalance(snapshot.balance));
        }
        if !snapshot.initial_balance.is_finite() || snapshot.initial_balance <= 0.0 {
            return Err(Error::NegZeroBalance(snapshot.initial_balance));
        }

        let mut positions = BTreeMap::new();
        for position in snapshot.positions {
            if position.is_closed() || !position.entry_price().is_finite() || position.entry_price() <= 0.0 {
                return Err(Error::Persistence(format!("invalid position for {}", position.symbol())));
            }
            if positions.insert(position.symbol().to_owned(), position).is_some() {
                return Err(Error::Persistence("duplicate position in snapshot".into()));
            }
        }

        let mut state = self.state.write();
        *state = LedgerState {
            balance: snapshot.balance,
            initial_balance: snapshot.initial_balance,
            fees_paid: snapshot.fees_paid,
            positions,
            open_orders: snapshot.open_orders,
            trades: snapshot.trades,
            marks: snapshot.marks.into_iter().collect(),
            updated_at: Utc::now(),
        };
        info!(
            balance = state.balance,
            positions = state.positions.len(),
            trades = state.trades.len(),
            "ledger restored"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SYMBOL: &str = "BTC/USD";

    fn ledger() -> Ledger {
        Ledger::new(LedgerConfig::default()).unwrap()
    }

    fn market(side: OrderSide, quantity: f64) -> Order {
        Order::from((SYMBOL, OrderType::Market(0.0), quantity, side))
    }

    fn assert_close(left: f64, right: f64) {
        assert!((left - right).abs() < 1e-9, "{left} != {right}");
    }

    #[test]
    fn reject_invalid_config() {
        let config = LedgerConfig {
            initial_balance: 0.0,
            ..Default::default()
        };
        assert!(matches!(Ledger::new(config), Err(Error::NegZeroBalance(_))));

        let config = LedgerConfig {
            taker_fee: 1.5,
            ..Default::default()
        };
        assert!(matches!(Ledger::new(config), Err(Error::Config(_))));

        let config = LedgerConfig {
            slippage_bps: -1.0,
            ..Default::default()
        };
        assert!(matches!(Ledger::new(config), Err(Error::Config(_))));
    }

    #[test]
    fn scenario_buy_mark_and_sell() {
        let ledger = ledger();
        ledger.update_market_price(SYMBOL, 100.0);

        let mut order = market(OrderSide::Buy, 1.0);
        assert!(ledger.place_order(&mut order).unwrap().is_none());

        let fill = order.fill().copied().unwrap();
        assert!(order.id().is_some());
        assert_eq!(order.status(), OrderStatus::Filled);
        assert_close(fill.slippage, 0.05);
        assert_close(fill.price, 100.05);
        assert_close(fill.fee, 0.10005);
        assert_close(ledger.balance(), 9899.84995);

        let position = ledger.position(SYMBOL).unwrap();
        assert_close(position.entry_price(), 100.05);
        assert_eq!(position.quantity(), 1.0);

        ledger.update_market_price(SYMBOL, 110.0);
        let account = ledger.account();
        assert_close(account.positions[0].unrealized_pnl(), 9.95);
        assert_close(account.equity, 9909.79995);
        assert_close(account.balance, 9899.84995);

        let mut order = market(OrderSide::Sell, 1.0);
        let trade = ledger.place_order(&mut order).unwrap().unwrap();
        assert_close(trade.exit_price, 109.945);
        assert_close(trade.fee, 0.109945);
        assert_close(trade.pnl, 9.895);
        assert_close(trade.net_pnl, 9.785055);
        assert_close(ledger.balance(), 10009.685005);
        assert!(ledger.position(SYMBOL).is_none());
        assert_eq!(ledger.trades().len(), 1);
        assert_close(ledger.fees_paid(), 0.10005 + 0.109945);
    }

    #[test]
    fn average_entry_price() {
        let ledger = ledger();
        ledger.update_market_price(SYMBOL, 100.0);
        ledger.place_order(&mut market(OrderSide::Buy, 1.0)).unwrap();
        ledger.update_market_price(SYMBOL, 200.0);
        ledger.place_order(&mut market(OrderSide::Buy, 3.0)).unwrap();

        // fills at 100.05 and 200.1
        let position = ledger.position(SYMBOL).unwrap();
        assert_eq!(position.quantity(), 4.0);
        assert_close(position.entry_price(), (100.05 + 200.1 * 3.0) / 4.0);
        assert_close(position.unrealized_pnl(), (200.0 - position.entry_price()) * 4.0);
        assert_eq!(ledger.account().positions.len(), 1);
    }

    #[test]
    fn partial_close_keeps_position() {
        let ledger = ledger();
        ledger.update_market_price(SYMBOL, 100.0);
        ledger.place_order(&mut market(OrderSide::Buy, 2.0)).unwrap();

        let trade = ledger.place_order(&mut market(OrderSide::Sell, 0.5)).unwrap().unwrap();
        assert_eq!(trade.quantity, 0.5);
        assert_eq!(ledger.position(SYMBOL).unwrap().quantity(), 1.5);
    }

    #[test]
    fn rejected_orders_do_not_mutate() {
        let ledger = ledger();
        ledger.update_market_price(SYMBOL, 100.0);
        ledger.place_order(&mut market(OrderSide::Buy, 1.0)).unwrap();
        let before = ledger.snapshot();

        let mut too_big = market(OrderSide::Buy, 1_000.0);
        let result = ledger.place_order(&mut too_big);
        assert!(matches!(result, Err(Error::InsufficientBalance { .. })));
        assert_eq!(too_big.status(), OrderStatus::Rejected);

        let mut zero = market(OrderSide::Buy, 0.0);
        assert!(matches!(ledger.place_order(&mut zero), Err(Error::InvalidOrder(_))));
        assert_eq!(zero.status(), OrderStatus::Rejected);

        let mut no_symbol = Order::from(("", OrderType::Market(100.0), 1.0, OrderSide::Buy));
        assert!(matches!(ledger.place_order(&mut no_symbol), Err(Error::InvalidOrder(_))));

        let mut oversell = market(OrderSide::Sell, 2.0);
        assert!(matches!(ledger.place_order(&mut oversell), Err(Error::InvalidOrder(_))));

        let mut orphan = Order::from(("ETH/USD", OrderType::Market(10.0), 1.0, OrderSide::Sell));
        assert!(matches!(ledger.place_order(&mut orphan), Err(Error::InvalidOrder(_))));

        let after = ledger.snapshot();
        assert_eq!(before.balance, after.balance);
        assert_eq!(before.positions, after.positions);
        assert_eq!(before.trades, after.trades);
        assert_eq!(before.fees_paid, after.fees_paid);
    }

    #[test]
    fn sell_within_epsilon_closes() {
        let ledger = ledger();
        ledger.update_market_price(SYMBOL, 100.0);
        ledger.place_order(&mut market(OrderSide::Buy, 1.0)).unwrap();

        let trade = ledger.place_order(&mut market(OrderSide::Sell, 1.00005)).unwrap().unwrap();
        assert_eq!(trade.quantity, 1.0);
        assert!(ledger.position(SYMBOL).is_none());
    }

    #[test]
    fn residual_below_epsilon_is_removed() {
        let ledger = ledger();
        ledger.update_market_price(SYMBOL, 100.0);
        ledger.place_order(&mut market(OrderSide::Buy, 1.0)).unwrap();
        ledger.place_order(&mut market(OrderSide::Sell, 0.99995)).unwrap();
        assert!(ledger.position(SYMBOL).is_none());
        assert!(ledger.account().positions.is_empty());
    }

    #[test]
    fn fallback_to_order_price() {
        let ledger = ledger();
        let mut order = Order::from((SYMBOL, OrderType::Market(100.0), 1.0, OrderSide::Buy));
        ledger.place_order(&mut order).unwrap();
        assert_close(order.fill().unwrap().price, 100.05);

        let mut unpriced = Order::from(("ETH/USD", OrderType::Market(0.0), 1.0, OrderSide::Buy));
        assert!(matches!(ledger.place_order(&mut unpriced), Err(Error::InvalidOrder(_))));
    }

    #[test]
    fn limit_orders_stay_pending_until_cancelled() {
        let ledger = ledger();
        ledger.update_market_price(SYMBOL, 100.0);

        let mut order = Order::from((SYMBOL, OrderType::Limit(95.0), 1.0, OrderSide::Buy));
        assert!(ledger.place_order(&mut order).unwrap().is_none());
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(ledger.balance(), 10_000.0);

        ledger.update_market_price(SYMBOL, 90.0);
        let open = ledger.open_orders();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].status(), OrderStatus::Pending);

        let id = order.id().unwrap();
        let cancelled = ledger.cancel_order(id).unwrap();
        assert_eq!(cancelled.status(), OrderStatus::Cancelled);
        assert!(ledger.open_orders().is_empty());
        assert!(matches!(ledger.cancel_order(id), Err(Error::OrderNotFound(_))));

        let mut bad = Order::from((SYMBOL, OrderType::Limit(-1.0), 1.0, OrderSide::Buy));
        assert!(matches!(ledger.place_order(&mut bad), Err(Error::InvalidOrder(_))));
    }

    #[test]
    fn submitted_orders_cannot_run_twice() {
        let ledger = ledger();
        ledger.update_market_price(SYMBOL, 100.0);

        let mut filled = market(OrderSide::Buy, 1.0);
        ledger.place_order(&mut filled).unwrap();
        let id = filled.id().map(str::to_owned);
        let before = ledger.snapshot();

        let result = ledger.place_order(&mut filled);
        assert!(matches!(result, Err(Error::InvalidOrder(msg)) if msg == "order already filled"));
        assert_eq!(filled.id().map(str::to_owned), id);
        assert_eq!(filled.status(), OrderStatus::Filled);
        assert_eq!(ledger.balance(), before.balance);
        assert_eq!(ledger.position(SYMBOL).unwrap().quantity(), 1.0);

        let mut limit = Order::from((SYMBOL, OrderType::Limit(95.0), 1.0, OrderSide::Buy));
        ledger.place_order(&mut limit).unwrap();
        // still pending, but already queued
        assert!(matches!(ledger.place_order(&mut limit), Err(Error::InvalidOrder(_))));
        assert_eq!(ledger.open_orders().len(), 1);

        let mut cancelled = ledger.cancel_order(limit.id().unwrap()).unwrap();
        let result = ledger.place_order(&mut cancelled);
        assert!(matches!(result, Err(Error::InvalidOrder(msg)) if msg == "order already cancelled"));
        assert_eq!(cancelled.status(), OrderStatus::Cancelled);
        assert!(ledger.open_orders().is_empty());

        let after = ledger.snapshot();
        assert_eq!(before.balance, after.balance);
        assert_eq!(before.positions, after.positions);
        assert_eq!(before.fees_paid, after.fees_paid);
    }

    #[test]
    fn cancel_unknown_order() {
        let ledger = ledger();
        assert!(matches!(ledger.cancel_order("nope"), Err(Error::OrderNotFound(_))));
    }

    #[test]
    fn mark_updates_never_touch_balance() {
        let ledger = ledger();
        ledger.update_market_price(SYMBOL, 100.0);
        ledger.place_order(&mut market(OrderSide::Buy, 1.0)).unwrap();
        let balance = ledger.balance();

        for price in [90.0, 120.0, f64::NAN, -1.0, 80.0] {
            ledger.update_market_price(SYMBOL, price);
            assert_eq!(ledger.balance(), balance);
        }
        assert_eq!(ledger.mark_price(SYMBOL), Some(80.0));
    }

    #[test]
    fn account_is_idempotent() {
        let ledger = ledger();
        ledger.update_market_price(SYMBOL, 100.0);
        ledger.place_order(&mut market(OrderSide::Buy, 1.0)).unwrap();

        let first = ledger.account();
        let second = ledger.account();
        assert_eq!(first.balance, second.balance);
        assert_eq!(first.equity, second.equity);
        assert_eq!(first.positions, second.positions);
        assert_eq!(first.trade_history, second.trade_history);
    }

    #[test]
    fn snapshot_and_restore() {
        let source = ledger();
        source.update_market_price(SYMBOL, 100.0);
        source.place_order(&mut market(OrderSide::Buy, 2.0)).unwrap();
        source.place_order(&mut market(OrderSide::Sell, 1.0)).unwrap();
        let snapshot = source.snapshot();

        let target = ledger();
        target.restore(snapshot.clone()).unwrap();
        assert_eq!(target.balance(), source.balance());
        assert_eq!(target.position(SYMBOL), source.position(SYMBOL));
        assert_eq!(target.trades(), source.trades());
        assert_eq!(target.mark_price(SYMBOL), Some(100.0));

        let corrupt = LedgerSnapshot {
            balance: -5.0,
            ..snapshot
        };
        assert!(target.restore(corrupt).is_err());
        assert_eq!(target.balance(), source.balance());
    }

    #[test]
    fn readers_never_see_half_applied_fills() {
        let ledger = ledger();
        ledger.update_market_price(SYMBOL, 100.0);
        let taker = ledger.config().taker_fee;

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..500 {
                        let account = ledger.account();
                        // entry fees are not part of a trade's net P&L
                        let realized = 10_000.0
                            + account
                                .trade_history
                                .iter()
                                .map(|t| t.net_pnl - t.entry_price * t.quantity * taker)
                                .sum::<f64>();
                        let expected = match account.position(SYMBOL) {
                            Some(position) => realized - position.cost() * (1.0 + taker),
                            None => realized,
                        };
                        assert!((account.balance - expected).abs() < 1e-6);
                        assert!((account.equity - account.balance - account.unrealized_pnl()).abs() < 1e-9);
                    }
                });
            }

            for _ in 0..200 {
                ledger.place_order(&mut market(OrderSide::Buy, 1.0)).unwrap();
                ledger.place_order(&mut market(OrderSide::Sell, 1.0)).unwrap();
            }
        });

        assert_eq!(ledger.trades().len(), 200);
    }
}
