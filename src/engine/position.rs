use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Quantity at or below which a position is considered closed.
pub const POSITION_EPSILON: f64 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

/// An open position, one per symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    symbol: String,
    side: PositionSide,
    entry_price: f64,
    quantity: f64,
    current_price: f64,
    unrealized_pnl: f64,
    opened_at: DateTime<Utc>,
}

type P1<'a> = (&'a str, PositionSide, f64, f64, DateTime<Utc>);
impl From<P1<'_>> for Position {
    fn from((symbol, side, entry_price, quantity, opened_at): P1<'_>) -> Self {
        Self {
            symbol: symbol.to_owned(),
            side,
            entry_price,
            quantity,
            current_price: entry_price,
            unrealized_pnl: 0.0,
            opened_at,
        }
    }
}

impl Position {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn side(&self) -> PositionSide {
        self.side
    }

    /// Volume-weighted average entry price.
    pub fn entry_price(&self) -> f64 {
        self.entry_price
    }

    pub fn quantity(&self) -> f64 {
        self.quantity
    }

    /// Latest mark price applied to this position.
    pub fn current_price(&self) -> f64 {
        self.current_price
    }

    pub fn unrealized_pnl(&self) -> f64 {
        self.unrealized_pnl
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// Cost basis of the open quantity.
    pub fn cost(&self) -> f64 {
        self.entry_price * self.quantity
    }

    /// Profit or loss of `quantity` units if they were closed at `price`.
    pub fn estimate_pnl(&self, price: f64, quantity: f64) -> f64 {
        match self.side {
            PositionSide::Long => (price - self.entry_price) * quantity,
            PositionSide::Short => (self.entry_price - price) * quantity,
        }
    }

    /// Whether the remaining quantity is small enough to drop the position.
    pub fn is_closed(&self) -> bool {
        self.quantity <= POSITION_EPSILON
    }

    /// Applies a new mark price and recomputes the unrealized P&L.
    pub(crate) fn mark(&mut self, price: f64) {
        self.current_price = price;
        self.unrealized_pnl = self.estimate_pnl(price, self.quantity);
    }

    /// Adds a same-direction fill and re-averages the entry price.
    pub(crate) fn average_in(&mut self, price: f64, quantity: f64) {
        let total_cost = self.entry_price * self.quantity + price * quantity;
        self.quantity += quantity;
        self.entry_price = total_cost / self.quantity;
        self.unrealized_pnl = self.estimate_pnl(self.current_price, self.quantity);
    }

    /// Removes `quantity` units from the position.
    pub(crate) fn reduce(&mut self, quantity: f64) {
        self.quantity -= quantity;
        self.unrealized_pnl = self.estimate_pnl(self.current_price, self.quantity);
    }
}

/// A completed round trip (full or partial close). Never mutated once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    /// Gross P&L, before the exit fee.
    pub pnl: f64,
    pub fee: f64,
    pub net_pnl: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

#[cfg(test)]
fn long(entry: f64, qty: f64) -> Position {
    Position::from(("BTC/USD", PositionSide::Long, entry, qty, DateTime::default()))
}

#[cfg(test)]
#[test]
fn open_position_is_flat() {
    let position = long(100.05, 1.0);
    assert_eq!(position.current_price(), 100.05);
    assert_eq!(position.unrealized_pnl(), 0.0);
    assert_eq!(position.cost(), 100.05);
}

#[cfg(test)]
#[test]
fn mark_long_and_short() {
    let mut position = long(100.05, 1.0);
    position.mark(110.0);
    assert!((position.unrealized_pnl() - 9.95).abs() < 1e-9);

    let mut short = Position::from(("BTC/USD", PositionSide::Short, 100.0, 2.0, DateTime::default()));
    short.mark(90.0);
    assert_eq!(short.unrealized_pnl(), 20.0);
    short.mark(105.0);
    assert_eq!(short.unrealized_pnl(), -10.0);
}

#[cfg(test)]
#[test]
fn average_in_weights_by_volume() {
    let mut position = long(100.0, 1.0);
    position.average_in(110.0, 3.0);
    assert_eq!(position.quantity(), 4.0);
    assert!((position.entry_price() - 107.5).abs() < 1e-9);
}

#[cfg(test)]
#[test]
fn reduce_to_epsilon_closes() {
    let mut position = long(100.0, 1.0);
    position.reduce(0.5);
    assert!(!position.is_closed());
    position.reduce(0.49995);
    assert!(position.is_closed());
}
