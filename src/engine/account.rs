use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::{Order, Position, Trade};

/// Point-in-time copy of the ledger.
///
/// Positions and open orders are owned copies; the trade history is shared
/// read-only since it is append-only and trades never change once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Realized cash.
    pub balance: f64,
    /// Balance plus the unrealized P&L of every open position.
    pub equity: f64,
    pub positions: Vec<Position>,
    pub open_orders: Vec<Order>,
    pub trade_history: Arc<Vec<Trade>>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Returns the open position for `symbol`, if any.
    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.symbol() == symbol)
    }

    /// Sum of the unrealized P&L across open positions.
    pub fn unrealized_pnl(&self) -> f64 {
        self.positions.iter().map(Position::unrealized_pnl).sum()
    }
}
