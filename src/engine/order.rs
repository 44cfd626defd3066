use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Represents the side of an order (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Represents the type of an order and the price it carries.
///
/// For a market order the price is only a fallback, used when the ledger has
/// no mark price for the symbol yet. A limit order rests at its price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "price", rename_all = "lowercase")]
pub enum OrderType {
    Market(f64),
    Limit(f64),
}

impl OrderType {
    /// Returns the price associated with the order type.
    pub fn inner(&self) -> f64 {
        match self {
            Self::Market(price) | Self::Limit(price) => *price,
        }
    }

    /// Returns true for a market order.
    pub fn is_market(&self) -> bool {
        matches!(self, Self::Market(_))
    }
}

/// Lifecycle of an order: `pending -> filled | rejected | cancelled`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Pending,
    Filled,
    Rejected,
    Cancelled,
}

impl OrderStatus {
    /// Terminal orders are never mutated again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Execution details, present only once an order is filled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub price: f64,
    pub quantity: f64,
    pub fee: f64,
    pub slippage: f64,
}

impl Fill {
    /// Execution value before fees.
    pub fn value(&self) -> f64 {
        self.price * self.quantity
    }
}

/// A request to buy or sell a quantity of a symbol.
///
/// Created by the caller, mutated only by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    id: Option<String>,
    timestamp: DateTime<Utc>,
    symbol: String,
    side: OrderSide,
    order_type: OrderType,
    quantity: f64,
    status: OrderStatus,
    fill: Option<Fill>,
}

type O1<'a> = (&'a str, OrderType, f64, OrderSide);
impl From<O1<'_>> for Order {
    fn from((symbol, order_type, quantity, side): O1<'_>) -> Self {
        Self {
            id: None,
            timestamp: Utc::now(),
            symbol: symbol.to_owned(),
            side,
            order_type,
            quantity,
            status: OrderStatus::Pending,
            fill: None,
        }
    }
}

impl Order {
    /// Stamps the order with the time it was created at (e.g. a candle timestamp).
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Identifier assigned by the ledger on submission.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn side(&self) -> OrderSide {
        self.side
    }

    pub fn order_type(&self) -> OrderType {
        self.order_type
    }

    /// Requested quantity.
    pub fn quantity(&self) -> f64 {
        self.quantity
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    /// Execution details, `None` unless the order is filled.
    pub fn fill(&self) -> Option<&Fill> {
        self.fill.as_ref()
    }

    pub(crate) fn assign_id(&mut self, id: String) {
        self.id = Some(id);
    }

    pub(crate) fn set_status(&mut self, status: OrderStatus) {
        self.status = status;
    }

    pub(crate) fn set_filled(&mut self, fill: Fill) {
        self.fill = Some(fill);
        self.status = OrderStatus::Filled;
    }
}

#[cfg(test)]
#[test]
fn create_simple_order() {
    let order: Order = ("BTC/USD", OrderType::Market(100.0), 2.0, OrderSide::Buy).into();

    assert_eq!(order.symbol(), "BTC/USD");
    assert_eq!(order.order_type().inner(), 100.0);
    assert!(order.order_type().is_market());
    assert_eq!(order.quantity(), 2.0);
    assert_eq!(order.side(), OrderSide::Buy);
    assert_eq!(order.status(), OrderStatus::Pending);
    assert!(order.id().is_none());
    assert!(order.fill().is_none());
}

#[cfg(test)]
#[test]
fn stamp_order_time() {
    let ts = DateTime::from_timestamp_secs(1515151515).unwrap();
    let order = Order::from(("ETH/USD", OrderType::Limit(50.0), 1.0, OrderSide::Sell)).at(ts);
    assert_eq!(order.timestamp(), ts);
    assert!(!order.order_type().is_market());
}

#[cfg(test)]
#[test]
fn filled_order_is_terminal() {
    let mut order = Order::from(("BTC/USD", OrderType::Market(100.0), 1.0, OrderSide::Buy));
    assert!(!order.status().is_terminal());

    order.set_filled(Fill {
        price: 100.05,
        quantity: 1.0,
        fee: 0.10005,
        slippage: 0.05,
    });
    assert_eq!(order.status(), OrderStatus::Filled);
    assert!(order.status().is_terminal());
    assert_eq!(order.fill().map(Fill::value), Some(100.05));
}

#[cfg(test)]
#[test]
fn order_type_wire_format() {
    let json = serde_json::to_string(&OrderType::Limit(99.5)).unwrap();
    assert_eq!(json, r#"{"type":"limit","price":99.5}"#);
    let status = serde_json::to_string(&OrderStatus::Cancelled).unwrap();
    assert_eq!(status, r#""cancelled""#);
}
