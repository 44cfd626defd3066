use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

/// What a strategy wants done on the current candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub action: SignalAction,
    pub symbol: String,
    pub quantity: f64,
    pub reason: String,
}

impl Signal {
    pub fn buy(symbol: impl Into<String>, quantity: f64, reason: impl Into<String>) -> Self {
        Self {
            action: SignalAction::Buy,
            symbol: symbol.into(),
            quantity,
            reason: reason.into(),
        }
    }

    pub fn sell(symbol: impl Into<String>, quantity: f64, reason: impl Into<String>) -> Self {
        Self {
            action: SignalAction::Sell,
            symbol: symbol.into(),
            quantity,
            reason: reason.into(),
        }
    }

    /// A signal that produces no order.
    pub fn hold(symbol: impl Into<String>) -> Self {
        Self {
            action: SignalAction::Hold,
            symbol: symbol.into(),
            quantity: 0.0,
            reason: String::new(),
        }
    }
}
