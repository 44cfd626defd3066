pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The candle data provided is empty.
    #[error("Candle data is empty: at least one candle is required")]
    CandleDataEmpty,

    /// A candle violates `low <= open, close <= high` or holds a non-finite value.
    #[error("Invalid candle: {0}")]
    InvalidCandle(String),

    /// The initial or restored balance is not positive.
    #[error("Balance must be positive (got: {0})")]
    NegZeroBalance(f64),

    /// The order was rejected before any state mutation (bad quantity, symbol or price).
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    /// The ledger does not hold enough cash to pay for the fill and its fee.
    #[error("Insufficient balance: required {required:.8}, available {available:.8}")]
    InsufficientBalance {
        /// Execution value plus fee.
        required: f64,
        /// Cash balance at the time of the check.
        available: f64,
    },

    /// No pending order carries this identifier.
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// A state store could not save or restore the ledger.
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// The strategy failed in a way that must stop the run.
    #[error("Strategy failure: {0}")]
    Strategy(String),

    /// The configuration is invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error occurred.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// TOML configuration could not be parsed.
    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),
}

impl Error {
    /// Returns true for failures raised while saving or loading ledger state.
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::IoError(_) | Self::JsonError(_))
    }

    /// Returns true for order errors the backtest loop recovers from.
    pub fn is_order_rejection(&self) -> bool {
        matches!(self, Self::InvalidOrder(_) | Self::InsufficientBalance { .. })
    }
}

#[cfg(test)]
#[test]
fn classify_errors() {
    let io = std::io::Error::other("disk full");
    assert!(Error::from(io).is_persistence());
    assert!(Error::Persistence("timeout".into()).is_persistence());
    assert!(!Error::Strategy("boom".into()).is_persistence());

    assert!(Error::InvalidOrder("qty".into()).is_order_rejection());
    assert!(
        Error::InsufficientBalance {
            required: 2.0,
            available: 1.0
        }
        .is_order_rejection()
    );
    assert!(!Error::OrderNotFound("x".into()).is_order_rejection());
}

#[cfg(test)]
#[test]
fn display_insufficient_balance() {
    let err = Error::InsufficientBalance {
        required: 110.11,
        available: 100.0,
    };
    assert_eq!(
        err.to_string(),
        "Insufficient balance: required 110.11000000, available 100.00000000"
    );
}
