use std::{fs, path::Path, path::PathBuf, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    engine::{LedgerConfig, RunOptions},
    errors::{Error, Result},
    strategy::SmaCrossover,
};

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "CANDLECORE_";

/// Application settings, read from TOML. Every key is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub initial_balance: f64,
    /// Fee rate, e.g. `0.001` for 0.1%.
    pub taker_fee: f64,
    pub maker_fee: f64,
    /// Basis points, e.g. `5` for 0.05%.
    pub slippage_bps: f64,
    pub symbol: String,
    /// JSON file of candles.
    pub data_source: PathBuf,
    /// Where checkpoints are written.
    pub state_directory: PathBuf,
    pub log_level: String,
    pub checkpoint_interval: usize,
    pub checkpoint_timeout_ms: u64,
    pub strategy: StrategyConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StrategyConfig {
    pub name: String,
    pub fast_period: usize,
    pub slow_period: usize,
    /// Quote amount invested per entry.
    pub position_size: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            initial_balance: 10_000.0,
            taker_fee: 0.001,
            maker_fee: 0.0005,
            slippage_bps: 5.0,
            symbol: "BTC/USD".into(),
            data_source: "data/candles.json".into(),
            state_directory: ".state".into(),
            log_level: "info".into(),
            checkpoint_interval: 10,
            checkpoint_timeout_ms: 5_000,
            strategy: StrategyConfig::default(),
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            name: "simple_ma".into(),
            fast_period: 10,
            slow_period: 30,
            position_size: 1_000.0,
        }
    }
}

impl Config {
    /// Reads `path` (defaults when it does not exist), applies the
    /// `CANDLECORE_*` environment overrides and validates the result.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            Self::parse(&fs::read_to_string(path)?)?
        } else {
            debug!(path = %path.display(), "no config file, using defaults");
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML document.
    pub fn parse(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    /// Overrides fields from `lookup`, which maps a full variable name to its value.
    ///
    /// Values that do not parse are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.trim().is_empty());

        set_parsed(&mut self.initial_balance, var("INITIAL_BALANCE"));
        set_parsed(&mut self.taker_fee, var("TAKER_FEE"));
        set_parsed(&mut self.maker_fee, var("MAKER_FEE"));
        set_parsed(&mut self.slippage_bps, var("SLIPPAGE_BPS"));
        set_parsed(&mut self.checkpoint_interval, var("CHECKPOINT_INTERVAL"));
        set_parsed(&mut self.strategy.fast_period, var("STRATEGY_FAST_PERIOD"));
        set_parsed(&mut self.strategy.slow_period, var("STRATEGY_SLOW_PERIOD"));
        set_parsed(&mut self.strategy.position_size, var("STRATEGY_POSITION_SIZE"));

        if let Some(v) = var("SYMBOL") {
            self.symbol = v;
        }
        if let Some(v) = var("DATA_SOURCE") {
            self.data_source = v.into();
        }
        if let Some(v) = var("STATE_DIR") {
            self.state_directory = v.into();
        }
        if let Some(v) = var("LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = var("STRATEGY_NAME") {
            self.strategy.name = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.ledger_config().validate()?;

        if self.symbol.trim().is_empty() {
            return Err(Error::Config("symbol must not be empty".into()));
        }
        if self.checkpoint_interval == 0 {
            return Err(Error::Config("checkpoint_interval must be at least 1".into()));
        }
        if self.strategy.name != "simple_ma" {
            return Err(Error::Config(format!("unknown strategy: {}", self.strategy.name)));
        }
        if self.strategy.fast_period == 0 || self.strategy.slow_period == 0 {
            return Err(Error::Config("strategy periods must be positive".into()));
        }
        if self.strategy.fast_period >= self.strategy.slow_period {
            return Err(Error::Config(format!(
                "fast_period ({}) must be less than slow_period ({})",
                self.strategy.fast_period, self.strategy.slow_period
            )));
        }
        if !self.strategy.position_size.is_finite() || self.strategy.position_size <= 0.0 {
            return Err(Error::Config("position_size must be positive".into()));
        }
        Ok(())
    }

    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            initial_balance: self.initial_balance,
            taker_fee: self.taker_fee,
            maker_fee: self.maker_fee,
            slippage_bps: self.slippage_bps,
        }
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            symbol: self.symbol.clone(),
            checkpoint_interval: self.checkpoint_interval,
            checkpoint_timeout: Duration::from_millis(self.checkpoint_timeout_ms),
        }
    }

    /// Builds the configured strategy.
    pub fn strategy(&self) -> Result<SmaCrossover> {
        SmaCrossover::new(
            self.symbol.clone(),
            self.strategy.fast_period,
            self.strategy.slow_period,
            self.strategy.position_size,
        )
    }
}

fn set_parsed<T: FromStr>(field: &mut T, value: Option<String>) {
    if let Some(parsed) = value.and_then(|v| v.trim().parse().ok()) {
        *field = parsed;
    }
}
