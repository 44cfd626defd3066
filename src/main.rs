use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use anyhow::{Context, Result, bail};
use candlecore::prelude::*;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn setup_logging(level: &str) {
    let filter = EnvFilter::try_from_env("CANDLECORE_LOG").unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .try_init()
        .ok();
}

fn main() -> Result<()> {
    let config_path = std::env::var("CANDLECORE_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let config = Config::load(&config_path).with_context(|| format!("loading {config_path}"))?;
    setup_logging(&config.log_level);

    let candles = load_candles(&config.data_source)
        .with_context(|| format!("loading candles from {}", config.data_source.display()))?;
    info!(candles = candles.len(), source = %config.data_source.display(), "candles loaded");

    let ledger = Arc::new(Ledger::new(config.ledger_config())?);
    let store = Arc::new(FileStore::new(&config.state_directory)?);
    let mut backtest = Backtest::new(ledger, config.strategy()?, store, config.run_options())?;
    backtest.restore();

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .context("installing Ctrl-C handler")?;

    let report = backtest.run_with_control(&candles, &*cancel)?;
    info!(
        processed = report.processed,
        filled = report.orders_filled,
        rejected = report.orders_rejected,
        ignored = report.signals_ignored,
        checkpoints = report.checkpoints,
        "run finished"
    );

    #[cfg(feature = "metrics")]
    println!("{}", Metrics::from(&backtest));

    match report.outcome {
        RunOutcome::Completed => Ok(()),
        RunOutcome::Cancelled => {
            info!(processed = report.processed, "cancelled by user");
            Ok(())
        }
        RunOutcome::Failed(err) => {
            error!(processed = report.processed, error = %err, "backtest failed");
            bail!("backtest failed after {} candles: {err}", report.processed)
        }
    }
}
