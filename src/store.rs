//! Checkpoint storage for the ledger.
//!
//! A [`StateStore`] saves and restores [`LedgerSnapshot`]s. Loading is
//! best-effort at startup: a failure leaves the ledger in its fresh state.

use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

use parking_lot::Mutex;
use tracing::debug;

use crate::{
    engine::{Ledger, LedgerSnapshot},
    errors::{Error, Result},
    utils::new_id,
};

/// Persists and restores ledger state.
pub trait StateStore: Send + Sync {
    /// Saves the current state of `ledger`.
    fn save_state(&self, ledger: &Ledger) -> Result<()>;

    /// Replaces the state of `ledger` with the last saved one.
    fn load_state(&self, ledger: &Ledger) -> Result<()>;
}

/// Stores the snapshot as `ledger.json` in a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// File name of the snapshot inside the state directory.
    pub const FILE_NAME: &'static str = "ledger.json";

    /// Creates the store, creating `dir` if needed.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| Error::Persistence(format!("cannot create {}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    /// Path of the snapshot file.
    pub fn path(&self) -> PathBuf {
        self.dir.join(Self::FILE_NAME)
    }
}

impl StateStore for FileStore {
    fn save_state(&self, ledger: &Ledger) -> Result<()> {
        let snapshot = ledger.snapshot();
        let path = self.path();
        let tmp = self.dir.join(format!("{}.{}.tmp", Self::FILE_NAME, new_id()));

        // the snapshot file is only ever replaced whole, each writer from its own temp file
        let mut writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer_pretty(&mut writer, &snapshot)?;
        writer.flush()?;
        drop(writer);
        fs::rename(&tmp, &path)?;

        debug!(path = %path.display(), trades = snapshot.trades.len(), "state saved");
        Ok(())
    }

    fn load_state(&self, ledger: &Ledger) -> Result<()> {
        let path = self.path();
        if !path.exists() {
            return Err(Error::Persistence(format!("no saved state at {}", path.display())));
        }

        let reader = BufReader::new(File::open(&path)?);
        let snapshot: LedgerSnapshot = serde_json::from_reader(reader)?;
        ledger.restore(snapshot)
    }
}

/// Keeps the last snapshot in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slot: Mutex<Option<LedgerSnapshot>>,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful saves.
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// The last saved snapshot.
    pub fn snapshot(&self) -> Option<LedgerSnapshot> {
        self.slot.lock().clone()
    }
}

impl StateStore for MemoryStore {
    fn save_state(&self, ledger: &Ledger) -> Result<()> {
        *self.slot.lock() = Some(ledger.snapshot());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn load_state(&self, ledger: &Ledger) -> Result<()> {
        let snapshot = self
            .slot
            .lock()
            .clone()
            .ok_or_else(|| Error::Persistence("no saved state".into()))?;
        ledger.restore(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use super::*;
    use crate::engine::*;

    fn temp_dir() -> PathBuf {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!("candlecore-store-{}-{id}", std::process::id()))
    }

    fn traded_ledger() -> Ledger {
        let ledger = Ledger::new(LedgerConfig::default()).unwrap();
        ledger.update_market_price("BTC/USD", 100.0);
        let mut buy = Order::from(("BTC/USD", OrderType::Market(0.0), 3.0, OrderSide::Buy));
        ledger.place_order(&mut buy).unwrap();
        let mut sell = Order::from(("BTC/USD", OrderType::Market(0.0), 1.0, OrderSide::Sell));
        ledger.place_order(&mut sell).unwrap();
        ledger
    }

    #[test]
    fn file_store_round_trip() {
        let dir = temp_dir();
        let store = FileStore::new(&dir).unwrap();
        let source = traded_ledger();
        store.save_state(&source).unwrap();
        assert!(store.path().exists());
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 1);

        let target = Ledger::new(LedgerConfig::default()).unwrap();
        store.load_state(&target).unwrap();
        assert_eq!(target.balance(), source.balance());
        assert_eq!(target.position("BTC/USD"), source.position("BTC/USD"));
        assert_eq!(target.trades(), source.trades());

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn file_store_concurrent_saves() {
        let dir = temp_dir();
        let store = FileStore::new(&dir).unwrap();
        let source = traded_ledger();

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| store.save_state(&source).unwrap());
            }
        });

        let names: Vec<_> = fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec![FileStore::FILE_NAME.to_owned()]);

        let target = Ledger::new(LedgerConfig::default()).unwrap();
        store.load_state(&target).unwrap();
        assert_eq!(target.balance(), source.balance());

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn file_store_missing_state() {
        let dir = temp_dir();
        let store = FileStore::new(&dir).unwrap();
        let ledger = Ledger::new(LedgerConfig::default()).unwrap();

        let err = store.load_state(&ledger).unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
        assert_eq!(ledger.balance(), 10_000.0);

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn file_store_corrupt_state() {
        let dir = temp_dir();
        let store = FileStore::new(&dir).unwrap();
        fs::write(store.path(), "{ not json").unwrap();

        let ledger = Ledger::new(LedgerConfig::default()).unwrap();
        let err = store.load_state(&ledger).unwrap_err();
        assert!(err.is_persistence());
        assert_eq!(ledger.balance(), 10_000.0);

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn memory_store_counts_saves() {
        let store = MemoryStore::new();
        let ledger = Ledger::new(LedgerConfig::default()).unwrap();
        assert!(store.load_state(&ledger).is_err());

        let source = traded_ledger();
        store.save_state(&source).unwrap();
        store.save_state(&source).unwrap();
        assert_eq!(store.saves(), 2);

        store.load_state(&ledger).unwrap();
        assert_eq!(ledger.balance(), source.balance());
        assert_eq!(store.snapshot().map(|s| s.trades.len()), Some(1));
    }
}
