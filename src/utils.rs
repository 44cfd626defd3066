use std::{fs::File, io::BufReader, path::Path};

use crate::{
    engine::Candle,
    errors::{Error, Result},
};

/// Reads candles from `path`, a JSON array of
/// `{timestamp, open, high, low, close, volume}` records.
///
/// Every record goes through [`crate::engine::CandleBuilder`] validation.
pub fn load_candles(path: impl AsRef<Path>) -> Result<Vec<Candle>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let candles: Vec<Candle> = serde_json::from_reader(reader)?;
    if candles.is_empty() {
        return Err(Error::CandleDataEmpty);
    }
    Ok(candles)
}

/// Generates a random ID.
pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
#[test]
fn load_candles_from_file() {
    let path = std::env::temp_dir().join(format!("candlecore-candles-{}.json", std::process::id()));
    std::fs::write(
        &path,
        r#"[
            {"timestamp":"2024-01-01T00:00:00Z","open":100.0,"high":102.0,"low":99.0,"close":101.0,"volume":5.0},
            {"timestamp":"2024-01-01T00:01:00Z","open":101.0,"high":103.0,"low":100.0,"close":102.5}
        ]"#,
    )
    .unwrap();

    let candles = load_candles(&path).unwrap();
    assert_eq!(candles.len(), 2);
    assert_eq!(candles[1].close(), 102.5);
    assert_eq!(candles[1].volume(), 0.0);

    std::fs::write(&path, "[]").unwrap();
    assert!(matches!(load_candles(&path), Err(Error::CandleDataEmpty)));

    std::fs::remove_file(path).unwrap();
}

#[cfg(test)]
#[test]
fn ids_are_unique() {
    assert_ne!(new_id(), new_id());
}
