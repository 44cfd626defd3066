use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// Immutable OHLCV sample.
///
/// Always satisfies `low <= open, close <= high`; build it through [`CandleBuilder`].
/// Deserialization goes through the same validation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CandleRecord")]
pub struct Candle {
    timestamp: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

impl Candle {
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn open(&self) -> f64 {
        self.open
    }

    pub fn high(&self) -> f64 {
        self.high
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn close(&self) -> f64 {
        self.close
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }
}

// Unvalidated wire shape: `{timestamp, open, high, low, close, volume}`.
#[derive(Deserialize)]
struct CandleRecord {
    timestamp: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
}

impl TryFrom<CandleRecord> for Candle {
    type Error = Error;

    fn try_from(record: CandleRecord) -> Result<Self> {
        CandleBuilder::builder()
            .timestamp(record.timestamp)
            .open(record.open)
            .high(record.high)
            .low(record.low)
            .close(record.close)
            .volume(record.volume)
            .build()
    }
}

/// Fluent builder for [`Candle`].
#[derive(Debug, Default)]
pub struct CandleBuilder {
    timestamp: Option<DateTime<Utc>>,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    volume: Option<f64>,
}

impl CandleBuilder {
    pub fn builder() -> Self {
        Self::default()
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn open(mut self, open: f64) -> Self {
        self.open = Some(open);
        self
    }

    pub fn high(mut self, high: f64) -> Self {
        self.high = Some(high);
        self
    }

    pub fn low(mut self, low: f64) -> Self {
        self.low = Some(low);
        self
    }

    pub fn close(mut self, close: f64) -> Self {
        self.close = Some(close);
        self
    }

    pub fn volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }

    /// Validates the OHLC envelope and returns the candle.
    pub fn build(self) -> Result<Candle> {
        let missing = |field: &str| Error::InvalidCandle(format!("missing {field}"));

        let open = self.open.ok_or_else(|| missing("open"))?;
        let high = self.high.ok_or_else(|| missing("high"))?;
        let low = self.low.ok_or_else(|| missing("low"))?;
        let close = self.close.ok_or_else(|| missing("close"))?;
        let volume = self.volume.unwrap_or(0.0);
        let timestamp = self.timestamp.unwrap_or_default();

        if [open, high, low, close, volume].iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidCandle("non-finite value".into()));
        }
        if low > high {
            return Err(Error::InvalidCandle(format!("low ({low}) above high ({high})")));
        }
        if open < low || open > high {
            return Err(Error::InvalidCandle(format!("open ({open}) outside [{low}, {high}]")));
        }
        if close < low || close > high {
            return Err(Error::InvalidCandle(format!("close ({close}) outside [{low}, {high}]")));
        }
        if volume < 0.0 {
            return Err(Error::InvalidCandle(format!("negative volume ({volume})")));
        }

        Ok(Candle {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        })
    }
}

#[cfg(test)]
#[test]
fn build_valid_candle() {
    let ts = DateTime::from_timestamp_secs(1515151515).unwrap();
    let candle = CandleBuilder::builder()
        .timestamp(ts)
        .open(100.0)
        .high(110.0)
        .low(95.0)
        .close(105.0)
        .volume(12.5)
        .build()
        .unwrap();

    assert_eq!(candle.timestamp(), ts);
    assert_eq!(candle.open(), 100.0);
    assert_eq!(candle.high(), 110.0);
    assert_eq!(candle.low(), 95.0);
    assert_eq!(candle.close(), 105.0);
    assert_eq!(candle.volume(), 12.5);
}

#[cfg(test)]
#[test]
fn reject_close_outside_range() {
    let result = CandleBuilder::builder()
        .open(100.0)
        .high(110.0)
        .low(95.0)
        .close(111.0)
        .build();
    assert!(matches!(result, Err(Error::InvalidCandle(_))));
}

#[cfg(test)]
#[test]
fn reject_inverted_range() {
    let result = CandleBuilder::builder()
        .open(100.0)
        .high(90.0)
        .low(95.0)
        .close(92.0)
        .build();
    assert!(matches!(result, Err(Error::InvalidCandle(_))));
}

#[cfg(test)]
#[test]
fn reject_missing_and_non_finite() {
    let result = CandleBuilder::builder().open(1.0).high(1.0).low(1.0).build();
    assert!(matches!(result, Err(Error::InvalidCandle(_))));

    let result = CandleBuilder::builder()
        .open(f64::NAN)
        .high(1.0)
        .low(1.0)
        .close(1.0)
        .build();
    assert!(matches!(result, Err(Error::InvalidCandle(_))));
}

#[cfg(test)]
#[test]
fn deserialize_validates() {
    let ok = r#"{"timestamp":"2024-01-01T00:00:00Z","open":100.0,"high":101.0,"low":99.0,"close":100.5,"volume":3.0}"#;
    let candle: Candle = serde_json::from_str(ok).unwrap();
    assert_eq!(candle.close(), 100.5);

    let bad = r#"{"timestamp":"2024-01-01T00:00:00Z","open":100.0,"high":101.0,"low":99.0,"close":120.0}"#;
    assert!(serde_json::from_str::<Candle>(bad).is_err());
}
