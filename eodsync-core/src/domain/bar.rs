//! CanonicalRow: the unit of storage and the unit of upsert.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// OHLCV values of one daily bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ohlcv {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl Ohlcv {
    /// Basic sanity check: high >= low, open/close inside the range, no negative prices.
    pub fn is_sane(&self) -> bool {
        self.high >= self.low
            && self.open >= self.low
            && self.open <= self.high
            && self.close >= self.low
            && self.close <= self.high
            && self.low >= 0.0
    }
}

/// One normalized daily bar for one entity inside one partition.
///
/// Fields are private: a row cannot be changed after the normalizer builds it,
/// and the writer takes rows by value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRow {
    group_key: String,
    entity_code: String,
    date: NaiveDate,
    bar: Ohlcv,
}

impl CanonicalRow {
    pub fn new(
        group_key: impl Into<String>,
        entity_code: impl Into<String>,
        date: NaiveDate,
        bar: Ohlcv,
    ) -> Self {
        Self {
            group_key: group_key.into(),
            entity_code: entity_code.into(),
            date,
            bar,
        }
    }

    pub fn group_key(&self) -> &str {
        &self.group_key
    }

    pub fn entity_code(&self) -> &str {
        &self.entity_code
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn bar(&self) -> &Ohlcv {
        &self.bar
    }

    pub fn open(&self) -> f64 {
        self.bar.open
    }

    pub fn high(&self) -> f64 {
        self.bar.high
    }

    pub fn low(&self) -> f64 {
        self.bar.low
    }

    pub fn close(&self) -> f64 {
        self.bar.close
    }

    pub fn volume(&self) -> u64 {
        self.bar.volume
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bar() -> Ohlcv {
        Ohlcv {
            open: 100.0,
            high: 105.0,
            low: 98.0,
            close: 103.0,
            volume: 50_000,
        }
    }

    #[test]
    fn bar_is_sane() {
        assert!(sample_bar().is_sane());
    }

    #[test]
    fn inverted_bar_is_not_sane() {
        let mut bar = sample_bar();
        bar.high = 90.0;
        assert!(!bar.is_sane());
    }

    #[test]
    fn negative_low_is_not_sane() {
        let mut bar = sample_bar();
        bar.low = -1.0;
        bar.open = -0.5;
        assert!(!bar.is_sane());
    }

    #[test]
    fn row_exposes_its_fields() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let row = CanonicalRow::new("HSX", "VNM", date, sample_bar());
        assert_eq!(row.group_key(), "HSX");
        assert_eq!(row.entity_code(), "VNM");
        assert_eq!(row.date(), date);
        assert_eq!(row.close(), 103.0);
        assert_eq!(row.volume(), 50_000);
    }
}
