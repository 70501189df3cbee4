//! Record normalization: source column vocabulary → `CanonicalRow`.
//!
//! Strict at batch-shape granularity (a missing table or column fails the
//! sub-batch), lenient at row granularity (unreadable rows are dropped and
//! counted).

use crate::config::ConfigError;
use crate::domain::{CanonicalRow, Grouping, Ohlcv, RawTable, SubBatch};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Shape errors. Fatal for the offending sub-batch only.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("table '{table}' not found in archive")]
    MissingTable { table: String },

    #[error("table '{table}' is missing required columns: {}", columns.join(", "))]
    MissingColumns { table: String, columns: Vec<String> },

    #[error("table '{table}' could not be read: {message}")]
    Unreadable { table: String, message: String },
}

/// Source column names of the canonical fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ColumnMap {
    pub ticker: String,
    pub date: String,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: String,
    /// chrono format of the date column.
    pub date_format: String,
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            ticker: "<Ticker>".into(),
            date: "<DTYYYYMMDD>".into(),
            open: "<Open>".into(),
            high: "<High>".into(),
            low: "<Low>".into(),
            close: "<Close>".into(),
            volume: "<Volume>".into(),
            date_format: "%Y%m%d".into(),
        }
    }
}

impl ColumnMap {
    fn names(&self) -> [&str; 7] {
        [
            self.ticker.as_str(),
            self.date.as_str(),
            self.open.as_str(),
            self.high.as_str(),
            self.low.as_str(),
            self.close.as_str(),
            self.volume.as_str(),
        ]
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.names().iter().any(|n| n.trim().is_empty()) || self.date_format.is_empty() {
            return Err(ConfigError::Invalid(
                "normalize.columns entries must be non-empty".into(),
            ));
        }
        Ok(())
    }

    /// Resolve column positions against a header. Matching ignores case and
    /// surrounding whitespace.
    fn resolve(&self, table_name: &str, headers: &[String]) -> Result<ColumnIndex, SchemaError> {
        let find = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name.trim()))
        };

        let positions: Vec<Option<usize>> = self.names().into_iter().map(find).collect();
        let missing: Vec<String> = self
            .names()
            .into_iter()
            .zip(&positions)
            .filter(|(_, p)| p.is_none())
            .map(|(n, _)| n.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(SchemaError::MissingColumns {
                table: table_name.to_string(),
                columns: missing,
            });
        }

        let at = |i: usize| positions[i].unwrap_or_default();
        Ok(ColumnIndex {
            ticker: at(0),
            date: at(1),
            open: at(2),
            high: at(3),
            low: at(4),
            close: at(5),
            volume: at(6),
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct ColumnIndex {
    ticker: usize,
    date: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: usize,
}

/// Maps raw tables onto canonical rows.
#[derive(Debug, Clone, Default)]
pub struct RecordNormalizer {
    columns: ColumnMap,
    validate_ohlc: bool,
}

impl RecordNormalizer {
    pub fn new(columns: ColumnMap, validate_ohlc: bool) -> Self {
        Self {
            columns,
            validate_ohlc,
        }
    }

    /// Normalize one sub-batch. The returned iterator is lazy and yields rows
    /// in source order.
    pub fn normalize<'a>(&'a self, sub_batch: &'a SubBatch) -> Result<NormalizedRows<'a>, SchemaError> {
        let table = sub_batch
            .table
            .as_ref()
            .ok_or_else(|| SchemaError::MissingTable {
                table: sub_batch.table_name.clone(),
            })?;
        self.normalize_table(&sub_batch.table_name, table, &sub_batch.grouping)
    }

    pub fn normalize_table<'a>(
        &'a self,
        table_name: &str,
        table: &'a RawTable,
        grouping: &'a Grouping,
    ) -> Result<NormalizedRows<'a>, SchemaError> {
        if table.headers.iter().all(|h| h.is_empty()) {
            return Err(SchemaError::Unreadable {
                table: table_name.to_string(),
                message: "no header row".into(),
            });
        }
        let index = self.columns.resolve(table_name, &table.headers)?;
        Ok(NormalizedRows {
            records: table.records.iter(),
            index,
            grouping,
            date_format: &self.columns.date_format,
            validate_ohlc: self.validate_ohlc,
            dropped: 0,
        })
    }
}

/// Lazy sequence of canonical rows over one raw table.
pub struct NormalizedRows<'a> {
    records: std::slice::Iter<'a, Vec<String>>,
    index: ColumnIndex,
    grouping: &'a Grouping,
    date_format: &'a str,
    validate_ohlc: bool,
    dropped: usize,
}

impl NormalizedRows<'_> {
    /// Rows dropped so far because a field could not be read.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    fn parse(&self, record: &[String]) -> Option<CanonicalRow> {
        let field = |i: usize| record.get(i).map(|s| s.trim());

        let ticker = field(self.index.ticker).filter(|t| !t.is_empty())?;
        let date = parse_date(field(self.index.date)?, self.date_format)?;
        let bar = Ohlcv {
            open: parse_price(field(self.index.open)?)?,
            high: parse_price(field(self.index.high)?)?,
            low: parse_price(field(self.index.low)?)?,
            close: parse_price(field(self.index.close)?)?,
            volume: parse_volume(field(self.index.volume)?)?,
        };
        if self.validate_ohlc && !bar.is_sane() {
            return None;
        }

        let group_key = match self.grouping {
            Grouping::Fixed(group) => group.as_str(),
            Grouping::PerEntity => ticker,
        };
        Some(CanonicalRow::new(group_key, ticker, date, bar))
    }
}

impl Iterator for NormalizedRows<'_> {
    type Item = CanonicalRow;

    fn next(&mut self) -> Option<CanonicalRow> {
        loop {
            let record = self.records.next()?;
            match self.parse(record) {
                Some(row) => return Some(row),
                None => self.dropped += 1,
            }
        }
    }
}

/// Dates arrive as compact numbers; some exports render them as `20240102.0`.
fn parse_date(raw: &str, format: &str) -> Option<NaiveDate> {
    let raw = raw.strip_suffix(".0").unwrap_or(raw);
    NaiveDate::parse_from_str(raw, format).ok()
}

fn parse_price(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_volume(raw: &str) -> Option<u64> {
    if let Ok(v) = raw.parse::<u64>() {
        return Some(v);
    }
    let v = raw.parse::<f64>().ok()?;
    (v.is_finite() && v >= 0.0 && v.fract() == 0.0 && v <= u64::MAX as f64).then_some(v as u64)
}
