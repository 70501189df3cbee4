//! Snapshot batches: the transient result of one remote fetch.

use super::partition::SourceKind;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two publication conventions of a snapshot source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    /// Only the bars of the snapshot date.
    Eod,
    /// Every bar up to and including the snapshot date.
    Cumulative,
}

impl FetchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchMode::Eod => "eod",
            FetchMode::Cumulative => "cumulative",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "eod" => Some(FetchMode::Eod),
            "cumulative" => Some(FetchMode::Cumulative),
            _ => None,
        }
    }
}

impl fmt::Display for FetchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How rows of a sub-batch map onto partitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grouping {
    /// Every row belongs to the same group (e.g. one exchange per table).
    Fixed(String),
    /// Each entity is its own group (e.g. one partition per market index).
    PerEntity,
}

/// A delimited table as read from the archive: header plus raw records.
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub records: Vec<Vec<String>>,
}

impl RawTable {
    /// Parse a comma-delimited table. Ragged records are kept; the normalizer
    /// drops the ones it cannot read. Invalid UTF-8 is replaced rather than
    /// rejected, so only I/O failures are errors.
    pub fn from_csv<R: std::io::Read>(reader: R) -> Result<Self, csv::Error> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = lossy_fields(rdr.byte_headers()?);
        let mut records = Vec::new();
        for record in rdr.byte_records() {
            records.push(lossy_fields(&record?));
        }
        Ok(Self { headers, records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn lossy_fields(record: &csv::ByteRecord) -> Vec<String> {
    record
        .iter()
        .map(|field| String::from_utf8_lossy(field).into_owned())
        .collect()
}

/// One sub-source inside a snapshot (one exchange table, or the index table).
#[derive(Debug, Clone)]
pub struct SubBatch {
    /// File name the table was expected under.
    pub table_name: String,
    pub grouping: Grouping,
    /// `None` when the archive did not contain the expected table.
    pub table: Option<RawTable>,
}

/// Result of one remote fetch. Owned by the orchestrator for one fetch cycle.
#[derive(Debug, Clone)]
pub struct SnapshotBatch {
    pub family: SourceKind,
    pub fetch_date: NaiveDate,
    pub mode: FetchMode,
    pub sub_batches: Vec<SubBatch>,
}

impl SnapshotBatch {
    /// Total raw records across all sub-batches.
    pub fn record_count(&self) -> usize {
        self.sub_batches
            .iter()
            .filter_map(|s| s.table.as_ref())
            .map(RawTable::len)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_table_reads_headers_and_records() {
        let csv = "<Ticker>,<DTYYYYMMDD>,<Open>\nVNM, 20240102 ,70.5\nFPT,20240102,95\n";
        let table = RawTable::from_csv(csv.as_bytes()).unwrap();
        assert_eq!(table.headers, vec!["<Ticker>", "<DTYYYYMMDD>", "<Open>"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.records[0][1], "20240102");
    }

    #[test]
    fn raw_table_keeps_ragged_records() {
        let csv = "a,b,c\n1,2\n1,2,3\n";
        let table = RawTable::from_csv(csv.as_bytes()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.records[0].len(), 2);
    }

    #[test]
    fn raw_table_replaces_invalid_utf8() {
        let bytes = b"<Ticker>,<Open>\nV\xffM,1\n";
        let table = RawTable::from_csv(&bytes[..]).unwrap();
        assert_eq!(table.records[0][0], "V\u{fffd}M");
    }

    #[test]
    fn record_count_skips_missing_tables() {
        let batch = SnapshotBatch {
            family: SourceKind::Transaction,
            fetch_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            mode: FetchMode::Eod,
            sub_batches: vec![
                SubBatch {
                    table_name: "a.csv".into(),
                    grouping: Grouping::Fixed("HNX".into()),
                    table: Some(RawTable {
                        headers: vec!["x".into()],
                        records: vec![vec!["1".into()], vec!["2".into()]],
                    }),
                },
                SubBatch {
                    table_name: "b.csv".into(),
                    grouping: Grouping::Fixed("HSX".into()),
                    table: None,
                },
            ],
        };
        assert_eq!(batch.record_count(), 2);
    }
}
