//! Idempotent, row-isolated commits through the store boundary.

use crate::domain::{CanonicalRow, SourceKind};
use crate::store::{BarStore, RowOutcome, StoreError};
use std::fmt;
use tracing::warn;

/// Why a row was not written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SkipReason {
    /// The row references an entity the registry does not know.
    UnknownEntity,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UnknownEntity => f.write_str("unknown entity"),
        }
    }
}

/// Outcome of one commit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitReport {
    pub written: usize,
    pub already_present: usize,
    pub skipped: Vec<(CanonicalRow, SkipReason)>,
}

impl CommitReport {
    pub fn total(&self) -> usize {
        self.written + self.already_present + self.skipped.len()
    }
}

pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Passes rows to the store in chunks and sorts the per-row outcomes.
pub struct UpsertWriter<'a> {
    store: &'a dyn BarStore,
    chunk_size: usize,
}

impl<'a> UpsertWriter<'a> {
    pub fn new(store: &'a dyn BarStore) -> Self {
        Self::with_chunk_size(store, DEFAULT_CHUNK_SIZE)
    }

    /// A chunk size of zero is treated as one.
    pub fn with_chunk_size(store: &'a dyn BarStore, chunk_size: usize) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Commit `rows` for `kind`. Rows already stored are no-ops; rows for
    /// unknown entities are skipped without aborting the batch. Any other
    /// store failure propagates; chunks committed before it stay committed.
    pub fn commit(
        &self,
        kind: SourceKind,
        rows: Vec<CanonicalRow>,
    ) -> Result<CommitReport, StoreError> {
        let mut report = CommitReport::default();
        let mut rows = rows.into_iter();

        loop {
            let chunk: Vec<CanonicalRow> = rows.by_ref().take(self.chunk_size).collect();
            if chunk.is_empty() {
                break;
            }

            let outcomes = self.store.insert_or_ignore(kind, &chunk)?;
            if outcomes.len() != chunk.len() {
                return Err(StoreError::Backend(format!(
                    "store returned {} outcomes for {} rows",
                    outcomes.len(),
                    chunk.len()
                )));
            }

            for (row, outcome) in chunk.into_iter().zip(outcomes) {
                match outcome {
                    RowOutcome::Inserted => report.written += 1,
                    RowOutcome::AlreadyPresent => report.already_present += 1,
                    RowOutcome::UnknownEntity => {
                        warn!(
                            %kind,
                            group = row.group_key(),
                            entity = row.entity_code(),
                            date = %row.date(),
                            "skipping row for unknown entity"
                        );
                        report.skipped.push((row, SkipReason::UnknownEntity));
                    }
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Ohlcv;
    use crate::store::MemoryStore;
    use chrono::NaiveDate;

    fn row(code: &str) -> CanonicalRow {
        CanonicalRow::new(
            "HSX",
            code,
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            Ohlcv {
                open: 1.0,
                high: 2.0,
                low: 0.5,
                close: 1.5,
                volume: 100,
            },
        )
    }

    fn five_rows() -> Vec<CanonicalRow> {
        ["AAA", "BBB", "CCC", "DDD", "EEE"].into_iter().map(row).collect()
    }

    #[test]
    fn unknown_row_is_skipped_others_written() {
        let store = MemoryStore::new()
            .with_registry(SourceKind::Transaction, ["AAA", "BBB", "DDD", "EEE"]);
        let writer = UpsertWriter::new(&store);

        let report = writer.commit(SourceKind::Transaction, five_rows()).unwrap();
        assert_eq!(report.written, 4);
        assert_eq!(report.already_present, 0);
        assert_eq!(report.skipped, vec![(row("CCC"), SkipReason::UnknownEntity)]);
    }

    #[test]
    fn second_commit_is_a_no_op() {
        let store = MemoryStore::new();
        let writer = UpsertWriter::new(&store);

        let first = writer.commit(SourceKind::Transaction, five_rows()).unwrap();
        let second = writer.commit(SourceKind::Transaction, five_rows()).unwrap();
        assert_eq!(first.written, 5);
        assert_eq!(second.written, 0);
        assert_eq!(second.already_present, 5);
        assert_eq!(store.row_count(), 5);
    }

    #[test]
    fn rows_are_chunked() {
        let store = MemoryStore::new();
        let writer = UpsertWriter::with_chunk_size(&store, 2);
        let report = writer.commit(SourceKind::Transaction, five_rows()).unwrap();
        assert_eq!(report.total(), 5);
        assert_eq!(store.insert_calls(), 3);
    }

    #[test]
    fn empty_commit_touches_nothing() {
        let store = MemoryStore::new();
        let report = UpsertWriter::new(&store)
            .commit(SourceKind::Index, Vec::new())
            .unwrap();
        assert_eq!(report, CommitReport::default());
        assert_eq!(store.insert_calls(), 0);
    }

    #[test]
    fn fatal_error_keeps_earlier_chunks() {
        let store = MemoryStore::new();
        store.fail_after(3);
        let writer = UpsertWriter::with_chunk_size(&store, 2);

        let err = writer.commit(SourceKind::Transaction, five_rows()).unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        assert_eq!(store.row_count(), 3);
    }

    #[test]
    fn zero_chunk_size_is_clamped() {
        let store = MemoryStore::new();
        let writer = UpsertWriter::with_chunk_size(&store, 0);
        writer.commit(SourceKind::Transaction, five_rows()).unwrap();
        assert_eq!(store.insert_calls(), 5);
    }
}
