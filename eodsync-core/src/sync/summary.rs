//! Run summaries: what each sub-flow committed, skipped and failed on.

use crate::domain::SourceKind;
use crate::normalize::SchemaError;
use crate::writer::{CommitReport, SkipReason};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};

/// A sub-batch that failed its shape check.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaFailure {
    pub date: NaiveDate,
    pub table: String,
    pub error: SchemaError,
}

/// Outcome of one family's sub-flow.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowSummary {
    pub family: SourceKind,
    /// Date of the cumulative snapshot the bootstrap probe found, if it ran.
    pub bootstrapped_from: Option<NaiveDate>,
    /// Dates committed, in commit order.
    pub committed_dates: Vec<NaiveDate>,
    /// Catch-up dates the source has not published (weekends, holidays, or
    /// not yet available).
    pub not_published: Vec<NaiveDate>,
    /// Dates of snapshots fetched again because an earlier run rejected one
    /// of their sub-batches.
    pub retried_dates: Vec<NaiveDate>,
    pub schema_failures: Vec<SchemaFailure>,
    pub rows_written: usize,
    pub rows_already_present: usize,
    /// Rows the normalizer could not read.
    pub rows_dropped: usize,
    pub skipped: BTreeMap<SkipReason, usize>,
    /// Distinct entity codes among skipped rows.
    pub skipped_entities: BTreeSet<String>,
}

impl FlowSummary {
    pub fn new(family: SourceKind) -> Self {
        Self {
            family,
            bootstrapped_from: None,
            committed_dates: Vec::new(),
            not_published: Vec::new(),
            retried_dates: Vec::new(),
            schema_failures: Vec::new(),
            rows_written: 0,
            rows_already_present: 0,
            rows_dropped: 0,
            skipped: BTreeMap::new(),
            skipped_entities: BTreeSet::new(),
        }
    }

    pub fn record_commit(&mut self, date: NaiveDate, report: CommitReport) {
        self.committed_dates.push(date);
        self.rows_written += report.written;
        self.rows_already_present += report.already_present;
        for (row, reason) in report.skipped {
            *self.skipped.entry(reason).or_default() += 1;
            self.skipped_entities.insert(row.entity_code().to_string());
        }
    }

    pub fn rows_skipped(&self) -> usize {
        self.skipped.values().sum()
    }

    /// Newest committed date of this run.
    pub fn last_committed(&self) -> Option<NaiveDate> {
        self.committed_dates.iter().max().copied()
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub flows: Vec<FlowSummary>,
}

impl RunSummary {
    pub fn flow(&self, family: SourceKind) -> Option<&FlowSummary> {
        self.flows.iter().find(|f| f.family == family)
    }

    pub fn rows_written(&self) -> usize {
        self.flows.iter().map(|f| f.rows_written).sum()
    }

    pub fn schema_failures(&self) -> usize {
        self.flows.iter().map(|f| f.schema_failures.len()).sum()
    }

    /// True when no sub-batch failed and no row was skipped or dropped.
    pub fn is_clean(&self) -> bool {
        self.flows.iter().all(|f| {
            f.schema_failures.is_empty() && f.rows_skipped() == 0 && f.rows_dropped == 0
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CanonicalRow, Ohlcv};

    fn row(code: &str) -> CanonicalRow {
        CanonicalRow::new(
            "HSX",
            code,
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            Ohlcv {
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: 1.0,
                volume: 1,
            },
        )
    }

    #[test]
    fn commits_accumulate() {
        let mut flow = FlowSummary::new(SourceKind::Transaction);
        let d2 = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let d3 = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();
        flow.record_commit(
            d2,
            CommitReport {
                written: 3,
                already_present: 1,
                skipped: vec![
                    (row("XXX"), SkipReason::UnknownEntity),
                    (row("XXX"), SkipReason::UnknownEntity),
                ],
            },
        );
        flow.record_commit(
            d3,
            CommitReport {
                written: 2,
                ..Default::default()
            },
        );

        assert_eq!(flow.committed_dates, vec![d2, d3]);
        assert_eq!(flow.rows_written, 5);
        assert_eq!(flow.rows_skipped(), 2);
        assert_eq!(flow.skipped_entities.len(), 1);
        assert_eq!(flow.last_committed(), Some(d3));

        let run = RunSummary { flows: vec![flow] };
        assert_eq!(run.rows_written(), 5);
        assert!(!run.is_clean());
        assert!(run.flow(SourceKind::Index).is_none());
    }
}
