//! Progress callbacks for sync runs.

use super::orchestrator::SyncPhase;
use super::summary::FlowSummary;
use crate::domain::SourceKind;
use crate::normalize::SchemaError;
use crate::writer::CommitReport;
use chrono::NaiveDate;

/// Progress callback for sync runs.
pub trait SyncProgress: Sync {
    /// Called when a sub-flow enters a new phase.
    fn on_phase(&self, family: SourceKind, phase: SyncPhase);

    /// Called after each date is committed.
    fn on_committed(&self, family: SourceKind, date: NaiveDate, report: &CommitReport);

    /// Called when a catch-up date has no published snapshot.
    fn on_not_published(&self, family: SourceKind, date: NaiveDate);

    /// Called when a sub-batch fails its shape check.
    fn on_schema_failure(&self, family: SourceKind, date: NaiveDate, error: &SchemaError);

    /// Called when a sub-flow is done.
    fn on_flow_complete(&self, summary: &FlowSummary);
}

/// Silent reporter.
pub struct NoProgress;

impl SyncProgress for NoProgress {
    fn on_phase(&self, _family: SourceKind, _phase: SyncPhase) {}
    fn on_committed(&self, _family: SourceKind, _date: NaiveDate, _report: &CommitReport) {}
    fn on_not_published(&self, _family: SourceKind, _date: NaiveDate) {}
    fn on_schema_failure(&self, _family: SourceKind, _date: NaiveDate, _error: &SchemaError) {}
    fn on_flow_complete(&self, _summary: &FlowSummary) {}
}

/// Simple progress reporter that prints to stdout.
pub struct StdoutProgress;

impl SyncProgress for StdoutProgress {
    fn on_phase(&self, family: SourceKind, phase: SyncPhase) {
        if phase != SyncPhase::Done {
            println!("[{family}] {phase}");
        }
    }

    fn on_committed(&self, family: SourceKind, date: NaiveDate, report: &CommitReport) {
        let skipped = if report.skipped.is_empty() {
            String::new()
        } else {
            format!(", {} skipped", report.skipped.len())
        };
        println!(
            "  [{family}] {date}: {} written, {} already present{skipped}",
            report.written, report.already_present
        );
    }

    fn on_not_published(&self, family: SourceKind, date: NaiveDate) {
        println!("  [{family}] {date}: not published");
    }

    fn on_schema_failure(&self, family: SourceKind, date: NaiveDate, error: &SchemaError) {
        println!("  [{family}] {date}: FAIL {error}");
    }

    fn on_flow_complete(&self, summary: &FlowSummary) {
        println!(
            "[{}] done: {} dates committed, {} rows written",
            summary.family,
            summary.committed_dates.len(),
            summary.rows_written
        );
    }
}
