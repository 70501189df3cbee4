//! The sync state machine.
//!
//! Each family runs as its own sub-flow:
//!
//! ```text
//! BootstrapProbe ──► Backfill ──► Catchup ──► Done
//!        ▲                          ▲
//!  store empty or repair      store non-empty
//! ```
//!
//! - **BootstrapProbe** walks backward from today, fetching the cumulative
//!   snapshot, until one exists. The walk is bounded; running out of days is
//!   fatal.
//! - **Backfill** commits every date of that snapshot the store is missing,
//!   oldest first.
//! - **Catchup** first fetches again every snapshot an earlier run rejected a
//!   sub-batch of, then the end-of-day snapshot of every date after the
//!   newest stored one, through today. Unpublished dates are recorded and
//!   skipped.
//!
//! Transport and store failures abort the run. A sub-batch with a bad shape
//! aborts only itself, and its snapshot is kept pending in the store until a
//! later fetch of it goes through cleanly. A bad row never aborts anything.

use super::progress::{NoProgress, SyncProgress};
use super::summary::{FlowSummary, RunSummary, SchemaFailure};
use crate::config::{BootstrapConfig, SyncConfig};
use crate::domain::{CanonicalRow, FetchMode, Partition, SnapshotBatch, SourceKind};
use crate::gap::GapDetector;
use crate::normalize::RecordNormalizer;
use crate::source::{FetchError, ScratchDir, SnapshotSource};
use crate::store::{BarStore, PendingSnapshot, StoreError};
use crate::writer::UpsertWriter;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Run-level failures.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("fetch failed: {0}")]
    Transport(#[source] FetchError),

    #[error("no cumulative {family} snapshot published between {oldest} and {newest}")]
    BootstrapExhausted {
        family: SourceKind,
        newest: NaiveDate,
        oldest: NaiveDate,
    },

    #[error("store failed: {0}")]
    Store(#[from] StoreError),

    #[error("scratch directory unavailable: {0}")]
    Scratch(#[source] std::io::Error),
}

impl From<FetchError> for SyncError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Scratch(io) => SyncError::Scratch(io),
            other => SyncError::Transport(other),
        }
    }
}

/// Phases of a sub-flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    BootstrapProbe,
    Backfill,
    Catchup,
    Done,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncPhase::BootstrapProbe => "bootstrap probe",
            SyncPhase::Backfill => "backfill",
            SyncPhase::Catchup => "catch-up",
            SyncPhase::Done => "done",
        })
    }
}

static NO_PROGRESS: NoProgress = NoProgress;

/// Drives the sub-flows of one run.
pub struct SyncOrchestrator<'a> {
    source: &'a dyn SnapshotSource,
    store: &'a dyn BarStore,
    normalizer: RecordNormalizer,
    scratch_root: PathBuf,
    bootstrap: BootstrapConfig,
    chunk_size: usize,
    families: Vec<SourceKind>,
    repair: bool,
    progress: &'a dyn SyncProgress,
}

impl<'a> SyncOrchestrator<'a> {
    pub fn new(
        config: &SyncConfig,
        source: &'a dyn SnapshotSource,
        store: &'a dyn BarStore,
    ) -> Self {
        Self {
            source,
            store,
            normalizer: RecordNormalizer::new(
                config.normalize.columns.clone(),
                config.normalize.validate_ohlc,
            ),
            scratch_root: config.scratch.dir.clone(),
            bootstrap: config.bootstrap.clone(),
            chunk_size: config.writer.chunk_size,
            families: config.enabled_families(),
            repair: false,
            progress: &NO_PROGRESS,
        }
    }

    /// Restrict the run to these families, in this order.
    pub fn with_families(mut self, families: Vec<SourceKind>) -> Self {
        self.families = families;
        self
    }

    /// Backfill from a cumulative snapshot even when the store is non-empty,
    /// filling interior gaps.
    pub fn with_repair(mut self, repair: bool) -> Self {
        self.repair = repair;
        self
    }

    pub fn with_progress(mut self, progress: &'a dyn SyncProgress) -> Self {
        self.progress = progress;
        self
    }

    /// Sync every selected family through today's local date.
    pub fn work(&self) -> Result<RunSummary, SyncError> {
        self.work_as_of(chrono::Local::now().date_naive())
    }

    /// Sync every selected family, treating `today` as the current date.
    pub fn work_as_of(&self, today: NaiveDate) -> Result<RunSummary, SyncError> {
        let scratch = ScratchDir::acquire(&self.scratch_root).map_err(SyncError::Scratch)?;
        info!(
            %today,
            scratch = %scratch.path().display(),
            source = self.source.name(),
            repair = self.repair,
            "sync started"
        );

        let mut summary = RunSummary::default();
        for &family in &self.families {
            let flow = self.run_flow(family, today, scratch.path())?;
            self.progress.on_flow_complete(&flow);
            summary.flows.push(flow);
        }
        Ok(summary)
    }

    fn run_flow(
        &self,
        family: SourceKind,
        today: NaiveDate,
        scratch: &Path,
    ) -> Result<FlowSummary, SyncError> {
        let mut flow = FlowSummary::new(family);
        let latest = self.store.latest_date(family)?;
        let mut phase = if latest.is_none() || self.repair {
            SyncPhase::BootstrapProbe
        } else {
            SyncPhase::Catchup
        };
        let mut snapshot = None;

        loop {
            debug!(%family, %phase, "entering phase");
            self.progress.on_phase(family, phase);
            phase = match phase {
                SyncPhase::BootstrapProbe => {
                    let batch = self.probe(family, today, scratch)?;
                    flow.bootstrapped_from = Some(batch.fetch_date);
                    snapshot = Some(batch);
                    SyncPhase::Backfill
                }
                SyncPhase::Backfill => {
                    if let Some(batch) = snapshot.take() {
                        self.apply(&batch, &mut flow)?;
                    }
                    SyncPhase::Catchup
                }
                SyncPhase::Catchup => {
                    self.catch_up(family, today, scratch, &mut flow)?;
                    SyncPhase::Done
                }
                SyncPhase::Done => break,
            };
        }

        info!(
            %family,
            dates = flow.committed_dates.len(),
            written = flow.rows_written,
            skipped = flow.rows_skipped(),
            schema_failures = flow.schema_failures.len(),
            "flow complete"
        );
        Ok(flow)
    }

    /// Newest published cumulative snapshot on or before `today`.
    fn probe(
        &self,
        family: SourceKind,
        today: NaiveDate,
        scratch: &Path,
    ) -> Result<SnapshotBatch, SyncError> {
        let oldest = self.bootstrap.oldest_probe_date(today);
        let mut date = today;

        while date >= oldest {
            match self.source.fetch(family, date, FetchMode::Cumulative, scratch) {
                Ok(batch) => {
                    info!(%family, %date, records = batch.record_count(), "cumulative snapshot found");
                    return Ok(batch);
                }
                Err(e) if e.is_not_yet_published() => {
                    debug!(%family, %date, "no cumulative snapshot");
                }
                Err(e) => return Err(e.into()),
            }
            match date.pred_opt() {
                Some(prev) => date = prev,
                None => break,
            }
        }

        Err(SyncError::BootstrapExhausted {
            family,
            newest: today,
            oldest,
        })
    }

    fn catch_up(
        &self,
        family: SourceKind,
        today: NaiveDate,
        scratch: &Path,
        flow: &mut FlowSummary,
    ) -> Result<(), SyncError> {
        // A backfill that stored nothing (every row skipped) still anchors
        // catch-up at its snapshot date.
        let Some(anchor) = self.store.latest_date(family)?.or(flow.bootstrapped_from) else {
            return Ok(());
        };
        self.retry_pending(family, anchor, scratch, flow)?;

        let mut next = anchor.succ_opt();
        while let Some(date) = next.filter(|d| *d <= today) {
            match self.source.fetch(family, date, FetchMode::Eod, scratch) {
                Ok(batch) => self.apply(&batch, flow)?,
                Err(e) if e.is_not_yet_published() => {
                    debug!(%family, %date, "end-of-day snapshot not published");
                    flow.not_published.push(date);
                    self.progress.on_not_published(family, date);
                }
                Err(e) => return Err(e.into()),
            }
            next = date.succ_opt();
        }
        Ok(())
    }

    /// Fetch again the pending snapshots dated on or before `anchor`, oldest
    /// first. Later ones are reached by the forward walk.
    fn retry_pending(
        &self,
        family: SourceKind,
        anchor: NaiveDate,
        scratch: &Path,
        flow: &mut FlowSummary,
    ) -> Result<(), SyncError> {
        let mut attempted: BTreeSet<PendingSnapshot> = flow
            .bootstrapped_from
            .map(|date| (date, FetchMode::Cumulative))
            .into_iter()
            .collect();

        // Re-read after each fetch: a clean cumulative snapshot settles
        // everything before it.
        loop {
            let next = self
                .store
                .pending(family)?
                .into_iter()
                .find(|s| s.0 <= anchor && !attempted.contains(s));
            let Some((date, mode)) = next else {
                break;
            };
            attempted.insert((date, mode));
            info!(%family, %date, %mode, "retrying rejected snapshot");
            flow.retried_dates.push(date);
            match self.source.fetch(family, date, mode, scratch) {
                Ok(batch) => self.apply(&batch, flow)?,
                Err(e) if e.is_not_yet_published() => {
                    warn!(%family, %date, %mode, "rejected snapshot is no longer published");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Normalize a snapshot, plan each partition against the store, and
    /// commit the planned dates oldest-first, one commit per date.
    fn apply(&self, batch: &SnapshotBatch, flow: &mut FlowSummary) -> Result<(), SyncError> {
        let family = batch.family;
        let as_of = batch.fetch_date;
        let snapshot = (as_of, batch.mode);
        let failures_before = flow.schema_failures.len();
        let partitions = self.decompose(batch, flow);
        let rejected = flow.schema_failures.len() > failures_before;
        if rejected {
            self.store.mark_pending(family, snapshot)?;
        }

        let detector = GapDetector::new(self.store);
        let mut planned: BTreeMap<NaiveDate, Vec<CanonicalRow>> = BTreeMap::new();
        for (partition, mut by_date) in partitions {
            let fetched: BTreeSet<NaiveDate> = by_date.keys().copied().collect();
            let plan = detector.plan(&partition, &fetched, as_of)?;
            debug!(%partition, fetched = fetched.len(), planned = plan.len(), "partition planned");
            for date in plan {
                if let Some(rows) = by_date.remove(&date) {
                    planned.entry(date).or_default().extend(rows);
                }
            }
        }

        let writer = UpsertWriter::with_chunk_size(self.store, self.chunk_size);
        for (date, rows) in planned {
            let report = writer.commit(family, rows)?;
            info!(
                %family,
                %date,
                written = report.written,
                already_present = report.already_present,
                skipped = report.skipped.len(),
                "date committed"
            );
            self.progress.on_committed(family, date, &report);
            flow.record_commit(date, report);
        }

        if !rejected {
            self.settle_pending(family, snapshot)?;
        }
        Ok(())
    }

    /// Clear what a cleanly applied snapshot makes whole: its own date for an
    /// end-of-day one, every pending date up to it for a cumulative one.
    fn settle_pending(
        &self,
        family: SourceKind,
        snapshot: PendingSnapshot,
    ) -> Result<(), StoreError> {
        let (date, mode) = snapshot;
        let settled: Vec<PendingSnapshot> = match mode {
            FetchMode::Eod => vec![snapshot],
            FetchMode::Cumulative => self
                .store
                .pending(family)?
                .into_iter()
                .filter(|s| s.0 <= date)
                .collect(),
        };
        if !settled.is_empty() {
            self.store.clear_pending(family, &settled)?;
        }
        Ok(())
    }

    /// Split a snapshot into per-partition, per-date rows. Sub-batches with a
    /// bad shape are recorded and left out.
    fn decompose(
        &self,
        batch: &SnapshotBatch,
        flow: &mut FlowSummary,
    ) -> BTreeMap<Partition, BTreeMap<NaiveDate, Vec<CanonicalRow>>> {
        let mut partitions: BTreeMap<Partition, BTreeMap<NaiveDate, Vec<CanonicalRow>>> =
            BTreeMap::new();

        for sub_batch in &batch.sub_batches {
            let mut rows = match self.normalizer.normalize(sub_batch) {
                Ok(rows) => rows,
                Err(error) => {
                    warn!(
                        family = %batch.family,
                        date = %batch.fetch_date,
                        table = %sub_batch.table_name,
                        %error,
                        "sub-batch rejected"
                    );
                    self.progress
                        .on_schema_failure(batch.family, batch.fetch_date, &error);
                    flow.schema_failures.push(SchemaFailure {
                        date: batch.fetch_date,
                        table: sub_batch.table_name.clone(),
                        error,
                    });
                    continue;
                }
            };

            for row in rows.by_ref() {
                partitions
                    .entry(Partition::new(batch.family, row.group_key()))
                    .or_default()
                    .entry(row.date())
                    .or_default()
                    .push(row);
            }
            if rows.dropped() > 0 {
                debug!(table = %sub_batch.table_name, dropped = rows.dropped(), "unreadable rows dropped");
            }
            flow.rows_dropped += rows.dropped();
        }
        partitions
    }
}
