//! Store boundary: the durable tabular store the engine commits into.
//!
//! The engine never assumes uniqueness itself; the store enforces
//! `(group_key, entity_code, date)` uniqueness and reports, per row, what
//! happened to it.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::domain::{CanonicalRow, FetchMode, Partition, SourceKind};
use crate::registry::Listing;
use chrono::NaiveDate;
use std::collections::BTreeSet;
use thiserror::Error;

/// Per-row result of a batched insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    Inserted,
    /// The `(group_key, entity_code, date)` key already existed. No-op.
    AlreadyPresent,
    /// The row references an entity the registry does not know.
    UnknownEntity,
}

/// Fatal store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("store I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("store backend failure: {0}")]
    Backend(String),
}

/// A snapshot that must be fetched again because a sub-batch of it was
/// rejected.
pub type PendingSnapshot = (NaiveDate, FetchMode);

/// Stored history of one partition, for status reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionExtent {
    pub partition: Partition,
    pub first: NaiveDate,
    pub last: NaiveDate,
    pub dates: usize,
}

/// The tabular store.
pub trait BarStore: Send + Sync {
    /// Distinct committed dates of `partition` up to and including `as_of`.
    fn stored_dates(
        &self,
        partition: &Partition,
        as_of: NaiveDate,
    ) -> Result<BTreeSet<NaiveDate>, StoreError>;

    /// Newest committed date across every partition of `kind`.
    fn latest_date(&self, kind: SourceKind) -> Result<Option<NaiveDate>, StoreError>;

    /// Insert rows, ignoring ones whose key already exists. Returns one
    /// outcome per input row, in order.
    ///
    /// On a fatal error, rows inserted before the failing one stay committed.
    fn insert_or_ignore(
        &self,
        kind: SourceKind,
        rows: &[CanonicalRow],
    ) -> Result<Vec<RowOutcome>, StoreError>;

    /// Insert or update registry entries. Returns the number of listings
    /// written.
    fn upsert_listings(&self, listings: &[Listing]) -> Result<usize, StoreError>;

    /// Number of registered instruments.
    fn listing_count(&self) -> Result<usize, StoreError>;

    /// Per-partition stored history, ordered by partition.
    fn partition_extents(&self) -> Result<Vec<PartitionExtent>, StoreError>;

    /// Record that a snapshot of `kind` had a rejected sub-batch. Marking
    /// the same snapshot twice is a no-op.
    fn mark_pending(
        &self,
        kind: SourceKind,
        snapshot: PendingSnapshot,
    ) -> Result<(), StoreError>;

    /// Snapshots of `kind` still waiting to be fetched again, oldest first.
    fn pending(&self, kind: SourceKind) -> Result<Vec<PendingSnapshot>, StoreError>;

    /// Forget the given snapshots. Unknown entries are ignored.
    fn clear_pending(
        &self,
        kind: SourceKind,
        snapshots: &[PendingSnapshot],
    ) -> Result<(), StoreError>;
}
