//! In-memory store with the same semantics as the SQLite one.
//!
//! Used by tests and dry runs. Supports an optional registry per source kind
//! (rows for unregistered entities come back as `UnknownEntity`) and fault
//! injection for exercising fatal-error paths.

use super::{BarStore, PartitionExtent, PendingSnapshot, RowOutcome, StoreError};
use crate::domain::{CanonicalRow, Ohlcv, Partition, SourceKind};
use crate::registry::Listing;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

type DayRows = BTreeMap<String, Ohlcv>;

#[derive(Default)]
struct State {
    bars: BTreeMap<Partition, BTreeMap<NaiveDate, DayRows>>,
    registries: HashMap<SourceKind, BTreeSet<String>>,
    listings: BTreeMap<String, Listing>,
    pending: HashMap<SourceKind, BTreeSet<PendingSnapshot>>,
    /// Inserts left before the injected failure fires.
    fail_after: Option<usize>,
    insert_calls: usize,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only `codes` are known entities for `kind`.
    pub fn with_registry<I, S>(self, kind: SourceKind, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Ok(mut state) = self.state.lock() {
            state
                .registries
                .entry(kind)
                .or_default()
                .extend(codes.into_iter().map(Into::into));
        }
        self
    }

    /// Fail with a backend error once `rows` more rows have been inserted.
    pub fn fail_after(&self, rows: usize) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_after = Some(rows);
        }
    }

    /// Number of `insert_or_ignore` calls served.
    pub fn insert_calls(&self) -> usize {
        self.lock().map(|s| s.insert_calls).unwrap_or_default()
    }

    /// Every stored row of `partition`, ordered by date then entity.
    pub fn rows(&self, partition: &Partition) -> Vec<CanonicalRow> {
        let Ok(state) = self.lock() else {
            return Vec::new();
        };
        state
            .bars
            .get(partition)
            .into_iter()
            .flat_map(|days| days.iter())
            .flat_map(|(date, entities)| {
                entities.iter().map(move |(code, bar)| {
                    CanonicalRow::new(partition.group_key.as_str(), code.as_str(), *date, *bar)
                })
            })
            .collect()
    }

    /// Total stored rows across all partitions.
    pub fn row_count(&self) -> usize {
        self.lock()
            .map(|s| s.bars.values().flat_map(|d| d.values()).map(|e| e.len()).sum())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl BarStore for MemoryStore {
    fn stored_dates(
        &self,
        partition: &Partition,
        as_of: NaiveDate,
    ) -> Result<BTreeSet<NaiveDate>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .bars
            .get(partition)
            .map(|days| days.range(..=as_of).map(|(d, _)| *d).collect())
            .unwrap_or_default())
    }

    fn latest_date(&self, kind: SourceKind) -> Result<Option<NaiveDate>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .bars
            .iter()
            .filter(|(p, _)| p.kind == kind)
            .filter_map(|(_, days)| days.keys().next_back().copied())
            .max())
    }

    fn insert_or_ignore(
        &self,
        kind: SourceKind,
        rows: &[CanonicalRow],
    ) -> Result<Vec<RowOutcome>, StoreError> {
        let mut state = self.lock()?;
        state.insert_calls += 1;

        let mut outcomes = Vec::with_capacity(rows.len());
        for row in rows {
            let known = state
                .registries
                .get(&kind)
                .map_or(true, |codes| codes.contains(row.entity_code()));
            if !known {
                outcomes.push(RowOutcome::UnknownEntity);
                continue;
            }

            match state.fail_after {
                Some(0) => {
                    return Err(StoreError::Backend(format!(
                        "injected failure at {} {}",
                        row.entity_code(),
                        row.date()
                    )))
                }
                Some(n) => state.fail_after = Some(n - 1),
                None => {}
            }

            let day = state
                .bars
                .entry(Partition::new(kind, row.group_key()))
                .or_default()
                .entry(row.date())
                .or_default();
            if day.contains_key(row.entity_code()) {
                outcomes.push(RowOutcome::AlreadyPresent);
            } else {
                day.insert(row.entity_code().to_string(), *row.bar());
                outcomes.push(RowOutcome::Inserted);
            }
        }
        Ok(outcomes)
    }

    fn upsert_listings(&self, listings: &[Listing]) -> Result<usize, StoreError> {
        let mut state = self.lock()?;
        for listing in listings {
            state
                .registries
                .entry(SourceKind::Transaction)
                .or_default()
                .insert(listing.code.clone());
            state.listings.insert(listing.code.clone(), listing.clone());
        }
        Ok(listings.len())
    }

    fn listing_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.listings.len())
    }

    fn partition_extents(&self) -> Result<Vec<PartitionExtent>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .bars
            .iter()
            .filter_map(|(partition, days)| {
                let first = *days.keys().next()?;
                let last = *days.keys().next_back()?;
                Some(PartitionExtent {
                    partition: partition.clone(),
                    first,
                    last,
                    dates: days.len(),
                })
            })
            .collect())
    }

    fn mark_pending(
        &self,
        kind: SourceKind,
        snapshot: PendingSnapshot,
    ) -> Result<(), StoreError> {
        self.lock()?.pending.entry(kind).or_default().insert(snapshot);
        Ok(())
    }

    fn pending(&self, kind: SourceKind) -> Result<Vec<PendingSnapshot>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .pending
            .get(&kind)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    fn clear_pending(
        &self,
        kind: SourceKind,
        snapshots: &[PendingSnapshot],
    ) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if let Some(set) = state.pending.get_mut(&kind) {
            for snapshot in snapshots {
                set.remove(snapshot);
            }
        }
        Ok(())
    }
}
