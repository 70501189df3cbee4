//! Gap detection: which fetched dates a partition still needs.
//!
//! A date is planned when the fetched batch has rows for it, it is not yet
//! stored, and it lies after the first stored date (an interior gap or the
//! tail) and no later than `as_of`. With nothing stored, every fetched date
//! up to `as_of` is planned. Dates the batch has no rows for (weekends,
//! holidays) are never planned.

use crate::domain::Partition;
use crate::store::{BarStore, StoreError};
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::ops::Bound::{Excluded, Included};

/// Plan the dates to commit, strictly ascending.
///
/// Equivalent to walking consecutive known dates and emitting the fetched
/// dates strictly between them, then the fetched dates after the last known
/// one: both reduce to "after the first known date and not known".
pub fn plan_missing(
    known: &BTreeSet<NaiveDate>,
    fetched: &BTreeSet<NaiveDate>,
    as_of: NaiveDate,
) -> Vec<NaiveDate> {
    match known.range(..=as_of).next() {
        None => fetched.range(..=as_of).copied().collect(),
        Some(&first) if first < as_of => fetched
            .range((Excluded(first), Included(as_of)))
            .filter(|d| !known.contains(d))
            .copied()
            .collect(),
        Some(_) => Vec::new(),
    }
}

/// Plans against the store's current extent. The extent is re-queried on every
/// call, never cached.
pub struct GapDetector<'a> {
    store: &'a dyn BarStore,
}

impl<'a> GapDetector<'a> {
    pub fn new(store: &'a dyn BarStore) -> Self {
        Self { store }
    }

    pub fn plan(
        &self,
        partition: &Partition,
        fetched: &BTreeSet<NaiveDate>,
        as_of: NaiveDate,
    ) -> Result<Vec<NaiveDate>, StoreError> {
        let known = self.store.stored_dates(partition, as_of)?;
        Ok(plan_missing(&known, fetched, as_of))
    }
}
