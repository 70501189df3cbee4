//! eodsync core: incremental synchronization of date-stamped market snapshots.
//!
//! This crate contains the sync engine:
//! - Domain types (partitions, snapshot batches, canonical rows)
//! - Snapshot sources (HTTP client, archive staging, naming layouts)
//! - Record normalization with batch-shape validation
//! - Gap detection against the stored extent
//! - Idempotent, row-isolated upsert through the store boundary
//! - The bootstrap / backfill / catch-up orchestrator

pub mod config;
pub mod domain;
pub mod gap;
pub mod normalize;
pub mod registry;
pub mod source;
pub mod store;
pub mod sync;
pub mod writer;
