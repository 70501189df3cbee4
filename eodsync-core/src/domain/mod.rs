//! Domain types for eodsync

pub mod bar;
pub mod partition;
pub mod snapshot;

pub use bar::{CanonicalRow, Ohlcv};
pub use partition::{Partition, SourceKind};
pub use snapshot::{FetchMode, Grouping, RawTable, SnapshotBatch, SubBatch};
