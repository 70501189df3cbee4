//! Snapshot sources and structured fetch errors.
//!
//! The `SnapshotSource` trait abstracts over where dated archives come from
//! (the HTTP client in production, scripted sources in tests), so the
//! orchestrator never touches the network directly.

pub mod archive;
pub mod http;
pub mod layout;
pub mod scratch;

pub use archive::{unpack, FetchRecord};
pub use http::HttpSnapshotClient;
pub use layout::{SnapshotLayout, TableSpec};
pub use scratch::ScratchDir;

use crate::domain::{FetchMode, SnapshotBatch, SourceKind};
use chrono::NaiveDate;
use std::path::Path;
use thiserror::Error;

/// Failure to obtain a snapshot.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The source answered 404: the archive for that date does not exist
    /// (yet). Expected on weekends, holidays and before publication.
    #[error("snapshot not yet published: {url}")]
    NotYetPublished { url: String },

    #[error("transport failure for {url}: {message}")]
    Transport { url: String, message: String },

    #[error("scratch directory I/O failed: {0}")]
    Scratch(#[from] std::io::Error),
}

impl FetchError {
    pub fn is_not_yet_published(&self) -> bool {
        matches!(self, FetchError::NotYetPublished { .. })
    }

    pub(crate) fn transport(url: &str, message: impl std::fmt::Display) -> Self {
        FetchError::Transport {
            url: url.to_string(),
            message: message.to_string(),
        }
    }
}

/// A source of dated snapshot archives.
pub trait SnapshotSource: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    /// Fetch the snapshot of `family` published for `date` in `mode`,
    /// staging any files under `scratch`.
    fn fetch(
        &self,
        family: SourceKind,
        date: NaiveDate,
        mode: FetchMode,
        scratch: &Path,
    ) -> Result<SnapshotBatch, FetchError>;
}
