//! Sync orchestration: bootstrap, backfill and catch-up per source family.

pub mod orchestrator;
pub mod progress;
pub mod summary;

pub use orchestrator::{SyncError, SyncOrchestrator, SyncPhase};
pub use progress::{NoProgress, StdoutProgress, SyncProgress};
pub use summary::{FlowSummary, RunSummary, SchemaFailure};
