use std::time::Duration;

use crate::protocol::CompletedAsset;
use crate::session::SessionSnapshot;

/// Tuning for the bounded-parallelism dispatch loop.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Global cap on part transfers in flight, across all sessions.
    pub max_concurrent: usize,
    /// Attempts per part before the whole session fails.
    pub chunk_retry_limit: u32,
    /// A transfer with no result within this window counts as a chunk
    /// failure under the same retry budget.
    pub chunk_timeout: Duration,
    /// First retry delay; doubles per attempt, plus jitter.
    pub retry_base_delay: Duration,
    /// How long to keep retrying a bookkeeping report before giving
    /// up on it (the ledger, not the report, decides completion).
    pub report_retry_window: Duration,
    /// How long to keep re-issuing `complete` before surfacing.
    pub complete_retry_window: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            chunk_retry_limit: 3,
            chunk_timeout: Duration::from_secs(120),
            retry_base_delay: Duration::from_millis(500),
            report_retry_window: Duration::from_secs(30),
            complete_retry_window: Duration::from_secs(30),
        }
    }
}

/// How one drive of a session ended.
#[derive(Debug, Clone)]
pub enum DriveOutcome {
    /// Finalized; the session carries the returned asset.
    Completed(CompletedAsset),
    /// Paused or cancelled by the user; nothing to surface.
    Suspended,
    /// Terminal failure; the session sits in `Error` with this cause.
    Failed(String),
}

/// Mid-flight notification from a driver to the manager.
#[derive(Debug, Clone)]
pub struct DriverUpdate {
    pub session_id: String,
    pub part_number: u32,
    pub snapshot: SessionSnapshot,
}
