//! Run summary types
//!
//! The contract any caller (CLI, scheduler tick) renders back to its
//! invoker; `errors` is always present and empty on full success.

use serde::{Deserialize, Serialize};

/// Per-event or per-user error record accumulated during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncErrorRecord {
    pub user_id: String,
    /// Event key or operation the error is attributed to
    pub context: String,
    pub message: String,
}

/// Summary of one reconciliation run (single user or full sweep).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub calendars_processed: usize,
    pub events_fetched: usize,
    pub events_upserted: usize,
    pub events_skipped: usize,
    pub errors: Vec<SyncErrorRecord>,
}

impl RunSummary {
    /// Fold another summary into this one (per-user stats into a sweep).
    pub fn merge(&mut self, other: RunSummary) {
        self.calendars_processed += other.calendars_processed;
        self.events_fetched += other.events_fetched;
        self.events_upserted += other.events_upserted;
        self.events_skipped += other.events_skipped;
        self.errors.extend(other.errors);
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}
