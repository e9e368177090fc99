//! Persisted sync state rows (event mappings and cursors)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sync status of a mapping row. Rows are soft-deleted, never removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingStatus {
    Synced,
    Deleted,
}

impl MappingStatus {
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("deleted") {
            Self::Deleted
        } else {
            Self::Synced
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::Deleted => "deleted",
        }
    }
}

/// One row per stable event key.
///
/// Invariant: `appointment_ids.len()` equals the day-block count at last
/// sync, and positions are reused across updates so block *i* always maps
/// to the same downstream appointment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMapping {
    /// Owning user identity (provider email)
    pub user_id: String,
    /// Stable event key (see `NormalizedEvent::stable_key`)
    pub event_key: String,
    /// Raw provider id, kept for tombstone lookups
    pub provider_id: String,
    /// Downstream appointment ids, one per day-block, order-significant
    pub appointment_ids: Vec<i64>,
    /// Content fingerprint of the last-synced state
    pub fingerprint: String,
    pub last_synced: DateTime<Utc>,
    pub status: MappingStatus,
}

impl EventMapping {
    pub fn is_live(&self) -> bool {
        self.status == MappingStatus::Synced
    }
}

/// Per-user continuation cursor.
///
/// Advanced only after every event in the batch it represents has been
/// durably reconciled; a crash mid-batch retries with the same cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub user_id: String,
    /// Opaque delta link from the last successful fetch
    pub delta_link: Option<String>,
    pub last_run: Option<DateTime<Utc>>,
}
