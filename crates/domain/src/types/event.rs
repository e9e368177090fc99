//! Calendar event types
//!
//! `RawEvent` is the loose projection of one Graph calendar event as the
//! calendar source returns it (possibly a tombstone carrying only an id).
//! `NormalizedEvent` is the strict internal schema everything downstream of
//! the normalizer operates on.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Fingerprint scheme version. Bumping this forces a re-upsert of every
/// event on the next run; that is the supported migration path when masking
/// or payload rules change.
pub const FINGERPRINT_VERSION: &str = "v2";

/// Raw calendar event from the provider API (before normalization)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawEvent {
    /// Provider event id
    pub id: String,
    /// Stable cross-view id (Graph iCalUId), when present
    pub ical_uid: Option<String>,
    pub subject: Option<String>,
    pub start: Option<RawEventTime>,
    pub end: Option<RawEventTime>,
    pub is_all_day: Option<bool>,
    /// Availability classification (busy/free/oof/tentative/workingElsewhere)
    pub show_as: Option<String>,
    /// Sensitivity classification (normal/private/...)
    pub sensitivity: Option<String>,
    pub last_modified: Option<String>,
    /// Tombstone marker from the change feed
    pub removed: bool,
}

/// Timestamp with its declared timezone, as delivered by the provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEventTime {
    pub date_time: String,
    pub time_zone: Option<String>,
}

/// Availability tag, coerced to lowercase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    Busy,
    Free,
    Tentative,
    Oof,
    WorkingElsewhere,
}

impl Availability {
    /// Parse a provider tag; unknown or absent values default to busy.
    pub fn parse(tag: Option<&str>) -> Self {
        match tag.map(|t| t.trim().to_ascii_lowercase()).as_deref() {
            Some("free") => Self::Free,
            Some("tentative") => Self::Tentative,
            Some("oof") => Self::Oof,
            Some("workingelsewhere") => Self::WorkingElsewhere,
            _ => Self::Busy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Busy => "busy",
            Self::Free => "free",
            Self::Tentative => "tentative",
            Self::Oof => "oof",
            Self::WorkingElsewhere => "workingelsewhere",
        }
    }

    /// Only busy and out-of-office events are propagated downstream.
    pub fn is_syncable(&self) -> bool {
        matches!(self, Self::Busy | Self::Oof)
    }
}

/// Canonical projection of a calendar event.
///
/// Timestamps are absolute UTC instants; `None` means the provider value was
/// missing or unparsable and the event must never be synced. Tombstones have
/// `is_removed = true` and null times — branch on that before touching the
/// time fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub id: String,
    pub ical_uid: Option<String>,
    pub subject: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub is_all_day: bool,
    pub availability: Availability,
    pub is_private: bool,
    pub last_modified: Option<DateTime<Utc>>,
    pub is_removed: bool,
}

impl NormalizedEvent {
    /// Identity used for mapping-table lookups.
    ///
    /// The cross-view id plus start/end unifies the same occurrence seen
    /// through different query paths; the raw provider id is only a
    /// fallback because tombstones and calendar-view listings can expose
    /// one occurrence under different raw ids.
    pub fn stable_key(&self) -> String {
        let id = self.ical_uid.as_deref().filter(|u| !u.is_empty()).unwrap_or(&self.id);
        format!("{}|{}|{}", id, fmt_instant(self.start), fmt_instant(self.end))
    }

    /// Versioned composite of every field that affects the downstream
    /// payload. A change here forces a re-upsert even when the provider's
    /// own last-modified timestamp did not move.
    pub fn fingerprint(&self) -> String {
        let subject = if self.is_private { "" } else { self.subject.as_str() };
        format!(
            "{}|{}|{}|{}|{}|{}|{}",
            FINGERPRINT_VERSION,
            fmt_instant(self.start),
            fmt_instant(self.end),
            self.is_all_day,
            self.availability.as_str(),
            self.is_private,
            subject,
        )
    }

    /// Whether both endpoints parsed to committed instants.
    pub fn has_times(&self) -> bool {
        self.start.is_some() && self.end.is_some()
    }
}

fn fmt_instant(t: Option<DateTime<Utc>>) -> String {
    t.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true)).unwrap_or_else(|| "-".to_string())
}
