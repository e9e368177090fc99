//! Event normalizer
//!
//! Converts a raw provider event (possibly a tombstone carrying only an id)
//! into the canonical `NormalizedEvent`. Never fails: malformed fields
//! degrade to safe defaults, and a missing or unparsable timestamp becomes
//! `None` so callers can filter the event out instead of syncing garbage.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use techsync_domain::{Availability, NormalizedEvent, RawEvent, RawEventTime};
use tracing::debug;

/// Normalize one raw provider event.
pub fn normalize(raw: &RawEvent) -> NormalizedEvent {
    let start = raw.start.as_ref().and_then(parse_event_time);
    let end = raw.end.as_ref().and_then(parse_event_time);

    NormalizedEvent {
        id: raw.id.clone(),
        ical_uid: raw.ical_uid.clone().filter(|u| !u.trim().is_empty()),
        subject: raw.subject.clone().unwrap_or_default(),
        start,
        end,
        is_all_day: raw.is_all_day.unwrap_or(false),
        availability: Availability::parse(raw.show_as.as_deref()),
        is_private: raw
            .sensitivity
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("private")),
        last_modified: raw.last_modified.as_deref().and_then(parse_instant),
        is_removed: raw.removed,
    }
}

/// Parse a provider timestamp in its declared zone and convert to UTC.
///
/// Graph delivers `dateTime` without an offset plus a separate `timeZone`
/// name; RFC 3339 values with an explicit offset also occur (tombstone
/// feeds, other views). Returns `None` on anything unparsable.
fn parse_event_time(t: &RawEventTime) -> Option<DateTime<Utc>> {
    let value = t.date_time.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    let naive = parse_naive(value)?;
    let tz: Tz = match t.time_zone.as_deref().map(str::trim) {
        None | Some("") => chrono_tz::UTC,
        Some(name) => match name.parse() {
            Ok(tz) => tz,
            Err(_) => {
                // Unrecognized zone name (e.g. a Windows display name the
                // provider was not asked to translate); UTC keeps the value
                // usable rather than dropping the event.
                debug!(zone = name, "unrecognized event timezone, assuming UTC");
                chrono_tz::UTC
            }
        },
    };

    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_naive(value: &str) -> Option<NaiveDateTime> {
    // Graph uses seven fractional digits ("2026-02-10T22:00:00.0000000")
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S"))
        .ok()
}

fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
