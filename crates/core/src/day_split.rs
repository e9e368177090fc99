//! Day-splitter
//!
//! Slices a UTC interval into blocks that each fit inside one local
//! calendar day of the target timezone. Block count drives the length of
//! the appointment-id array in the mapping row, so the split must be
//! deterministic and stable across runs for the same input.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

/// One single-local-day slice of a source event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayBlock {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DayBlock {
    pub fn duration_secs(&self) -> i64 {
        (self.end - self.start).num_seconds()
    }
}

/// Split `[start, end]` into ordered, contiguous, non-overlapping blocks,
/// each wholly within one local calendar day of `tz`.
///
/// Always returns at least one block; a zero-duration or inverted interval
/// comes back as a single block unchanged.
pub fn split_into_day_blocks(start: DateTime<Utc>, end: DateTime<Utc>, tz: Tz) -> Vec<DayBlock> {
    let local_start = start.with_timezone(&tz);
    let local_end = end.with_timezone(&tz);

    if end <= start || local_start.date_naive() == local_end.date_naive() {
        return vec![DayBlock { start, end }];
    }

    let mut blocks = Vec::new();
    let mut cursor = start;
    let mut date = local_start.date_naive();
    let end_date = local_end.date_naive();

    while date < end_date {
        let next = date.succ_opt().expect("date overflow");
        let midnight = local_midnight(next, tz);
        blocks.push(DayBlock { start: cursor, end: midnight.min(end) });
        cursor = midnight;
        date = next;
    }

    // Final partial day; skipped when the interval ends exactly on the
    // last midnight (the previous block already covers it).
    if cursor < end {
        blocks.push(DayBlock { start: cursor, end });
    }

    blocks
}

/// UTC instant of local midnight on `date`.
///
/// DST gaps that swallow midnight resolve to the earliest valid local time
/// after it, keeping the split deterministic.
fn local_midnight(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    for hour in 0..3 {
        let naive = date.and_hms_opt(hour, 0, 0).expect("valid wall clock");
        if let Some(dt) = tz.from_local_datetime(&naive).earliest() {
            return dt.with_timezone(&Utc);
        }
    }
    // No zone shifts its clock by three hours at midnight
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("valid wall clock"))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    // Fixed UTC-6, no DST: keeps the scenarios stable year-round
    const TZ: Tz = chrono_tz::Etc::GMTPlus6;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn same_local_day_is_one_block() {
        // 22:00Z-03:00Z next day == 16:00-21:00 local, same day
        let start = utc(2026, 2, 10, 22, 0);
        let end = utc(2026, 2, 11, 3, 0);

        let blocks = split_into_day_blocks(start, end, TZ);
        assert_eq!(blocks, vec![DayBlock { start, end }]);
        assert_eq!(blocks[0].duration_secs(), 5 * 3600);
    }

    #[test]
    fn three_local_days_make_three_blocks() {
        // Local 2026-03-02 14:00 -> 2026-03-04 10:00 (UTC-6)
        let start = utc(2026, 3, 2, 20, 0);
        let end = utc(2026, 3, 4, 16, 0);

        let blocks = split_into_day_blocks(start, end, TZ);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].duration_secs(), 10 * 3600);
        assert_eq!(blocks[1].duration_secs(), 24 * 3600);
        assert_eq!(blocks[2].duration_secs(), 10 * 3600);
    }

    #[test]
    fn blocks_are_contiguous_and_cover_the_interval() {
        let start = utc(2026, 7, 1, 5, 30);
        let end = utc(2026, 7, 9, 23, 45);

        let blocks = split_into_day_blocks(start, end, TZ);
        assert_eq!(blocks.first().unwrap().start, start);
        assert_eq!(blocks.last().unwrap().end, end);
        for pair in blocks.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
            assert!(pair[0].start < pair[0].end);
        }
        let total: i64 = blocks.iter().map(DayBlock::duration_secs).sum();
        assert_eq!(total, (end - start).num_seconds());
    }

    #[test]
    fn zero_duration_is_a_single_block() {
        let at = utc(2026, 2, 10, 22, 0);
        let blocks = split_into_day_blocks(at, at, TZ);
        assert_eq!(blocks, vec![DayBlock { start: at, end: at }]);
    }

    #[test]
    fn end_on_midnight_does_not_emit_empty_block() {
        // Local 14:00 day 1 -> local 00:00 day 3: two blocks, no empty tail
        let start = utc(2026, 3, 2, 20, 0);
        let end = utc(2026, 3, 4, 6, 0);

        let blocks = split_into_day_blocks(start, end, TZ);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].end, end);
        assert_eq!(blocks[1].duration_secs(), 24 * 3600);
    }

    #[test]
    fn split_is_stable_across_runs() {
        let start = utc(2026, 11, 1, 2, 0);
        let end = utc(2026, 11, 4, 15, 0);
        let tz: Tz = "America/Chicago".parse().unwrap();

        let a = split_into_day_blocks(start, end, tz);
        let b = split_into_day_blocks(start, end, tz);
        assert_eq!(a, b);
        assert_eq!(a.first().unwrap().start, start);
        assert_eq!(a.last().unwrap().end, end);
    }
}
