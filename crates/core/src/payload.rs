//! Payload mapper
//!
//! Turns a normalized event plus technician configuration into one
//! downstream appointment payload per day-block, applying privacy masking
//! and the process-wide visibility flags.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use techsync_domain::{
    AppointmentPayload, Availability, NormalizedEvent, TechnicianConfig, VisibilityFlags,
};

use crate::day_split::DayBlock;

/// Name written when the event is private, regardless of subject.
pub const MASKED_NAME: &str = "Busy";
/// Fallback label for empty subjects on out-of-office events.
pub const OOF_NAME: &str = "Out of Office";

/// Build one payload per day-block, in block order.
pub fn build_payloads(
    event: &NormalizedEvent,
    tech: &TechnicianConfig,
    blocks: &[DayBlock],
    flags: VisibilityFlags,
    tz: Tz,
) -> Vec<AppointmentPayload> {
    let name = display_name(event);
    let timesheet_code_id = tech.timesheet_code_id();

    blocks
        .iter()
        .map(|block| AppointmentPayload {
            technician_id: tech.technician_id,
            name: name.clone(),
            start: format_local(block.start, tz),
            duration: format_duration(block.duration_secs()),
            all_day: event.is_all_day,
            show_on_technician_schedule: flags.show_on_technician_schedule,
            clear_dispatch_board: flags.clear_dispatch_board,
            clear_technician_view: flags.clear_technician_view,
            remove_technician_from_capacity_planning: flags.remove_from_capacity_planning,
            timesheet_code_id,
        })
        .collect()
}

/// The name shown on the schedule.
///
/// Private events are always masked; otherwise the subject, with a generic
/// label when the subject is empty.
pub fn display_name(event: &NormalizedEvent) -> String {
    if event.is_private {
        return MASKED_NAME.to_string();
    }
    let subject = event.subject.trim();
    if !subject.is_empty() {
        return subject.to_string();
    }
    match event.availability {
        Availability::Oof => OOF_NAME.to_string(),
        _ => MASKED_NAME.to_string(),
    }
}

/// Whole seconds as `HH:MM:SS`; hours are unbounded (a full day is 24).
pub fn format_duration(secs: i64) -> String {
    let secs = secs.max(0);
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

fn format_local(t: DateTime<Utc>, tz: Tz) -> String {
    t.with_timezone(&tz).format("%Y-%m-%dT%H:%M:%S").to_string()
}
