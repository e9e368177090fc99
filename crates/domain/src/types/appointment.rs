//! Downstream appointment types (ServiceTitan non-job appointments)

use serde::{Deserialize, Serialize};

use crate::config::VisibilityFlags;

/// Payload for one non-job appointment, one per day-block of an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentPayload {
    pub technician_id: i64,
    pub name: String,
    /// Start expressed in the target timezone, `%Y-%m-%dT%H:%M:%S`
    pub start: String,
    /// End-minus-start as `HH:MM:SS` (hours unbounded; a full day is 24)
    pub duration: String,
    pub all_day: bool,
    pub show_on_technician_schedule: bool,
    pub clear_dispatch_board: bool,
    pub clear_technician_view: bool,
    pub remove_technician_from_capacity_planning: bool,
    /// Present only when the configured code is a valid positive integer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timesheet_code_id: Option<i64>,
}

impl AppointmentPayload {
    pub fn flags(&self) -> VisibilityFlags {
        VisibilityFlags {
            show_on_technician_schedule: self.show_on_technician_schedule,
            clear_dispatch_board: self.clear_dispatch_board,
            clear_technician_view: self.clear_technician_view,
            remove_from_capacity_planning: self.remove_technician_from_capacity_planning,
        }
    }
}

/// A non-job appointment as listed from the downstream API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: i64,
    pub technician_id: i64,
    #[serde(default)]
    pub name: String,
    pub start: String,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub all_day: bool,
    #[serde(default)]
    pub show_on_technician_schedule: bool,
    #[serde(default)]
    pub clear_dispatch_board: bool,
    #[serde(default)]
    pub clear_technician_view: bool,
    #[serde(default)]
    pub remove_technician_from_capacity_planning: bool,
}

impl Appointment {
    pub fn flags(&self) -> VisibilityFlags {
        VisibilityFlags {
            show_on_technician_schedule: self.show_on_technician_schedule,
            clear_dispatch_board: self.clear_dispatch_board,
            clear_technician_view: self.clear_technician_view,
            remove_from_capacity_planning: self.remove_technician_from_capacity_planning,
        }
    }
}

/// A technician record from the downstream API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Technician {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub active: bool,
}
