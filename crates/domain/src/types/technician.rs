//! Technician configuration rows

use serde::{Deserialize, Serialize};

/// Mapping from a provider user identity to a downstream technician.
///
/// Externally edited (a sheet humans maintain); the engine treats it as a
/// read-mostly snapshot per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnicianConfig {
    /// Provider user identity (email)
    pub user_id: String,
    /// Downstream technician id
    pub technician_id: i64,
    /// Optional timesheet code, kept raw; validated as a positive integer
    /// only when building payloads
    pub timesheet_code: Option<String>,
    pub enabled: bool,
}

impl TechnicianConfig {
    /// The timesheet code id to write downstream, if the configured value
    /// is a valid positive integer. Absence is intentional: the downstream
    /// default differs between a missing field and a zero value.
    pub fn timesheet_code_id(&self) -> Option<i64> {
        self.timesheet_code
            .as_deref()
            .and_then(|c| c.trim().parse::<i64>().ok())
            .filter(|id| *id > 0)
    }
}
