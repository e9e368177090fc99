//! Port interfaces for the reconciliation engine's collaborators
//!
//! Abstract contracts only; the HTTP adapters live in `techsync-infra`.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use techsync_domain::{
    Appointment, AppointmentPayload, EventMapping, RawEvent, Result, SyncCursor, Technician,
    TechnicianConfig,
};

/// Fetch bounds for full-window queries, in days around now.
#[derive(Debug, Clone, Copy)]
pub struct SyncWindow {
    pub past_days: i64,
    pub future_days: i64,
}

impl SyncWindow {
    /// Concrete UTC bounds as of `now`.
    pub fn bounds(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (now - Duration::days(self.past_days), now + Duration::days(self.future_days))
    }
}

/// One batch of changes from the calendar source.
#[derive(Debug, Clone, Default)]
pub struct ChangeBatch {
    pub events: Vec<RawEvent>,
    /// Continuation token for the next incremental fetch, when the
    /// provider returned one
    pub delta_link: Option<String>,
}

/// Upstream calendar of record (read-only).
///
/// Implementations must follow pagination internally; the engine sees whole
/// batches.
#[async_trait]
pub trait CalendarSource: Send + Sync {
    /// Incremental fetch. With `delta_link = None` this starts a fresh
    /// delta cycle over the window and still yields a continuation token.
    async fn fetch_changes(
        &self,
        user_id: &str,
        delta_link: Option<&str>,
        window: &SyncWindow,
    ) -> Result<ChangeBatch>;

    /// Plain window listing (no continuation token), for backfill.
    async fn fetch_window(&self, user_id: &str, window: &SyncWindow) -> Result<Vec<RawEvent>>;
}

/// Downstream appointment system (write side).
#[async_trait]
pub trait AppointmentSink: Send + Sync {
    async fn create(&self, payload: &AppointmentPayload) -> Result<i64>;

    /// Fails with `SyncError::NotFound` when the appointment is gone.
    async fn update(&self, id: i64, payload: &AppointmentPayload) -> Result<()>;

    /// Idempotent: deleting an already-absent appointment succeeds.
    async fn delete(&self, id: i64) -> Result<()>;

    /// All appointments for one technician in a UTC window, all pages.
    async fn list(
        &self,
        technician_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>>;

    async fn technicians(&self) -> Result<Vec<Technician>>;
}

/// Versioned row-store holding technician config, cursors, and mappings.
#[async_trait]
pub trait MappingStore: Send + Sync {
    async fn technician_configs(&self) -> Result<Vec<TechnicianConfig>>;

    async fn cursor(&self, user_id: &str) -> Result<Option<SyncCursor>>;
    async fn put_cursor(&self, cursor: &SyncCursor) -> Result<()>;

    async fn mapping(&self, event_key: &str) -> Result<Option<EventMapping>>;
    /// Secondary lookup by raw provider id, for tombstones that carry no
    /// usable stable key.
    async fn mapping_by_provider_id(
        &self,
        user_id: &str,
        provider_id: &str,
    ) -> Result<Option<EventMapping>>;
    async fn put_mapping(&self, mapping: &EventMapping) -> Result<()>;
    async fn all_mappings(&self) -> Result<Vec<EventMapping>>;

    /// Clear the cursor and mapping tables' data rows (headers preserved).
    async fn clear_sync_state(&self) -> Result<()>;
}

/// Failure alerting (Slack or similar). Fire-and-forget: implementations
/// rate-limit internally and never raise.
#[async_trait]
pub trait Alerter: Send + Sync {
    async fn notify_failure(&self, title: &str, details: &str);
}

/// No-op alerter for tests and alert-disabled deployments.
pub struct NoopAlerter;

#[async_trait]
impl Alerter for NoopAlerter {
    async fn notify_failure(&self, _title: &str, _details: &str) {}
}
