//! Cleanup and reset engine
//!
//! Operational recovery tools for the downstream schedule: duplicate
//! detection with referenced-id protection, and a full purge with sync
//! state reset. Both are read-only toward the calendar provider.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use techsync_domain::{Appointment, Result, VisibilityFlags};
use tracing::{info, warn};

use crate::ports::{AppointmentSink, MappingStore, SyncWindow};

#[derive(Debug, Clone, Copy)]
pub struct CleanupOptions {
    pub window: SyncWindow,
    /// Report what would happen without deleting anything.
    pub dry_run: bool,
}

/// Outcome of a duplicate sweep.
#[derive(Debug, Clone, Default)]
pub struct DedupeReport {
    pub technicians: usize,
    /// Appointments matching this system's signature
    pub examined: usize,
    pub duplicate_groups: usize,
    /// Deleted, or planned for deletion under dry-run
    pub deleted: usize,
    pub dry_run: bool,
}

/// Outcome of a full purge and state reset.
#[derive(Debug, Clone, Default)]
pub struct ResetReport {
    pub technicians: usize,
    pub deleted: usize,
    pub state_cleared: bool,
    pub dry_run: bool,
}

/// Grouping key for duplicate detection. Two appointments are duplicates
/// when every schedule-visible attribute matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DuplicateKey {
    technician_id: i64,
    start: String,
    duration: String,
    name: String,
    all_day: bool,
    flags: VisibilityFlags,
}

impl DuplicateKey {
    fn of(appt: &Appointment) -> Self {
        Self {
            technician_id: appt.technician_id,
            start: appt.start.clone(),
            duration: appt.duration.clone(),
            name: appt.name.clone(),
            all_day: appt.all_day,
            flags: appt.flags(),
        }
    }
}

pub struct CleanupEngine {
    sink: Arc<dyn AppointmentSink>,
    store: Arc<dyn MappingStore>,
}

impl CleanupEngine {
    pub fn new(sink: Arc<dyn AppointmentSink>, store: Arc<dyn MappingStore>) -> Self {
        Self { sink, store }
    }

    /// Detect and delete duplicate appointments created by this system.
    ///
    /// Only appointments carrying the exact visibility-flag combination
    /// this system writes, with a non-empty name, are considered. Within a
    /// duplicate group, ids referenced by any live mapping always survive;
    /// with no referenced member the lowest id survives.
    pub async fn dedupe(&self, opts: &CleanupOptions) -> Result<DedupeReport> {
        let mut report = DedupeReport { dry_run: opts.dry_run, ..DedupeReport::default() };

        let referenced = self.referenced_ids().await?;
        let configs = self.store.technician_configs().await?;
        let (from, to) = opts.window.bounds(Utc::now());

        let mut tech_ids: Vec<i64> = configs.iter().map(|c| c.technician_id).collect();
        tech_ids.sort_unstable();
        tech_ids.dedup();
        report.technicians = tech_ids.len();

        for technician_id in tech_ids {
            let appointments = self.sink.list(technician_id, from, to).await?;

            let mut groups: HashMap<DuplicateKey, Vec<i64>> = HashMap::new();
            for appt in appointments.iter().filter(|a| has_sync_signature(a)) {
                report.examined += 1;
                groups.entry(DuplicateKey::of(appt)).or_default().push(appt.id);
            }

            for (key, mut ids) in groups {
                if ids.len() < 2 {
                    continue;
                }
                report.duplicate_groups += 1;
                ids.sort_unstable();

                let victims: Vec<i64> = if ids.iter().any(|id| referenced.contains(id)) {
                    ids.into_iter().filter(|id| !referenced.contains(id)).collect()
                } else {
                    // No mapping claims any of them; keep the oldest
                    ids.into_iter().skip(1).collect()
                };

                info!(
                    technician = technician_id,
                    name = %key.name,
                    start = %key.start,
                    victims = victims.len(),
                    dry_run = opts.dry_run,
                    "duplicate group"
                );

                for id in victims {
                    if !opts.dry_run {
                        self.sink.delete(id).await?;
                    }
                    report.deleted += 1;
                }
            }
        }

        info!(
            examined = report.examined,
            groups = report.duplicate_groups,
            deleted = report.deleted,
            dry_run = report.dry_run,
            "dedupe finished"
        );
        Ok(report)
    }

    /// Delete every appointment in the window for the targeted technicians
    /// and clear the persisted sync state.
    ///
    /// With `technician_ids` empty, targets every technician known to the
    /// downstream system. Destructive; the calendar provider is never
    /// touched, so a follow-up full-window sync rebuilds the schedule.
    pub async fn reset(
        &self,
        technician_ids: &[i64],
        keep_state: bool,
        opts: &CleanupOptions,
    ) -> Result<ResetReport> {
        let mut report = ResetReport { dry_run: opts.dry_run, ..ResetReport::default() };

        let targets: Vec<i64> = if technician_ids.is_empty() {
            self.sink.technicians().await?.into_iter().map(|t| t.id).collect()
        } else {
            technician_ids.to_vec()
        };
        report.technicians = targets.len();
        let (from, to) = opts.window.bounds(Utc::now());

        for technician_id in targets {
            let appointments = self.sink.list(technician_id, from, to).await?;
            info!(
                technician = technician_id,
                appointments = appointments.len(),
                dry_run = opts.dry_run,
                "purging technician schedule"
            );
            for appt in appointments {
                if !opts.dry_run {
                    self.sink.delete(appt.id).await?;
                }
                report.deleted += 1;
            }
        }

        if keep_state {
            warn!("sync state kept; next delta pass will reference purged appointments");
        } else if !opts.dry_run {
            self.store.clear_sync_state().await?;
            report.state_cleared = true;
        }

        info!(
            technicians = report.technicians,
            deleted = report.deleted,
            state_cleared = report.state_cleared,
            dry_run = report.dry_run,
            "reset finished"
        );
        Ok(report)
    }

    /// Appointment ids any live mapping still points at.
    async fn referenced_ids(&self) -> Result<HashSet<i64>> {
        let mappings = self.store.all_mappings().await?;
        Ok(mappings
            .iter()
            .filter(|m| m.is_live())
            .flat_map(|m| m.appointment_ids.iter().copied())
            .collect())
    }
}

/// Whether an appointment looks like one this system wrote: the exact
/// default visibility-flag combination plus a non-empty name.
fn has_sync_signature(appt: &Appointment) -> bool {
    appt.flags() == VisibilityFlags::default() && !appt.name.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::AtomicBool;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use techsync_domain::{
        AppointmentPayload, EventMapping, MappingStatus, SyncCursor, SyncError, Technician,
        TechnicianConfig,
    };

    use super::*;

    fn window() -> CleanupOptions {
        CleanupOptions { window: SyncWindow { past_days: 7, future_days: 60 }, dry_run: false }
    }

    fn appt(id: i64, technician_id: i64, start: &str, name: &str) -> Appointment {
        Appointment {
            id,
            technician_id,
            name: name.into(),
            start: start.into(),
            duration: "01:00:00".into(),
            all_day: false,
            show_on_technician_schedule: true,
            clear_dispatch_board: false,
            clear_technician_view: false,
            remove_technician_from_capacity_planning: true,
        }
    }

    #[derive(Default)]
    struct FakeSink {
        appointments: Mutex<HashMap<i64, Vec<Appointment>>>,
        deleted: Mutex<Vec<i64>>,
        technicians: Vec<Technician>,
    }

    #[async_trait]
    impl AppointmentSink for FakeSink {
        async fn create(&self, _payload: &AppointmentPayload) -> Result<i64> {
            Err(SyncError::Internal("not used".into()))
        }

        async fn update(&self, _id: i64, _payload: &AppointmentPayload) -> Result<()> {
            Err(SyncError::Internal("not used".into()))
        }

        async fn delete(&self, id: i64) -> Result<()> {
            self.deleted.lock().unwrap().push(id);
            Ok(())
        }

        async fn list(
            &self,
            technician_id: i64,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
        ) -> Result<Vec<Appointment>> {
            Ok(self
                .appointments
                .lock()
                .unwrap()
                .get(&technician_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn technicians(&self) -> Result<Vec<Technician>> {
            Ok(self.technicians.clone())
        }
    }

    #[derive(Default)]
    struct FakeStore {
        configs: Vec<TechnicianConfig>,
        mappings: Vec<EventMapping>,
        cleared: AtomicBool,
    }

    #[async_trait]
    impl MappingStore for FakeStore {
        async fn technician_configs(&self) -> Result<Vec<TechnicianConfig>> {
            Ok(self.configs.clone())
        }

        async fn cursor(&self, _user_id: &str) -> Result<Option<SyncCursor>> {
            Ok(None)
        }

        async fn put_cursor(&self, _cursor: &SyncCursor) -> Result<()> {
            Ok(())
        }

        async fn mapping(&self, _event_key: &str) -> Result<Option<EventMapping>> {
            Ok(None)
        }

        async fn mapping_by_provider_id(
            &self,
            _user_id: &str,
            _provider_id: &str,
        ) -> Result<Option<EventMapping>> {
            Ok(None)
        }

        async fn put_mapping(&self, _mapping: &EventMapping) -> Result<()> {
            Ok(())
        }

        async fn all_mappings(&self) -> Result<Vec<EventMapping>> {
            Ok(self.mappings.clone())
        }

        async fn clear_sync_state(&self) -> Result<()> {
            self.cleared.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config(technician_id: i64) -> TechnicianConfig {
        TechnicianConfig {
            user_id: format!("tech{technician_id}@example.com"),
            technician_id,
            timesheet_code: None,
            enabled: true,
        }
    }

    fn live_mapping(ids: Vec<i64>) -> EventMapping {
        EventMapping {
            user_id: "tech42@example.com".into(),
            event_key: "uid|s|e".into(),
            provider_id: "ev".into(),
            appointment_ids: ids,
            fingerprint: "v2|x".into(),
            last_synced: Utc::now(),
            status: MappingStatus::Synced,
        }
    }

    fn engine(sink: Arc<FakeSink>, store: Arc<FakeStore>) -> CleanupEngine {
        CleanupEngine::new(sink, store)
    }

    #[tokio::test]
    async fn referenced_member_survives_and_unreferenced_die() {
        let sink = Arc::new(FakeSink::default());
        sink.appointments.lock().unwrap().insert(
            42,
            vec![
                appt(10, 42, "2026-03-02T14:00:00", "Dentist"),
                appt(11, 42, "2026-03-02T14:00:00", "Dentist"),
                appt(12, 42, "2026-03-02T14:00:00", "Dentist"),
            ],
        );
        let store = Arc::new(FakeStore {
            configs: vec![config(42)],
            mappings: vec![live_mapping(vec![11])],
            ..FakeStore::default()
        });

        let report = engine(sink.clone(), store).dedupe(&window()).await.unwrap();

        assert_eq!(report.duplicate_groups, 1);
        assert_eq!(report.deleted, 2);
        let mut deleted = sink.deleted.lock().unwrap().clone();
        deleted.sort_unstable();
        assert_eq!(deleted, vec![10, 12]);
    }

    #[tokio::test]
    async fn without_referenced_member_lowest_id_survives() {
        let sink = Arc::new(FakeSink::default());
        sink.appointments.lock().unwrap().insert(
            42,
            vec![
                appt(21, 42, "2026-03-02T14:00:00", "Busy"),
                appt(20, 42, "2026-03-02T14:00:00", "Busy"),
            ],
        );
        let store = Arc::new(FakeStore { configs: vec![config(42)], ..FakeStore::default() });

        let report = engine(sink.clone(), store).dedupe(&window()).await.unwrap();

        assert_eq!(report.deleted, 1);
        assert_eq!(*sink.deleted.lock().unwrap(), vec![21]);
    }

    #[tokio::test]
    async fn foreign_appointments_are_never_candidates() {
        let sink = Arc::new(FakeSink::default());
        let mut manual = appt(30, 42, "2026-03-02T14:00:00", "Manual entry");
        manual.clear_dispatch_board = true;
        let mut manual2 = manual.clone();
        manual2.id = 31;
        let unnamed = Appointment { name: "".into(), ..appt(32, 42, "2026-03-02T14:00:00", "") };
        let unnamed2 = Appointment { id: 33, ..unnamed.clone() };
        sink.appointments.lock().unwrap().insert(42, vec![manual, manual2, unnamed, unnamed2]);
        let store = Arc::new(FakeStore { configs: vec![config(42)], ..FakeStore::default() });

        let report = engine(sink.clone(), store).dedupe(&window()).await.unwrap();

        assert_eq!(report.examined, 0);
        assert_eq!(report.deleted, 0);
        assert!(sink.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn dry_run_reports_identically_but_deletes_nothing() {
        let seed = |sink: &FakeSink| {
            sink.appointments.lock().unwrap().insert(
                42,
                vec![
                    appt(10, 42, "2026-03-02T14:00:00", "Dentist"),
                    appt(11, 42, "2026-03-02T14:00:00", "Dentist"),
                ],
            );
        };
        let store = || Arc::new(FakeStore { configs: vec![config(42)], ..FakeStore::default() });

        let wet_sink = Arc::new(FakeSink::default());
        seed(&wet_sink);
        let wet = engine(wet_sink.clone(), store()).dedupe(&window()).await.unwrap();

        let dry_sink = Arc::new(FakeSink::default());
        seed(&dry_sink);
        let dry = engine(dry_sink.clone(), store())
            .dedupe(&CleanupOptions { dry_run: true, ..window() })
            .await
            .unwrap();

        assert_eq!(dry.examined, wet.examined);
        assert_eq!(dry.duplicate_groups, wet.duplicate_groups);
        assert_eq!(dry.deleted, wet.deleted);
        assert!(dry.dry_run);
        assert!(dry_sink.deleted.lock().unwrap().is_empty());
        assert!(!wet_sink.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn reset_purges_and_clears_state() {
        let sink = Arc::new(FakeSink::default());
        sink.appointments.lock().unwrap().insert(
            42,
            vec![
                appt(10, 42, "2026-03-02T14:00:00", "Dentist"),
                appt(11, 42, "2026-03-03T14:00:00", "Standup"),
            ],
        );
        let store = Arc::new(FakeStore::default());

        let report = engine(sink.clone(), store.clone())
            .reset(&[42], false, &window())
            .await
            .unwrap();

        assert_eq!(report.deleted, 2);
        assert!(report.state_cleared);
        assert_eq!(*sink.deleted.lock().unwrap(), vec![10, 11]);
        assert!(store.cleared.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn reset_without_targets_uses_downstream_roster() {
        let sink = Arc::new(FakeSink {
            technicians: vec![
                Technician { id: 42, name: "Ann".into(), active: true },
                Technician { id: 43, name: "Bo".into(), active: true },
            ],
            ..FakeSink::default()
        });
        sink.appointments
            .lock()
            .unwrap()
            .insert(43, vec![appt(50, 43, "2026-03-02T14:00:00", "Busy")]);
        let store = Arc::new(FakeStore::default());

        let report = engine(sink.clone(), store).reset(&[], false, &window()).await.unwrap();

        assert_eq!(report.technicians, 2);
        assert_eq!(report.deleted, 1);
        assert_eq!(*sink.deleted.lock().unwrap(), vec![50]);
    }

    #[tokio::test]
    async fn reset_dry_run_and_keep_state_leave_state_alone() {
        let sink = Arc::new(FakeSink::default());
        sink.appointments
            .lock()
            .unwrap()
            .insert(42, vec![appt(10, 42, "2026-03-02T14:00:00", "Dentist")]);
        let store = Arc::new(FakeStore::default());

        let dry = engine(sink.clone(), store.clone())
            .reset(&[42], false, &CleanupOptions { dry_run: true, ..window() })
            .await
            .unwrap();
        assert_eq!(dry.deleted, 1);
        assert!(!dry.state_cleared);
        assert!(sink.deleted.lock().unwrap().is_empty());
        assert!(!store.cleared.load(Ordering::SeqCst));

        let kept = engine(sink.clone(), store.clone())
            .reset(&[42], true, &window())
            .await
            .unwrap();
        assert!(!kept.state_cleared);
        assert!(!store.cleared.load(Ordering::SeqCst));
        assert_eq!(*sink.deleted.lock().unwrap(), vec![10]);
    }
}
