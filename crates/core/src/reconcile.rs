//! Delta reconciliation engine
//!
//! Drives one calendar-to-schedule pass per user: fetch a batch of changes,
//! normalize and dedupe, classify each event (retire / skip / upsert), diff
//! against the persisted mapping, apply downstream writes, and persist the
//! new mapping rows and continuation cursor.
//!
//! The engine assumes single-flight per user: callers must not run two
//! passes for the same user concurrently. Different users are independent.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use chrono_tz::Tz;
use techsync_domain::{
    EventMapping, MappingStatus, NormalizedEvent, RunSummary, SyncCursor, SyncError,
    SyncErrorRecord, TechnicianConfig, VisibilityFlags,
};
use tracing::{debug, info, warn};

use crate::day_split::split_into_day_blocks;
use crate::normalize::normalize;
use crate::payload::build_payloads;
use crate::ports::{Alerter, AppointmentSink, CalendarSource, ChangeBatch, MappingStore, SyncWindow};

/// How to obtain the batch for a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Incremental fetch from the stored cursor (fresh cycle when absent).
    Delta,
    /// Plain window listing, ignoring and not advancing the cursor.
    FullWindow,
}

/// Process-wide settings every pass shares.
#[derive(Debug, Clone, Copy)]
pub struct SyncSettings {
    pub tz: Tz,
    pub window: SyncWindow,
    pub flags: VisibilityFlags,
}

enum Outcome {
    Upserted,
    Skipped,
}

pub struct Reconciler {
    source: Arc<dyn CalendarSource>,
    sink: Arc<dyn AppointmentSink>,
    store: Arc<dyn MappingStore>,
    alerter: Arc<dyn Alerter>,
    settings: SyncSettings,
}

impl Reconciler {
    pub fn new(
        source: Arc<dyn CalendarSource>,
        sink: Arc<dyn AppointmentSink>,
        store: Arc<dyn MappingStore>,
        alerter: Arc<dyn Alerter>,
        settings: SyncSettings,
    ) -> Self {
        Self { source, sink, store, alerter, settings }
    }

    /// One full sweep over every enabled technician.
    ///
    /// Per-user failures are recorded and alerted; the sweep always visits
    /// every remaining user.
    pub async fn sweep(&self) -> RunSummary {
        let mut summary = RunSummary::default();

        let configs = match self.store.technician_configs().await {
            Ok(configs) => configs,
            Err(err) => {
                warn!(error = %err, "failed to load technician configuration");
                summary.errors.push(record("-", "technician_configs", &err));
                self.alerter
                    .notify_failure("Sweep aborted", &format!("config load failed: {err}"))
                    .await;
                return summary;
            }
        };

        let enabled: Vec<_> = configs.into_iter().filter(|c| c.enabled).collect();
        info!(technicians = enabled.len(), "starting sweep");

        for tech in &enabled {
            let user = self.sync_user(tech, SyncMode::Delta).await;
            if !user.is_clean() {
                let details = user
                    .errors
                    .iter()
                    .map(|e| format!("{}: {}", e.context, e.message))
                    .collect::<Vec<_>>()
                    .join("\n");
                self.alerter
                    .notify_failure(&format!("Sync errors for {}", tech.user_id), &details)
                    .await;
            }
            summary.merge(user);
        }

        info!(
            calendars = summary.calendars_processed,
            upserted = summary.events_upserted,
            skipped = summary.events_skipped,
            errors = summary.errors.len(),
            "sweep finished"
        );
        summary
    }

    /// Reconcile one user's calendar.
    ///
    /// Never returns `Err`: batch-level failures end the pass with an error
    /// record, per-event failures are recorded and the walk continues.
    pub async fn sync_user(&self, tech: &TechnicianConfig, mode: SyncMode) -> RunSummary {
        let mut summary = RunSummary::default();

        let batch = match self.fetch_batch(&tech.user_id, mode).await {
            Ok(batch) => batch,
            Err(err) => {
                warn!(user = %tech.user_id, error = %err, "change fetch failed");
                summary.errors.push(record(&tech.user_id, "fetch", &err));
                return summary;
            }
        };

        summary.calendars_processed = 1;
        summary.events_fetched = batch.events.len();
        debug!(user = %tech.user_id, events = batch.events.len(), "processing batch");

        let mut seen: HashSet<(String, String)> = HashSet::new();
        for raw in &batch.events {
            let event = normalize(raw);
            if !seen.insert((event.stable_key(), event.fingerprint())) {
                summary.events_skipped += 1;
                continue;
            }
            match self.process_event(tech, &event).await {
                Ok(Outcome::Upserted) => summary.events_upserted += 1,
                Ok(Outcome::Skipped) => summary.events_skipped += 1,
                Err(err) => {
                    warn!(user = %tech.user_id, event = %event.stable_key(), error = %err,
                        "event reconciliation failed");
                    summary.errors.push(record(&tech.user_id, &event.stable_key(), &err));
                }
            }
        }

        // The cursor moves only once every event in the batch has been
        // durably reconciled; after a partial failure the next pass retries
        // the same batch, which re-processing handles idempotently.
        if let Some(link) = batch.delta_link {
            if summary.is_clean() {
                let cursor = SyncCursor {
                    user_id: tech.user_id.clone(),
                    delta_link: Some(link),
                    last_run: Some(Utc::now()),
                };
                if let Err(err) = self.store.put_cursor(&cursor).await {
                    warn!(user = %tech.user_id, error = %err, "cursor write failed");
                    summary.errors.push(record(&tech.user_id, "cursor", &err));
                }
            } else {
                warn!(user = %tech.user_id, "batch had errors, keeping previous cursor");
            }
        }

        summary
    }

    /// Fetch the batch for a pass.
    ///
    /// An invalidated or otherwise failing stored delta link gets exactly
    /// one fallback re-fetch of the full window, which also yields a fresh
    /// link.
    async fn fetch_batch(&self, user_id: &str, mode: SyncMode) -> Result<ChangeBatch, SyncError> {
        let window = self.settings.window;

        if mode == SyncMode::FullWindow {
            let events = self.source.fetch_window(user_id, &window).await?;
            return Ok(ChangeBatch { events, delta_link: None });
        }

        let stored = match self.store.cursor(user_id).await {
            Ok(cursor) => cursor.and_then(|c| c.delta_link),
            Err(err) => {
                // Losing the cursor only costs a wider re-fetch
                warn!(user = %user_id, error = %err, "cursor read failed, starting fresh cycle");
                None
            }
        };

        match &stored {
            Some(link) => match self.source.fetch_changes(user_id, Some(link), &window).await {
                Ok(batch) => Ok(batch),
                Err(err) => {
                    warn!(user = %user_id, error = %err,
                        "delta fetch failed, restarting from full window");
                    self.source.fetch_changes(user_id, None, &window).await
                }
            },
            None => self.source.fetch_changes(user_id, None, &window).await,
        }
    }

    /// Classify and apply one event.
    async fn process_event(
        &self,
        tech: &TechnicianConfig,
        event: &NormalizedEvent,
    ) -> Result<Outcome, SyncError> {
        if event.is_removed {
            // Tombstones carry no usable times, so the stable key cannot
            // match; fall back to the raw provider id.
            let mapping = self.store.mapping_by_provider_id(&tech.user_id, &event.id).await?;
            if let Some(mapping) = mapping.filter(|m| m.is_live()) {
                debug!(user = %tech.user_id, event = %event.id, "retiring removed event");
                self.retire(mapping).await?;
            }
            return Ok(Outcome::Skipped);
        }

        if !event.has_times() {
            debug!(user = %tech.user_id, event = %event.id, "skipping event without times");
            return Ok(Outcome::Skipped);
        }

        let mapping = self.store.mapping(&event.stable_key()).await?;

        if !event.availability.is_syncable() {
            if let Some(mapping) = mapping.filter(|m| m.is_live()) {
                debug!(user = %tech.user_id, event = %event.stable_key(),
                    "availability no longer syncable, retiring");
                self.retire(mapping).await?;
            }
            return Ok(Outcome::Skipped);
        }

        if let Some(existing) = &mapping {
            if existing.is_live() && existing.fingerprint == event.fingerprint() {
                return Ok(Outcome::Skipped);
            }
        }

        self.upsert(tech, event, mapping).await?;
        Ok(Outcome::Upserted)
    }

    /// Delete an event's appointments and soft-delete its mapping row.
    ///
    /// Individual appointment deletes are best-effort; the row is retired
    /// either way, and a lingering appointment is what the cleanup engine
    /// exists for.
    async fn retire(&self, mapping: EventMapping) -> Result<(), SyncError> {
        for id in &mapping.appointment_ids {
            if let Err(err) = self.sink.delete(*id).await {
                warn!(appointment = id, error = %err, "failed to delete retired appointment");
            }
        }
        let retired = EventMapping {
            last_synced: Utc::now(),
            status: MappingStatus::Deleted,
            ..mapping
        };
        self.store.put_mapping(&retired).await
    }

    /// Create or update the appointments for a syncable event.
    ///
    /// Positions are resolved independently against the previous mapping:
    /// block *i* reuses appointment id *i* when one exists. A failed update
    /// falls back to create-then-delete-stale. Newly created ids are rolled
    /// back if the event cannot be fully resolved or its mapping row cannot
    /// be written.
    async fn upsert(
        &self,
        tech: &TechnicianConfig,
        event: &NormalizedEvent,
        previous: Option<EventMapping>,
    ) -> Result<(), SyncError> {
        // has_times() was checked by the caller
        let (start, end) = match (event.start, event.end) {
            (Some(start), Some(end)) => (start, end),
            _ => return Err(SyncError::Internal("upsert on event without times".into())),
        };

        let blocks = split_into_day_blocks(start, end, self.settings.tz);
        let payloads = build_payloads(event, tech, &blocks, self.settings.flags, self.settings.tz);

        let reusable: &[i64] = match &previous {
            Some(m) if m.is_live() => &m.appointment_ids,
            _ => &[],
        };

        let mut resolved: Vec<i64> = Vec::with_capacity(payloads.len());
        let mut created: Vec<i64> = Vec::new();

        for (i, payload) in payloads.iter().enumerate() {
            match reusable.get(i) {
                Some(&id) => match self.sink.update(id, payload).await {
                    Ok(()) => resolved.push(id),
                    Err(update_err) => {
                        // A failed position gets a replacement rather than
                        // aborting the remaining positions.
                        match &update_err {
                            SyncError::NotFound(_) => {
                                debug!(appointment = id, "stale appointment id, creating replacement")
                            }
                            other => warn!(appointment = id, error = %other,
                                "update failed, creating replacement"),
                        }
                        match self.sink.create(payload).await {
                            Ok(new_id) => {
                                created.push(new_id);
                                resolved.push(new_id);
                                // The old one may still linger downstream
                                if let Err(err) = self.sink.delete(id).await {
                                    warn!(appointment = id, error = %err,
                                        "failed to delete stale appointment");
                                }
                            }
                            Err(err) => {
                                self.rollback(&created).await;
                                return Err(err);
                            }
                        }
                    }
                },
                None => match self.sink.create(payload).await {
                    Ok(new_id) => {
                        created.push(new_id);
                        resolved.push(new_id);
                    }
                    Err(err) => {
                        self.rollback(&created).await;
                        return Err(err);
                    }
                },
            }
        }

        // Shrink: the event now spans fewer local days than before
        for &id in reusable.iter().skip(payloads.len()) {
            if let Err(err) = self.sink.delete(id).await {
                warn!(appointment = id, error = %err, "failed to delete surplus appointment");
            }
        }

        let mapping = EventMapping {
            user_id: tech.user_id.clone(),
            event_key: event.stable_key(),
            provider_id: event.id.clone(),
            appointment_ids: resolved,
            fingerprint: event.fingerprint(),
            last_synced: Utc::now(),
            status: MappingStatus::Synced,
        };
        if let Err(err) = self.store.put_mapping(&mapping).await {
            // Without the row the next pass cannot reuse these ids; remove
            // them so the retry recreates cleanly instead of duplicating.
            self.rollback(&created).await;
            return Err(err);
        }

        debug!(user = %tech.user_id, event = %event.stable_key(),
            appointments = mapping.appointment_ids.len(), "event upserted");
        Ok(())
    }

    async fn rollback(&self, created: &[i64]) {
        for &id in created {
            if let Err(err) = self.sink.delete(id).await {
                warn!(appointment = id, error = %err, "rollback delete failed");
            }
        }
    }
}

fn record(user_id: &str, context: &str, err: &SyncError) -> SyncErrorRecord {
    SyncErrorRecord {
        user_id: user_id.to_string(),
        context: context.to_string(),
        message: err.to_string(),
    }
}
