//! Interval sweep scheduler
//!
//! Runs the reconciler's full sweep on a fixed interval with a start/stop
//! lifecycle. One scheduler instance drives all users sequentially, which
//! also guarantees the single-flight-per-user rule.

use std::sync::Arc;
use std::time::{Duration, Instant};

use techsync_core::Reconciler;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type TaskHandle = Arc<Mutex<Option<JoinHandle<()>>>>;

#[derive(Debug, Clone)]
pub struct SweepSchedulerConfig {
    pub interval: Duration,
    /// How long `stop` waits for an in-flight sweep to finish.
    pub join_timeout: Duration,
}

impl Default for SweepSchedulerConfig {
    fn default() -> Self {
        Self { interval: Duration::from_secs(900), join_timeout: Duration::from_secs(5) }
    }
}

pub struct SweepScheduler {
    reconciler: Arc<Reconciler>,
    config: SweepSchedulerConfig,
    cancellation_token: CancellationToken,
    task_handle: TaskHandle,
}

impl SweepScheduler {
    pub fn new(reconciler: Arc<Reconciler>, config: SweepSchedulerConfig) -> Self {
        Self {
            reconciler,
            config,
            cancellation_token: CancellationToken::new(),
            task_handle: Arc::new(Mutex::new(None)),
        }
    }

    /// Spawn the background loop. Fails if the scheduler is already running.
    pub async fn start(&mut self) -> Result<(), SchedulerError> {
        if self.is_running() {
            return Err(SchedulerError::AlreadyRunning);
        }

        info!(interval_secs = self.config.interval.as_secs(), "starting sweep scheduler");

        // Fresh token so the scheduler can be restarted after a stop
        self.cancellation_token = CancellationToken::new();

        let reconciler = Arc::clone(&self.reconciler);
        let interval = self.config.interval;
        let cancel = self.cancellation_token.clone();

        let handle = tokio::spawn(async move {
            Self::sweep_loop(reconciler, interval, cancel).await;
        });
        *self.task_handle.lock().await = Some(handle);

        Ok(())
    }

    /// Cancel the loop and wait for the task to finish.
    pub async fn stop(&mut self) -> Result<(), SchedulerError> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }

        info!("stopping sweep scheduler");
        self.cancellation_token.cancel();

        if let Some(handle) = self.task_handle.lock().await.take() {
            tokio::time::timeout(self.config.join_timeout, handle)
                .await
                .map_err(|_| SchedulerError::StopTimeout(self.config.join_timeout))?
                .map_err(|e| SchedulerError::Join(e.to_string()))?;
        }

        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.task_handle
            .try_lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    async fn sweep_loop(
        reconciler: Arc<Reconciler>,
        interval: Duration,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("sweep loop cancelled");
                    break;
                }
                _ = tokio::time::sleep(interval) => {
                    let started = Instant::now();
                    let summary = reconciler.sweep().await;
                    info!(
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        calendars = summary.calendars_processed,
                        upserted = summary.events_upserted,
                        errors = summary.errors.len(),
                        "scheduled sweep finished"
                    );
                }
            }
        }
    }
}

impl Drop for SweepScheduler {
    fn drop(&mut self) {
        // Best-effort cleanup; stop() is the proper shutdown path
        if !self.cancellation_token.is_cancelled() {
            warn!("sweep scheduler dropped while running, cancelling");
            self.cancellation_token.cancel();
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("scheduler is already running")]
    AlreadyRunning,
    #[error("scheduler is not running")]
    NotRunning,
    #[error("sweep did not stop within {0:?}")]
    StopTimeout(Duration),
    #[error("sweep task failed: {0}")]
    Join(String),
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use chrono_tz::Tz;
    use techsync_core::{
        Alerter, AppointmentSink, CalendarSource, ChangeBatch, MappingStore, NoopAlerter,
        SyncSettings, SyncWindow,
    };
    use techsync_domain::{
        Appointment, AppointmentPayload, EventMapping, RawEvent, Result, SyncCursor, Technician,
        TechnicianConfig, VisibilityFlags,
    };

    use super::*;

    struct EmptySource;

    #[async_trait]
    impl CalendarSource for EmptySource {
        async fn fetch_changes(
            &self,
            _user_id: &str,
            _delta_link: Option<&str>,
            _window: &SyncWindow,
        ) -> Result<ChangeBatch> {
            Ok(ChangeBatch::default())
        }

        async fn fetch_window(
            &self,
            _user_id: &str,
            _window: &SyncWindow,
        ) -> Result<Vec<RawEvent>> {
            Ok(Vec::new())
        }
    }

    struct EmptySink;

    #[async_trait]
    impl AppointmentSink for EmptySink {
        async fn create(&self, _payload: &AppointmentPayload) -> Result<i64> {
            Ok(0)
        }
        async fn update(&self, _id: i64, _payload: &AppointmentPayload) -> Result<()> {
            Ok(())
        }
        async fn delete(&self, _id: i64) -> Result<()> {
            Ok(())
        }
        async fn list(
            &self,
            _technician_id: i64,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
        ) -> Result<Vec<Appointment>> {
            Ok(Vec::new())
        }
        async fn technicians(&self) -> Result<Vec<Technician>> {
            Ok(Vec::new())
        }
    }

    struct EmptyStore;

    #[async_trait]
    impl MappingStore for EmptyStore {
        async fn technician_configs(&self) -> Result<Vec<TechnicianConfig>> {
            Ok(Vec::new())
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
            Ok(Vec::new())
        }
        async fn clear_sync_state(&self) -> Result<()> {
            Ok(())
        }
    }

    fn reconciler() -> Arc<Reconciler> {
        let tz: Tz = "America/Chicago".parse().unwrap();
        Arc::new(Reconciler::new(
            Arc::new(EmptySource),
            Arc::new(EmptySink),
            Arc::new(EmptyStore),
            Arc::new(NoopAlerter),
            SyncSettings {
                tz,
                window: SyncWindow { past_days: 7, future_days: 60 },
                flags: VisibilityFlags::default(),
            },
        ))
    }

    fn config() -> SweepSchedulerConfig {
        SweepSchedulerConfig {
            interval: Duration::from_millis(10),
            join_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn lifecycle_start_then_stop() {
        let mut scheduler = SweepScheduler::new(reconciler(), config());

        assert!(!scheduler.is_running());
        scheduler.start().await.unwrap();
        assert!(scheduler.is_running());
        scheduler.stop().await.unwrap();
        assert!(!scheduler.is_running());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn double_start_fails() {
        let mut scheduler = SweepScheduler::new(reconciler(), config());

        scheduler.start().await.unwrap();
        assert!(matches!(scheduler.start().await, Err(SchedulerError::AlreadyRunning)));
        scheduler.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stop_without_start_fails() {
        let mut scheduler = SweepScheduler::new(reconciler(), config());
        assert!(matches!(scheduler.stop().await, Err(SchedulerError::NotRunning)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn restart_after_stop_works() {
        let mut scheduler = SweepScheduler::new(reconciler(), config());

        scheduler.start().await.unwrap();
        scheduler.stop().await.unwrap();
        scheduler.start().await.unwrap();
        assert!(scheduler.is_running());
        scheduler.stop().await.unwrap();
    }
}
