//! techsync command-line entry point
//!
//! Wires the HTTP adapters to the reconciliation and cleanup engines and
//! exposes them as subcommands. `sweep` runs as a long-lived service; the
//! rest are one-shot operations.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use reqwest::Client;
use techsync_core::{
    Alerter, CleanupEngine, CleanupOptions, MappingStore, NoopAlerter, Reconciler, SyncMode,
    SyncSettings, SyncWindow,
};
use techsync_domain::{AppConfig, RunSummary};
use techsync_infra::{
    load_config, AzureTokenProvider, GraphCalendarSource, RetryPolicy, ServiceTitanSink,
    ServiceTitanTokenProvider, SlackAlerter, SweepScheduler, SweepSchedulerConfig, WorkbookStore,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "techsync", version, about)]
struct Cli {
    /// Path to a TOML config file (environment variables still win)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the sweep scheduler until interrupted
    Sweep,
    /// Run one sweep over all enabled technicians and exit
    Run,
    /// Reconcile a single user's calendar
    User {
        /// Calendar owner (provider email)
        email: String,
        /// Ignore the stored cursor and reconcile the full window
        #[arg(long)]
        full: bool,
    },
    /// Detect and delete duplicate appointments created by this system
    Cleanup {
        #[arg(long)]
        dry_run: bool,
    },
    /// Delete every synced appointment in the window and reset sync state
    Reset {
        #[arg(long)]
        dry_run: bool,
        /// Keep the mapping and cursor tables intact
        #[arg(long)]
        keep_state: bool,
        /// Target technician ids; all known technicians when omitted
        #[arg(long = "technician")]
        technicians: Vec<i64>,
    },
}

struct Services {
    reconciler: Arc<Reconciler>,
    cleanup: CleanupEngine,
    store: Arc<WorkbookStore>,
    window: SyncWindow,
    sweep_interval: Duration,
}

fn build(config: &AppConfig) -> anyhow::Result<Services> {
    let tz = config.sync.tz()?;
    let window =
        SyncWindow { past_days: config.sync.past_days, future_days: config.sync.future_days };
    let settings = SyncSettings { tz, window, flags: config.sync.visibility };

    let client = Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("building HTTP client")?;
    let retry = RetryPolicy::default();

    let azure = Arc::new(AzureTokenProvider::new(client.clone(), &config.graph));
    let st_auth =
        Arc::new(ServiceTitanTokenProvider::new(client.clone(), &config.servicetitan));

    let source = Arc::new(GraphCalendarSource::new(
        client.clone(),
        config.graph.base_url.clone(),
        azure.clone(),
        retry.clone(),
    ));
    let sink = Arc::new(ServiceTitanSink::new(
        client.clone(),
        &config.servicetitan,
        st_auth,
        retry.clone(),
    ));
    let store = Arc::new(WorkbookStore::new(client.clone(), &config.store, azure, retry));

    let alerter: Arc<dyn Alerter> = match &config.sync.alert_webhook_url {
        Some(url) => Arc::new(SlackAlerter::new(
            client,
            url.clone(),
            Duration::from_secs(config.sync.alert_min_interval_secs),
        )),
        None => Arc::new(NoopAlerter),
    };

    let reconciler = Arc::new(Reconciler::new(
        source,
        sink.clone(),
        store.clone(),
        alerter,
        settings,
    ));
    let cleanup = CleanupEngine::new(sink, store.clone());

    Ok(Services {
        reconciler,
        cleanup,
        store,
        window,
        sweep_interval: Duration::from_secs(config.sync.sweep_interval_secs),
    })
}

fn report(summary: &RunSummary) -> anyhow::Result<()> {
    info!(
        calendars = summary.calendars_processed,
        fetched = summary.events_fetched,
        upserted = summary.events_upserted,
        skipped = summary.events_skipped,
        errors = summary.errors.len(),
        "run finished"
    );
    for err in &summary.errors {
        error!(user = %err.user_id, context = %err.context, "{}", err.message);
    }
    if !summary.is_clean() {
        bail!("{} error(s) during run", summary.errors.len());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let services = build(&config)?;

    match cli.command {
        Command::Sweep => {
            // One pass up front so a fresh deployment syncs immediately
            let summary = services.reconciler.sweep().await;
            if !summary.is_clean() {
                error!(errors = summary.errors.len(), "initial sweep had errors");
            }

            let mut scheduler = SweepScheduler::new(
                services.reconciler.clone(),
                SweepSchedulerConfig {
                    interval: services.sweep_interval,
                    ..SweepSchedulerConfig::default()
                },
            );
            scheduler.start().await?;
            info!("sweep scheduler running, press Ctrl-C to stop");

            tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
            scheduler.stop().await?;
            Ok(())
        }
        Command::Run => {
            let summary = services.reconciler.sweep().await;
            report(&summary)
        }
        Command::User { email, full } => {
            let configs = services.store.technician_configs().await?;
            let tech = configs
                .into_iter()
                .find(|c| c.user_id.eq_ignore_ascii_case(&email))
                .with_context(|| format!("no technician configured for {email}"))?;

            let mode = if full { SyncMode::FullWindow } else { SyncMode::Delta };
            let summary = services.reconciler.sync_user(&tech, mode).await;
            report(&summary)
        }
        Command::Cleanup { dry_run } => {
            let report = services
                .cleanup
                .dedupe(&CleanupOptions { window: services.window, dry_run })
                .await?;
            info!(
                technicians = report.technicians,
                examined = report.examined,
                groups = report.duplicate_groups,
                deleted = report.deleted,
                dry_run = report.dry_run,
                "cleanup finished"
            );
            Ok(())
        }
        Command::Reset { dry_run, keep_state, technicians } => {
            let report = services
                .cleanup
                .reset(
                    &technicians,
                    keep_state,
                    &CleanupOptions { window: services.window, dry_run },
                )
                .await?;
            info!(
                technicians = report.technicians,
                deleted = report.deleted,
                state_cleared = report.state_cleared,
                dry_run = report.dry_run,
                "reset finished"
            );
            Ok(())
        }
    }
}
