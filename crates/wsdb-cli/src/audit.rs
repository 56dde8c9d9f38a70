//! `audit` command: one sweep, or sweeps on a cron schedule.

use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use wsdb_audit::{AuditScheduler, ListingStore, SweepReport};

use crate::runtime::Runtime;

async fn build_sweeper(runtime: &Runtime) -> anyhow::Result<AuditScheduler> {
    let registry = runtime.registry()?;
    let store: Arc<dyn ListingStore> = runtime.store().await?;
    Ok(AuditScheduler::from_config(&runtime.config, store, registry))
}

fn print_report(report: &SweepReport) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

pub(crate) async fn run_once(
    runtime: &Runtime,
    platform: Option<&str>,
    from: Option<i64>,
) -> anyhow::Result<()> {
    let sweeper = build_sweeper(runtime).await?;
    let report = sweeper.sweep_from(platform, from).await?;
    print_report(&report)
}

/// Registers the sweep as a cron job and runs until Ctrl-C. A tick that
/// fires while the previous sweep is still running is skipped.
pub(crate) async fn run_scheduled(
    runtime: &Runtime,
    platform: Option<String>,
    cron: &str,
) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let sweeper = Arc::new(build_sweeper(runtime).await?.with_cancel(cancel.clone()));
    let running = Arc::new(tokio::sync::Mutex::new(()));

    let mut scheduler = JobScheduler::new().await?;
    let job = Job::new_async(cron, move |_uuid, _lock| {
        let sweeper = Arc::clone(&sweeper);
        let running = Arc::clone(&running);
        let platform = platform.clone();

        Box::pin(async move {
            let Ok(_guard) = running.try_lock() else {
                tracing::warn!("scheduler: previous audit sweep still running; skipping tick");
                return;
            };
            tracing::info!(platform = ?platform, "scheduler: starting audit sweep");
            match sweeper.sweep(platform.as_deref()).await {
                Ok(report) => {
                    tracing::info!(
                        healed = report.healed,
                        still_weak = report.still_weak,
                        failed = report.failed,
                        "scheduler: audit sweep complete"
                    );
                    if let Err(e) = print_report(&report) {
                        tracing::warn!(error = %e, "scheduler: failed to print sweep report");
                    }
                }
                Err(e) => tracing::error!(error = %e, "scheduler: audit sweep failed"),
            }
        })
    })?;
    scheduler.add(job).await?;
    scheduler.start().await?;
    tracing::info!(cron, "audit scheduled; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("received shutdown signal, stopping audit scheduler");
    cancel.cancel();
    scheduler.shutdown().await?;
    Ok(())
}
