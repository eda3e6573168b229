//! Periodic execution of the sync workflows (`daemon` mode).
//!
//! Each enabled job gets its own loop. Runs still go through the run
//! coordinator, so a job whose turn comes while another workflow is running
//! waits for it instead of overlapping.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ehdb_core::config::SchedulerConfig;
use ehdb_core::crawler::{GallerySyncOptions, ResyncOptions, TorrentSyncOptions};

use crate::commands::Job;

/// Runs one job to completion.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run_job(&self, job: &Job, cancel: &CancellationToken) -> Result<Value>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledJob {
    pub job: Job,
    pub interval: Duration,
}

/// The jobs enabled in the config.
pub fn scheduled_jobs(config: &SchedulerConfig) -> Vec<ScheduledJob> {
    let mut jobs = Vec::new();
    if config.gallery_sync_enabled {
        jobs.push(ScheduledJob {
            job: Job::GallerySync(GallerySyncOptions {
                offset_hours: config.gallery_sync_offset_hours,
                page_limit: None,
            }),
            interval: minutes(config.gallery_sync_interval_mins),
        });
    }
    if config.torrent_sync_enabled {
        jobs.push(ScheduledJob {
            job: Job::TorrentSync(TorrentSyncOptions::default()),
            interval: minutes(config.torrent_sync_interval_mins),
        });
    }
    if config.resync_enabled {
        jobs.push(ScheduledJob {
            job: Job::Resync(ResyncOptions {
                hours: config.resync_hours,
            }),
            interval: minutes(config.resync_interval_mins),
        });
    }
    jobs
}

fn minutes(mins: u64) -> Duration {
    Duration::from_secs(mins * 60)
}

/// Run every job on its interval until `cancel` fires. The first run of each
/// job starts immediately.
pub async fn run_scheduler(
    runner: Arc<dyn JobRunner>,
    jobs: Vec<ScheduledJob>,
    cancel: CancellationToken,
) {
    if jobs.is_empty() {
        warn!("No scheduled jobs enabled, nothing to do");
        return;
    }

    let handles: Vec<_> = jobs
        .into_iter()
        .map(|scheduled| tokio::spawn(job_loop(runner.clone(), scheduled, cancel.clone())))
        .collect();
    info!(jobs = handles.len(), "Scheduler started");

    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Scheduled job task panicked");
        }
    }
    info!("Scheduler stopped");
}

async fn job_loop(runner: Arc<dyn JobRunner>, scheduled: ScheduledJob, cancel: CancellationToken) {
    let workflow = scheduled.job.workflow();
    info!(
        workflow = %workflow,
        interval_mins = scheduled.interval.as_secs() / 60,
        "Scheduled job registered"
    );

    let mut ticker = tokio::time::interval(scheduled.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        info!(workflow = %workflow, "Starting scheduled run");
        match runner.run_job(&scheduled.job, &cancel).await {
            Ok(summary) => info!(workflow = %workflow, summary = %summary, "Scheduled run finished"),
            Err(e) if cancel.is_cancelled() => {
                warn!(workflow = %workflow, error = %format!("{:#}", e), "Scheduled run interrupted");
                break;
            }
            Err(e) => {
                error!(workflow = %workflow, error = %format!("{:#}", e), "Scheduled run failed")
            }
        }
    }
}
