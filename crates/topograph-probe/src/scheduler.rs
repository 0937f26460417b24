//! Sync scheduling engine.
//!
//! Spawns one tokio task per configured source, each taking a snapshot and
//! reconciling it at the configured interval. A semaphore limits how many
//! syncs run at once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Semaphore};
use tokio::time::{interval, Duration, MissedTickBehavior};

use topograph_graph::Graph;

use crate::config::ProbeConfig;
use crate::error::Result;
use crate::probe::ProbeHandler;
use crate::source::{FileSource, ObservationSource};
use crate::sync::{self, SyncSummary};

/// A probe paired with the source it reconciles from.
#[derive(Clone)]
pub struct ProbeJob {
    pub handler: Arc<ProbeHandler>,
    pub source: Arc<dyn ObservationSource>,
    pub interval: Duration,
}

/// Build one job per enabled source in `config`.
pub fn jobs_from_config(graph: &Arc<Graph>, config: &ProbeConfig) -> Vec<ProbeJob> {
    config
        .sources
        .iter()
        .filter(|source| {
            if !source.enabled {
                tracing::info!(probe = %source.probe, "Source disabled, skipping");
            }
            source.enabled
        })
        .map(|source| ProbeJob {
            handler: Arc::new(ProbeHandler::from_config(graph.clone(), config, source)),
            source: Arc::new(FileSource::new(&source.path)),
            interval: Duration::from_secs(source.interval_secs.max(1)),
        })
        .collect()
}

/// The scheduler manages periodic sync jobs for multiple probes.
pub struct SyncScheduler {
    jobs: Vec<ProbeJob>,
    concurrency: Arc<Semaphore>,
}

impl SyncScheduler {
    pub fn new(jobs: Vec<ProbeJob>, max_concurrent_syncs: usize) -> Self {
        Self {
            jobs,
            concurrency: Arc::new(Semaphore::new(max_concurrent_syncs.max(1))),
        }
    }

    /// Run every job until `shutdown` flips to true or its sender is dropped.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut handles = Vec::new();

        for job in &self.jobs {
            let job = job.clone();
            let semaphore = self.concurrency.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                run_job_loop(job, semaphore, shutdown).await;
            }));
        }

        tracing::info!(job_count = handles.len(), "Scheduler started");

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Sync task panicked");
            }
        }

        tracing::info!("Scheduler stopped");
        Ok(())
    }
}

/// Per-probe sync loop.
async fn run_job_loop(job: ProbeJob, semaphore: Arc<Semaphore>, mut shutdown: watch::Receiver<bool>) {
    let probe = job.handler.probe().to_string();
    let mut ticker = interval(job.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            _ = ticker.tick() => {}
        }

        tracing::debug!(probe = %probe, source = %job.source.describe(), "Scheduled sync triggered");

        let Ok(_permit) = semaphore.acquire().await else {
            break;
        };

        let stop = Arc::new(AtomicBool::new(false));
        let sync = run_sync(&job, stop.clone());
        tokio::pin!(sync);

        let finished = tokio::select! {
            result = &mut sync => Some(result),
            _ = shutdown_requested(&mut shutdown) => None,
        };
        let (result, stopping) = match finished {
            Some(result) => (result, false),
            None => {
                // The pass stops before its next entity; wait for it so no
                // commit is still running when the loop exits.
                stop.store(true, Ordering::Release);
                (sync.await, true)
            }
        };

        if let Err(e) = result {
            tracing::error!(probe = %probe, error = %e, "Scheduled sync failed");
        }
        if stopping {
            break;
        }
    }

    tracing::debug!(probe = %probe, "Sync loop exiting");
}

/// Resolves once shutdown is signalled or the sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Execute a single sync to completion: snapshot → reconcile.
pub async fn run_single_sync(job: &ProbeJob) -> Result<SyncSummary> {
    run_sync(job, Arc::new(AtomicBool::new(false))).await
}

/// Execute a single sync on the blocking pool, abandoning it between
/// entities once `stop` is set.
pub async fn run_sync(job: &ProbeJob, stop: Arc<AtomicBool>) -> Result<SyncSummary> {
    let handler = job.handler.clone();
    let source = job.source.clone();

    let summary = tokio::task::spawn_blocking(move || -> Result<SyncSummary> {
        let snapshot = source.snapshot()?;
        Ok(sync::reconcile_until(&handler, &snapshot, &stop))
    })
    .await??;

    if summary.abandoned {
        tracing::info!(
            probe = %job.handler.probe(),
            observed = summary.observed,
            "Sync abandoned"
        );
    } else {
        tracing::info!(
            probe = %job.handler.probe(),
            observed = summary.observed,
            created = summary.created,
            forgotten = summary.forgotten,
            failed = summary.failed,
            "Sync complete"
        );
    }

    Ok(summary)
}
