use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{sync::watch, task::JoinSet};
use tracing::{debug, error, info, warn};

use crate::{
    error::{Result, SchedulerError},
    queue::WorkItem,
    runner::JobRunner,
    types::JobStatus,
};

/// How often an idle worker re-checks the queue for items queued by another process.
const IDLE_POLL: Duration = Duration::from_secs(1);

/// Used when the configured poll interval is zero.
const FALLBACK_POLL: Duration = Duration::from_secs(1);

/// A lease not renewed for this long is considered abandoned.
const MIN_LEASE_TTL: Duration = Duration::from_secs(30);

/// What startup recovery repaired.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub running_reset: usize,
    pub orphaned_reset: usize,
    pub imports_failed: usize,
}

/// Trigger loop plus a pool of queue workers.
///
/// The trigger enqueues due jobs every `poll_interval`; each worker takes one
/// item at a time off the queue and runs it to completion. Only one engine
/// drives a database at a time: it holds a lease row that it renews on every
/// trigger pass.
pub struct SchedulerEngine {
    runner: Arc<JobRunner>,
    poll_interval: Duration,
    workers: usize,
    owner: String,
    lease_ttl: chrono::Duration,
}

impl SchedulerEngine {
    pub fn new(runner: Arc<JobRunner>, poll_interval: Duration, workers: usize) -> Self {
        let poll_interval = if poll_interval.is_zero() {
            warn!("poll interval of zero, using {}s", FALLBACK_POLL.as_secs());
            FALLBACK_POLL
        } else {
            poll_interval
        };
        let lease_ttl = chrono::Duration::from_std((poll_interval * 3).max(MIN_LEASE_TTL))
            .unwrap_or_else(|_| chrono::Duration::days(1));
        Self {
            runner,
            poll_interval,
            workers: workers.max(1),
            owner: uuid::Uuid::now_v7().to_string(),
            lease_ttl,
        }
    }

    /// Identifies this engine in the lease row.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Take or renew the engine lease.
    fn claim_lease(&self) -> Result<()> {
        let store = self.runner.store();
        if store.acquire_lease(&self.owner, Utc::now(), self.lease_ttl)? {
            return Ok(());
        }
        Err(SchedulerError::EngineBusy {
            owner: store.lease_holder()?.unwrap_or_default(),
        })
    }

    /// Repair state left behind by a process that stopped mid-run.
    ///
    /// Fails with [`SchedulerError::EngineBusy`] while another live engine
    /// holds the database; its running jobs and imports are left alone.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        self.claim_lease()?;
        let store = self.runner.store();
        let mut report = RecoveryReport::default();

        for id in store.with_status(JobStatus::Running)? {
            if store.reset_to_idle(&id, JobStatus::Running)? {
                report.running_reset += 1;
            }
        }
        for id in store.with_status(JobStatus::Enqueued)? {
            let queued = self
                .runner
                .queue()
                .contains(&WorkItem::RunJob(id.clone()))?;
            if !queued && store.reset_to_idle(&id, JobStatus::Enqueued)? {
                report.orphaned_reset += 1;
            }
        }
        report.imports_failed = self.runner.imports().recover_unfinished().await?;

        if report != RecoveryReport::default() {
            warn!(?report, "recovered state from previous run");
        }
        Ok(report)
    }

    /// One trigger pass: enqueue every job that is due now.
    pub fn tick(&self) -> Result<usize> {
        let queued = self.runner.enqueue_ready(Utc::now())?;
        if queued > 0 {
            debug!(queued, "trigger enqueued jobs");
        }
        Ok(queued)
    }

    /// Run until `shutdown` broadcasts `true`. Workers finish the item they
    /// hold before exiting.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        if let Err(e) = self.claim_lease() {
            error!("scheduler engine not started: {e}");
            return;
        }
        info!(
            workers = self.workers,
            poll_ms = self.poll_interval.as_millis() as u64,
            owner = %self.owner,
            "scheduler engine started"
        );
        if let Err(e) = self.recover().await {
            error!("startup recovery failed: {e}");
        }

        // Workers stop on shutdown and when the lease is lost.
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut workers = JoinSet::new();
        for n in 0..self.workers {
            workers.spawn(worker(n, self.runner.clone(), stop_rx.clone()));
        }

        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.claim_lease() {
                        error!("lost the engine lease, stopping: {e}");
                        break;
                    }
                    if let Err(e) = self.tick() {
                        error!("scheduler tick error: {e}");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }

        let _ = stop_tx.send(true);
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("worker panicked: {e}");
            }
        }
        if let Err(e) = self.runner.store().release_lease(&self.owner) {
            warn!("could not release engine lease: {e}");
        }
        info!("scheduler engine stopped");
    }
}

async fn worker(n: usize, runner: Arc<JobRunner>, mut shutdown: watch::Receiver<bool>) {
    debug!(worker = n, "worker started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        match runner.queue().dequeue() {
            Ok(Some(item)) => process(&runner, item).await,
            Ok(None) => {
                tokio::select! {
                    _ = runner.queue().notified() => {}
                    _ = tokio::time::sleep(IDLE_POLL) => {}
                    _ = shutdown.changed() => {}
                }
            }
            Err(e) => {
                error!(worker = n, "dequeue failed: {e}");
                tokio::time::sleep(IDLE_POLL).await;
            }
        }
    }
    debug!(worker = n, "worker stopped");
}

/// Execute one work item. Errors are logged here; nothing propagates.
pub async fn process(runner: &JobRunner, item: WorkItem) {
    match item {
        WorkItem::RunJob(id) => match runner.run(&id).await {
            Ok(report) if report.succeeded() => {
                info!(job_id = %id, tasks = report.executed.len(), "job succeeded")
            }
            Ok(report) => warn!(
                job_id = %id,
                failed_task = ?report.failed_task,
                reason = report.failure.as_deref().unwrap_or_default(),
                "job failed"
            ),
            Err(SchedulerError::AlreadyRunning { .. }) => {
                info!(job_id = %id, "job already running, skipped")
            }
            Err(SchedulerError::JobNotFound { .. }) => {
                warn!(job_id = %id, "queued job no longer exists")
            }
            Err(e) => error!(job_id = %id, "job run error: {e}"),
        },
        WorkItem::RunImport(id) => {
            if let Err(e) = runner.imports().run_import(&id).await {
                error!(import_id = %id, "import failed: {e}");
            }
        }
    }
}
