use std::sync::Arc;

use chrono::{DateTime, Utc};
use conduit_core::{
    events::{DomainEvent, EventSink},
    types::{ImportId, JobId},
};
use tracing::{error, info, instrument, warn};

use crate::{
    error::Result,
    queue::{WorkItem, WorkQueue},
    store::JobStore,
    task::ImportRunner,
    types::{Job, JobStatus},
};

/// What happened during one job run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub job_id: JobId,
    /// Indices of the tasks that were started, in order.
    pub executed: Vec<u32>,
    /// Index of the task that failed, if one did.
    pub failed_task: Option<u32>,
    pub failure: Option<String>,
    pub next_run: DateTime<Utc>,
    /// The run pushed `next_run` past `end_run` and the job was disabled.
    pub disabled: bool,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Enqueues jobs and runs them task by task.
pub struct JobRunner {
    store: Arc<JobStore>,
    queue: Arc<WorkQueue>,
    imports: Arc<dyn ImportRunner>,
    events: Arc<dyn EventSink>,
}

impl JobRunner {
    pub fn new(
        store: Arc<JobStore>,
        queue: Arc<WorkQueue>,
        imports: Arc<dyn ImportRunner>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            queue,
            imports,
            events,
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    pub fn imports(&self) -> &Arc<dyn ImportRunner> {
        &self.imports
    }

    /// Put an idle job on the work queue.
    ///
    /// Jobs already enqueued or running are left alone; returns whether the
    /// job was queued by this call.
    pub fn enqueue(&self, id: &JobId) -> Result<bool> {
        if !self.store.mark_enqueued(id)? {
            info!(job_id = %id, "job not idle, not enqueued");
            return Ok(false);
        }
        self.queue.enqueue_if_not_queued(&WorkItem::RunJob(id.clone()))?;
        info!(job_id = %id, "job enqueued");
        Ok(true)
    }

    /// Queue an existing import for the worker pool.
    pub fn enqueue_import(&self, id: &ImportId) -> Result<bool> {
        self.queue
            .enqueue_if_not_queued(&WorkItem::RunImport(id.clone()))
    }

    /// Enqueue every job due at `now`. Returns how many were queued.
    pub fn enqueue_ready(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut queued = 0;
        for job in self.store.ready_to_run(now)? {
            match self.enqueue(&job.id) {
                Ok(true) => queued += 1,
                Ok(false) => {}
                Err(e) => error!(job_id = %job.id, "could not enqueue job: {e}"),
            }
        }
        Ok(queued)
    }

    /// Run the job's tasks in order, stopping at the first failure, then
    /// advance its schedule and return it to idle.
    ///
    /// Task failures are reported in the [`RunReport`] and as a `JobFailed`
    /// event, never as an `Err`.
    #[instrument(skip(self, id), fields(job_id = %id))]
    pub async fn run(&self, id: &JobId) -> Result<RunReport> {
        let job = self.store.begin_run(id)?;
        info!(name = %job.name, "job run started");

        let (executed, failed_task, failure) = self.execute_tasks(&job).await;

        let last_run = Utc::now();
        let (next_run, disabled) = match job.schedule.apply(job.next_run) {
            Ok(next) => (next, job.expires_before(next)),
            Err(e) => {
                error!("cannot advance schedule, disabling job: {e}");
                (job.next_run, true)
            }
        };
        let mut failure = failure;
        let finished = self.store.finish_run(id, last_run, next_run, disabled);
        match &finished {
            Ok(()) if disabled => info!(%next_run, "job passed its end date and was disabled"),
            Ok(()) => {}
            Err(e) => {
                error!("could not record end of run: {e}");
                if let Err(re) = self.store.reset_to_idle(id, JobStatus::Running) {
                    error!("could not return job to idle: {re}");
                }
                failure.get_or_insert_with(|| e.to_string());
            }
        }

        self.publish_outcome(&job, failure.as_deref());
        finished?;

        Ok(RunReport {
            job_id: id.clone(),
            executed,
            failed_task,
            failure,
            next_run,
            disabled,
        })
    }

    async fn execute_tasks(&self, job: &Job) -> (Vec<u32>, Option<u32>, Option<String>) {
        let tasks = match self.store.tasks(&job.id) {
            Ok(tasks) => tasks,
            Err(e) => return (Vec::new(), None, Some(e.to_string())),
        };

        let mut executed = Vec::with_capacity(tasks.len());
        for task in &tasks {
            executed.push(task.index);
            info!(index = task.index, action = task.action.name(), "task started");
            if let Err(e) = task.action.execute(job, self.imports.as_ref()).await {
                warn!(index = task.index, "task failed: {e}");
                return (executed, Some(task.index), Some(e.to_string()));
            }
        }
        (executed, None, None)
    }

    fn publish_outcome(&self, job: &Job, failure: Option<&str>) {
        let event = match failure {
            None => DomainEvent::JobSucceeded {
                workspace_id: job.workspace_id.clone(),
                job_id: job.id.clone(),
                job_name: job.name.clone(),
            },
            Some(reason) => DomainEvent::JobFailed {
                workspace_id: job.workspace_id.clone(),
                job_id: job.id.clone(),
                job_name: job.name.clone(),
                reason: reason.to_string(),
            },
        };
        let kind = event.kind();
        match self.events.publish(&job.owner_id, event) {
            Ok(event_id) => info!(%event_id, kind, "job outcome published"),
            Err(e) => error!(kind, "could not publish job outcome: {e}"),
        }
    }
}
