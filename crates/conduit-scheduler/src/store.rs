use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use conduit_core::types::{JobId, TaskId, WorkspaceId};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::{
    db::init_db,
    error::{Result, SchedulerError},
    task::TaskAction,
    types::{expires_before, IntervalUnit, Job, JobStatus, JobUpdate, NewJob, Schedule, Task},
};

const JOB_COLUMNS: &str = "id, workspace_id, owner_id, name, interval_value, interval_unit,
    next_run, last_run, end_run, enabled, status, deleted_at, created_at";

/// Durable job and task definitions plus the status transitions of a run.
///
/// Status changes that guard concurrency (`mark_enqueued`, `begin_run`) are
/// single conditional `UPDATE`s, so two workers can never both win.
pub struct JobStore {
    db: Mutex<Connection>,
}

impl JobStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Insert a new, disabled job.
    pub fn create(&self, new: &NewJob) -> Result<Job> {
        new.schedule.validate()?;
        let id = JobId::new();
        let now = Utc::now();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO jobs
             (id, workspace_id, owner_id, name, interval_value, interval_unit, next_run,
              end_run, enabled, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, 'idle', ?9, ?9)",
            rusqlite::params![
                id.as_str(),
                new.workspace_id.as_str(),
                new.owner_id.as_str(),
                new.name,
                new.schedule.interval_value,
                new.schedule.interval_unit.to_string(),
                ts(new.next_run),
                new.end_run.map(|d| d.to_string()),
                ts(now)
            ],
        )
        .map_err(|e| unique_violation(e, &new.name))?;
        info!(job_id = %id, name = %new.name, "job created");

        Ok(Job {
            id,
            workspace_id: new.workspace_id.clone(),
            owner_id: new.owner_id.clone(),
            name: new.name.clone(),
            schedule: new.schedule,
            next_run: new.next_run,
            last_run: None,
            end_run: new.end_run,
            enabled: false,
            status: JobStatus::Idle,
            deleted_at: None,
            created_at: now,
        })
    }

    /// A live (not soft-deleted) job.
    pub fn get(&self, id: &JobId) -> Result<Option<Job>> {
        let db = self.db.lock().unwrap();
        live_job(&db, id)
    }

    fn require(&self, id: &JobId) -> Result<Job> {
        self.get(id)?.ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })
    }

    /// Live jobs of a workspace, by name.
    pub fn list(&self, workspace_id: &WorkspaceId) -> Result<Vec<Job>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE workspace_id = ?1 AND deleted_at IS NULL ORDER BY name"
        ))?;
        let jobs = stmt
            .query_map([workspace_id.as_str()], row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    /// Apply `update`. A job whose end date now falls before its next run
    /// is disabled in the same write.
    ///
    /// Read and write share one immediate transaction and only the fields
    /// present in `update` are written, so a run finishing concurrently
    /// keeps the `next_run` and `enabled` it recorded.
    pub fn update(&self, id: &JobId, update: &JobUpdate) -> Result<Job> {
        if let Some(schedule) = update.schedule {
            schedule.validate()?;
        }
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut job = live_job(&tx, id)?.ok_or_else(|| SchedulerError::JobNotFound {
            id: id.to_string(),
        })?;
        if let Some(name) = &update.name {
            job.name = name.clone();
        }
        if let Some(schedule) = update.schedule {
            job.schedule = schedule;
        }
        if let Some(next_run) = update.next_run {
            job.next_run = next_run;
        }
        if let Some(end_run) = update.end_run {
            job.end_run = end_run;
        }
        let disable = job.enabled && job.expires_before(job.next_run);
        if disable {
            warn!(job_id = %id, "end_run precedes next_run, disabling job");
            job.enabled = false;
        }

        tx.execute(
            "UPDATE jobs SET name = COALESCE(?1, name),
                    interval_value = COALESCE(?2, interval_value),
                    interval_unit = COALESCE(?3, interval_unit),
                    next_run = COALESCE(?4, next_run),
                    end_run = CASE WHEN ?5 THEN ?6 ELSE end_run END,
                    enabled = CASE WHEN ?7 THEN 0 ELSE enabled END,
                    updated_at = ?8
             WHERE id = ?9 AND deleted_at IS NULL",
            rusqlite::params![
                update.name,
                update.schedule.map(|s| s.interval_value),
                update.schedule.map(|s| s.interval_unit.to_string()),
                update.next_run.map(ts),
                update.end_run.is_some(),
                job.end_run.map(|d| d.to_string()),
                disable,
                ts(Utc::now()),
                id.as_str()
            ],
        )
        .map_err(|e| unique_violation(e, &job.name))?;
        tx.commit()?;
        Ok(job)
    }

    /// Enable the job, unless it has already expired.
    pub fn enable(&self, id: &JobId) -> Result<Job> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut job = live_job(&tx, id)?.ok_or_else(|| SchedulerError::JobNotFound {
            id: id.to_string(),
        })?;
        job.enabled = !job.expires_before(job.next_run);
        if !job.enabled {
            warn!(job_id = %id, "end_run precedes next_run, job stays disabled");
        }
        tx.execute(
            "UPDATE jobs SET enabled = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![job.enabled, ts(Utc::now()), id.as_str()],
        )?;
        tx.commit()?;
        Ok(job)
    }

    pub fn disable(&self, id: &JobId) -> Result<Job> {
        let mut job = self.require(id)?;
        job.enabled = false;
        self.set_enabled(id, false)?;
        Ok(job)
    }

    fn set_enabled(&self, id: &JobId, enabled: bool) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE jobs SET enabled = ?1, updated_at = ?2 WHERE id = ?3 AND deleted_at IS NULL",
            rusqlite::params![enabled, ts(Utc::now()), id.as_str()],
        )?;
        Ok(())
    }

    /// Soft-delete: the row stays, but leaves name checks and the trigger.
    pub fn delete(&self, id: &JobId) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE jobs SET deleted_at = ?1, enabled = 0, updated_at = ?1
             WHERE id = ?2 AND deleted_at IS NULL",
            rusqlite::params![ts(Utc::now()), id.as_str()],
        )?;
        if n == 0 {
            return Err(SchedulerError::JobNotFound { id: id.to_string() });
        }
        info!(job_id = %id, "job deleted");
        Ok(())
    }

    // --- tasks -------------------------------------------------------------

    /// Add a task at `index`, or after the current last task when `None`.
    pub fn add_task(&self, job_id: &JobId, index: Option<u32>, action: TaskAction) -> Result<Task> {
        self.require(job_id)?;
        let payload =
            serde_json::to_string(&action).map_err(|e| SchedulerError::InvalidTask(e.to_string()))?;
        let id = TaskId::new();
        let db = self.db.lock().unwrap();
        let index = match index {
            Some(i) => i,
            None => db.query_row(
                "SELECT COALESCE(MAX(idx) + 1, 0) FROM job_tasks WHERE job_id = ?1",
                [job_id.as_str()],
                |row| row.get(0),
            )?,
        };
        db.execute(
            "INSERT INTO job_tasks (id, job_id, idx, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![id.as_str(), job_id.as_str(), index, payload, ts(Utc::now())],
        )
        .map_err(|e| match e.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => {
                SchedulerError::InvalidTask(format!("index {index} is already used"))
            }
            _ => e.into(),
        })?;
        debug!(job_id = %job_id, index, action = action.name(), "task added");
        Ok(Task {
            id,
            job_id: job_id.clone(),
            index,
            action,
        })
    }

    pub fn remove_task(&self, task_id: &TaskId) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let n = db.execute("DELETE FROM job_tasks WHERE id = ?1", [task_id.as_str()])?;
        Ok(n == 1)
    }

    /// The job's tasks in execution order.
    pub fn tasks(&self, job_id: &JobId) -> Result<Vec<Task>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, job_id, idx, payload FROM job_tasks WHERE job_id = ?1 ORDER BY idx",
        )?;
        let rows = stmt
            .query_map([job_id.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, u32>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(id, job_id, index, payload)| -> Result<Task> {
                let action: TaskAction = serde_json::from_str(&payload)
                    .map_err(|e| SchedulerError::InvalidTask(format!("task {id}: {e}")))?;
                Ok(Task {
                    id: id.into(),
                    job_id: job_id.into(),
                    index,
                    action,
                })
            })
            .collect()
    }

    // --- scheduling ----------------------------------------------------------

    /// Enabled, live jobs due at `now`, oldest first. Read-only.
    pub fn ready_to_run(&self, now: DateTime<Utc>) -> Result<Vec<Job>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare_cached(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE enabled = 1 AND deleted_at IS NULL AND next_run <= ?1
             ORDER BY next_run"
        ))?;
        let jobs = stmt
            .query_map([ts(now)], row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    /// `idle → enqueued`. Returns `false` when the job is not idle (or gone).
    pub fn mark_enqueued(&self, id: &JobId) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE jobs SET status = 'enqueued', updated_at = ?1
             WHERE id = ?2 AND status = 'idle' AND deleted_at IS NULL",
            rusqlite::params![ts(Utc::now()), id.as_str()],
        )?;
        Ok(n == 1)
    }

    /// Claim the job for a run (`idle | enqueued → running`).
    pub fn begin_run(&self, id: &JobId) -> Result<Job> {
        let claimed = {
            let db = self.db.lock().unwrap();
            db.execute(
                "UPDATE jobs SET status = 'running', updated_at = ?1
                 WHERE id = ?2 AND status <> 'running' AND deleted_at IS NULL",
                rusqlite::params![ts(Utc::now()), id.as_str()],
            )?
        };
        let job = self.require(id)?;
        if claimed == 0 {
            return Err(SchedulerError::AlreadyRunning { id: id.to_string() });
        }
        Ok(job)
    }

    /// Record the end of a run and return the job to `idle`.
    pub fn finish_run(
        &self,
        id: &JobId,
        last_run: DateTime<Utc>,
        next_run: DateTime<Utc>,
        disable: bool,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE jobs SET status = 'idle', last_run = ?1, next_run = ?2,
                    enabled = CASE WHEN ?3 THEN 0 ELSE enabled END, updated_at = ?1
             WHERE id = ?4",
            rusqlite::params![ts(last_run), ts(next_run), disable, id.as_str()],
        )?;
        Ok(())
    }

    // --- engine lease ---------------------------------------------------------

    /// Take or renew the engine lease for `owner`.
    ///
    /// Succeeds when the lease is free, already held by `owner`, or its
    /// holder has not renewed it within `ttl`.
    pub fn acquire_lease(
        &self,
        owner: &str,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "INSERT INTO engine_lease (id, owner, heartbeat) VALUES (1, ?1, ?2)
             ON CONFLICT (id) DO UPDATE SET owner = excluded.owner, heartbeat = excluded.heartbeat
             WHERE engine_lease.owner = excluded.owner OR engine_lease.heartbeat < ?3",
            rusqlite::params![owner, ts(now), ts(now - ttl)],
        )?;
        Ok(n == 1)
    }

    pub fn lease_holder(&self) -> Result<Option<String>> {
        let db = self.db.lock().unwrap();
        let owner = db
            .query_row("SELECT owner FROM engine_lease WHERE id = 1", [], |row| row.get(0))
            .optional()?;
        Ok(owner)
    }

    /// Give the lease up if `owner` still holds it.
    pub fn release_lease(&self, owner: &str) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let n = db.execute("DELETE FROM engine_lease WHERE id = 1 AND owner = ?1", [owner])?;
        Ok(n == 1)
    }

    // --- recovery --------------------------------------------------------------

    /// Jobs currently in `status`, live or not.
    pub fn with_status(&self, status: JobStatus) -> Result<Vec<JobId>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare("SELECT id FROM jobs WHERE status = ?1")?;
        let ids = stmt
            .query_map([status.to_string()], |row| row.get::<_, String>(0))?
            .map(|r| r.map(JobId::from))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// Force a job from `from` back to `idle`.
    pub fn reset_to_idle(&self, id: &JobId, from: JobStatus) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE jobs SET status = 'idle', updated_at = ?1 WHERE id = ?2 AND status = ?3",
            rusqlite::params![ts(Utc::now()), id.as_str(), from.to_string()],
        )?;
        Ok(n == 1)
    }
}

fn live_job(conn: &Connection, id: &JobId) -> Result<Option<Job>> {
    let job = conn
        .query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1 AND deleted_at IS NULL"),
            [id.as_str()],
            row_to_job,
        )
        .optional()?;
    Ok(job)
}

/// Fixed-width UTC timestamps, so text comparison in SQL is chronological.
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn unique_violation(e: rusqlite::Error, name: &str) -> SchedulerError {
    match e.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => SchedulerError::DuplicateName {
            name: name.to_string(),
        },
        _ => e.into(),
    }
}

fn conversion_error(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn parse_ts(idx: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn parse_opt_ts(idx: usize, value: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_ts(idx, v)).transpose()
}

fn parse_enum<T: std::str::FromStr<Err = String>>(idx: usize, value: String) -> rusqlite::Result<T> {
    value.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    let end_run = row
        .get::<_, Option<String>>(8)?
        .map(|d| d.parse::<NaiveDate>().map_err(|e| conversion_error(8, e)))
        .transpose()?;
    Ok(Job {
        id: row.get::<_, String>(0)?.into(),
        workspace_id: row.get::<_, String>(1)?.into(),
        owner_id: row.get::<_, String>(2)?.into(),
        name: row.get(3)?,
        schedule: Schedule {
            interval_value: row.get(4)?,
            interval_unit: parse_enum::<IntervalUnit>(5, row.get(5)?)?,
        },
        next_run: parse_ts(6, row.get(6)?)?,
        last_run: parse_opt_ts(7, row.get(7)?)?,
        end_run,
        enabled: row.get(9)?,
        status: parse_enum::<JobStatus>(10, row.get(10)?)?,
        deleted_at: parse_opt_ts(11, row.get(11)?)?,
        created_at: parse_ts(12, row.get(12)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn store() -> JobStore {
        JobStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn new_job(name: &str, next_run: DateTime<Utc>) -> NewJob {
        NewJob {
            workspace_id: "ws-1".into(),
            owner_id: "u-1".into(),
            name: name.into(),
            schedule: Schedule::new(1, IntervalUnit::Days),
            next_run,
            end_run: None,
        }
    }

    fn command(text: &str) -> TaskAction {
        TaskAction::RunCommand {
            command: "echo".into(),
            args: vec![text.into()],
            timeout_secs: 5,
        }
    }

    #[test]
    fn jobs_are_created_disabled_and_idle() {
        let store = store();
        let job = store.create(&new_job("nightly", Utc::now())).unwrap();
        assert!(!job.enabled);
        assert_eq!(job.status, JobStatus::Idle);

        let loaded = store.get(&job.id).unwrap().unwrap();
        assert!(!loaded.enabled);
        assert_eq!(loaded.schedule, job.schedule);
    }

    #[test]
    fn names_unique_among_live_jobs_of_a_workspace() {
        let store = store();
        let first = store.create(&new_job("nightly", Utc::now())).unwrap();
        assert!(matches!(
            store.create(&new_job("nightly", Utc::now())),
            Err(SchedulerError::DuplicateName { .. })
        ));

        let mut elsewhere = new_job("nightly", Utc::now());
        elsewhere.workspace_id = "ws-2".into();
        store.create(&elsewhere).unwrap();

        store.delete(&first.id).unwrap();
        store.create(&new_job("nightly", Utc::now())).unwrap();
    }

    #[test]
    fn renaming_onto_a_taken_name_fails() {
        let store = store();
        store.create(&new_job("nightly", Utc::now())).unwrap();
        let other = store.create(&new_job("hourly", Utc::now())).unwrap();
        let update = JobUpdate {
            name: Some("nightly".into()),
            ..JobUpdate::default()
        };
        assert!(matches!(
            store.update(&other.id, &update),
            Err(SchedulerError::DuplicateName { .. })
        ));
    }

    #[test]
    fn ready_to_run_filters_enabled_due_live_jobs() {
        let store = store();
        let now = Utc::now();
        let past = store.create(&new_job("past_enabled", now - Duration::seconds(30))).unwrap();
        let future = store.create(&new_job("future_enabled", now + Duration::days(1))).unwrap();
        let _disabled = store.create(&new_job("past_disabled", now - Duration::days(1))).unwrap();
        let deleted = store.create(&new_job("past_deleted", now - Duration::days(2))).unwrap();
        store.enable(&past.id).unwrap();
        store.enable(&future.id).unwrap();
        store.enable(&deleted.id).unwrap();
        store.delete(&deleted.id).unwrap();

        let ready: Vec<JobId> = store.ready_to_run(now).unwrap().into_iter().map(|j| j.id).collect();
        assert_eq!(ready, vec![past.id]);
    }

    #[test]
    fn update_disables_expiring_job() {
        let store = store();
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let job = store.create(&new_job("impossible", now)).unwrap();
        store.enable(&job.id).unwrap();

        let update = JobUpdate {
            next_run: Some(now + Duration::hours(1)),
            end_run: Some(Some(now.date_naive())),
            ..JobUpdate::default()
        };
        let updated = store.update(&job.id, &update).unwrap();
        assert!(!updated.enabled);
        assert!(!store.get(&job.id).unwrap().unwrap().enabled);
    }

    #[test]
    fn update_keeps_what_a_finished_run_recorded() {
        let store = store();
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let job = store.create(&new_job("nightly", start)).unwrap();
        store.enable(&job.id).unwrap();

        let next = start + Duration::days(1);
        store.begin_run(&job.id).unwrap();
        store.finish_run(&job.id, start, next, true).unwrap();

        let renamed = store
            .update(
                &job.id,
                &JobUpdate {
                    name: Some("nightly-v2".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(renamed.name, "nightly-v2");
        let loaded = store.get(&job.id).unwrap().unwrap();
        assert_eq!(loaded.next_run, next);
        assert!(!loaded.enabled);
        assert_eq!(loaded.status, JobStatus::Idle);
    }

    #[test]
    fn update_of_unknown_job_is_not_found() {
        let store = store();
        assert!(matches!(
            store.update(&"missing".into(), &JobUpdate::default()),
            Err(SchedulerError::JobNotFound { .. })
        ));
    }

    #[test]
    fn engine_lease_is_exclusive_until_stale() {
        let store = store();
        let now = Utc::now();
        let ttl = Duration::seconds(30);
        assert_eq!(store.lease_holder().unwrap(), None);
        assert!(store.acquire_lease("a", now, ttl).unwrap());
        assert!(!store.acquire_lease("b", now, ttl).unwrap());
        // Renewal by the holder keeps it.
        assert!(store.acquire_lease("a", now + Duration::seconds(20), ttl).unwrap());
        assert!(!store.acquire_lease("b", now + Duration::seconds(40), ttl).unwrap());
        // A holder silent for longer than the ttl loses it.
        assert!(store.acquire_lease("b", now + Duration::seconds(60), ttl).unwrap());
        assert_eq!(store.lease_holder().unwrap().as_deref(), Some("b"));

        assert!(!store.release_lease("a").unwrap());
        assert!(store.release_lease("b").unwrap());
        assert!(store.acquire_lease("a", now, ttl).unwrap());
    }

    #[test]
    fn enable_refuses_expired_job() {
        let store = store();
        let mut new = new_job("expired", Utc::now() + Duration::days(3));
        new.end_run = Some(Utc::now().date_naive());
        let job = store.create(&new).unwrap();
        assert!(!store.enable(&job.id).unwrap().enabled);
    }

    #[test]
    fn tasks_come_back_in_index_order() {
        let store = store();
        let job = store.create(&new_job("multi", Utc::now())).unwrap();
        store.add_task(&job.id, Some(2), command("c")).unwrap();
        store.add_task(&job.id, Some(0), command("a")).unwrap();
        store.add_task(&job.id, Some(1), command("b")).unwrap();
        let appended = store.add_task(&job.id, None, command("d")).unwrap();
        assert_eq!(appended.index, 3);

        let indices: Vec<u32> = store.tasks(&job.id).unwrap().iter().map(|t| t.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert!(matches!(
            store.add_task(&job.id, Some(1), command("dup")),
            Err(SchedulerError::InvalidTask(_))
        ));
    }

    #[test]
    fn begin_run_is_a_compare_and_set() {
        let store = store();
        let job = store.create(&new_job("nightly", Utc::now())).unwrap();
        assert!(store.mark_enqueued(&job.id).unwrap());
        assert!(!store.mark_enqueued(&job.id).unwrap());

        let running = store.begin_run(&job.id).unwrap();
        assert_eq!(running.status, JobStatus::Running);
        assert!(matches!(
            store.begin_run(&job.id),
            Err(SchedulerError::AlreadyRunning { .. })
        ));
        assert!(!store.mark_enqueued(&job.id).unwrap());

        store.delete(&job.id).unwrap();
        assert!(matches!(
            store.begin_run(&job.id),
            Err(SchedulerError::JobNotFound { .. })
        ));
    }

    #[test]
    fn finish_run_returns_to_idle_and_optionally_disables() {
        let store = store();
        let job = store.create(&new_job("nightly", Utc::now())).unwrap();
        store.enable(&job.id).unwrap();
        store.begin_run(&job.id).unwrap();

        let now = Utc::now();
        let next = now + Duration::days(1);
        store.finish_run(&job.id, now, next, true).unwrap();
        let loaded = store.get(&job.id).unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Idle);
        assert!(!loaded.enabled);
        assert_eq!(ts(loaded.next_run), ts(next));
        assert_eq!(loaded.last_run.map(ts), Some(ts(now)));
    }

    #[test]
    fn reset_to_idle_only_moves_matching_status() {
        let store = store();
        let job = store.create(&new_job("nightly", Utc::now())).unwrap();
        store.begin_run(&job.id).unwrap();
        assert_eq!(store.with_status(JobStatus::Running).unwrap(), vec![job.id.clone()]);
        assert!(!store.reset_to_idle(&job.id, JobStatus::Enqueued).unwrap());
        assert!(store.reset_to_idle(&job.id, JobStatus::Running).unwrap());
        assert!(store.with_status(JobStatus::Running).unwrap().is_empty());
    }
}
