use chrono::{DateTime, NaiveDate, Utc};
use conduit_core::types::{JobId, TaskId, UserId, WorkspaceId};
use serde::{Deserialize, Serialize};

use crate::task::TaskAction;

/// Unit of a job's repeat interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
}

impl std::fmt::Display for IntervalUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IntervalUnit::Minutes => "minutes",
            IntervalUnit::Hours => "hours",
            IntervalUnit::Days => "days",
            IntervalUnit::Weeks => "weeks",
            IntervalUnit::Months => "months",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for IntervalUnit {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "minutes" => Ok(IntervalUnit::Minutes),
            "hours" => Ok(IntervalUnit::Hours),
            "days" => Ok(IntervalUnit::Days),
            "weeks" => Ok(IntervalUnit::Weeks),
            "months" => Ok(IntervalUnit::Months),
            other => Err(format!("unknown interval unit: {other}")),
        }
    }
}

/// How often a job repeats: every `interval_value` `interval_unit`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub interval_value: u32,
    pub interval_unit: IntervalUnit,
}

impl Schedule {
    pub fn new(interval_value: u32, interval_unit: IntervalUnit) -> Self {
        Self {
            interval_value,
            interval_unit,
        }
    }
}

/// Execution state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Not queued and not running.
    Idle,
    /// Sitting in the work queue.
    Enqueued,
    /// A worker is executing its tasks.
    Running,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Idle => "idle",
            JobStatus::Enqueued => "enqueued",
            JobStatus::Running => "running",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "idle" => Ok(JobStatus::Idle),
            "enqueued" => Ok(JobStatus::Enqueued),
            "running" => Ok(JobStatus::Running),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// A persisted job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub workspace_id: WorkspaceId,
    /// Acts for the job: events are attributed to and imports run as this user.
    pub owner_id: UserId,
    /// Unique among live jobs of the workspace.
    pub name: String,
    pub schedule: Schedule,
    pub next_run: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    /// Last calendar day (UTC) the job may be scheduled on.
    pub end_run: Option<NaiveDate>,
    pub enabled: bool,
    pub status: JobStatus,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// True when `end_run` (taken as midnight UTC) falls before `next_run`.
    pub fn expires_before(&self, next_run: DateTime<Utc>) -> bool {
        expires_before(self.end_run, next_run)
    }
}

pub(crate) fn expires_before(end_run: Option<NaiveDate>, next_run: DateTime<Utc>) -> bool {
    end_run
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .is_some_and(|end| end.and_utc() < next_run)
}

/// Parameters for a new job. Jobs are created disabled.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub workspace_id: WorkspaceId,
    pub owner_id: UserId,
    pub name: String,
    pub schedule: Schedule,
    pub next_run: DateTime<Utc>,
    pub end_run: Option<NaiveDate>,
}

/// Partial update of a job's definition. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub name: Option<String>,
    pub schedule: Option<Schedule>,
    pub next_run: Option<DateTime<Utc>>,
    /// `Some(None)` clears the end date.
    pub end_run: Option<Option<NaiveDate>>,
}

/// One step of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub job_id: JobId,
    /// Tasks run in ascending index order.
    pub index: u32,
    pub action: TaskAction,
}
