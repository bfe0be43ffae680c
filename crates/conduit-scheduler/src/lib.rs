//! `conduit-scheduler`: recurring jobs, a deduplicating work queue and the
//! worker pool that runs them.
//!
//! # Overview
//!
//! Jobs and their ordered tasks are persisted in SQLite. The
//! [`engine::SchedulerEngine`] trigger calls
//! [`JobStore::ready_to_run`](store::JobStore::ready_to_run) every poll
//! interval and enqueues each due job; workers take items off the
//! [`queue::WorkQueue`] and hand them to the [`runner::JobRunner`].
//!
//! # Job status
//!
//! | From       | To         | By                                   |
//! |------------|------------|--------------------------------------|
//! | `idle`     | `enqueued` | `JobRunner::enqueue`                 |
//! | `idle`/`enqueued` | `running` | `JobStore::begin_run` (compare-and-set) |
//! | `running`  | `idle`     | end of every run, success or failure |
//!
//! The next run is always one interval after the previous *scheduled* run,
//! never after the moment the run happened to finish.

pub mod db;
pub mod engine;
pub mod error;
pub mod queue;
pub mod runner;
pub mod schedule;
pub mod store;
pub mod task;
pub mod types;

pub use engine::{RecoveryReport, SchedulerEngine};
pub use error::{Result, SchedulerError};
pub use queue::{WorkItem, WorkQueue};
pub use runner::{JobRunner, RunReport};
pub use store::JobStore;
pub use task::{ImportRunner, TaskAction};
pub use types::{IntervalUnit, Job, JobStatus, JobUpdate, NewJob, Schedule, Task};
