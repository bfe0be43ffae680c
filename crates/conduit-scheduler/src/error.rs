use conduit_core::error::CoreError;
use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The provided schedule definition is invalid or unsupported.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// No live job with the given ID exists in the store.
    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    /// Another live job in the workspace already uses this name.
    #[error("Job name already taken in workspace: {name}")]
    DuplicateName { name: String },

    /// A run was requested while the job is already running.
    #[error("Job is already running: {id}")]
    AlreadyRunning { id: String },

    /// Another live engine holds the database.
    #[error("Scheduler engine already running against this database: {owner}")]
    EngineBusy { owner: String },

    /// A task payload could not be encoded or decoded.
    #[error("Invalid task payload: {0}")]
    InvalidTask(String),

    /// A `run_command` task exited unsuccessfully or timed out.
    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error(transparent)]
    Import(#[from] conduit_import::ImportError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
