use conduit_core::error::CoreError;
use thiserror::Error;

use crate::types::Vendor;

/// Failures talking to a data source backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend could not be reached or the pool could not be built.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A statement was rejected or failed mid-flight.
    #[error("Query error: {0}")]
    Query(String),

    /// No connection settings exist for the named data source.
    #[error("Data source not configured: {name}")]
    NotConfigured { name: String },

    /// This adapter cannot talk to the given vendor.
    #[error("Unsupported vendor: {0}")]
    UnsupportedVendor(Vendor),

    /// The session running the statement was terminated by a kill.
    #[error("Session terminated: {0}")]
    Terminated(String),
}

impl From<sqlx::Error> for BackendError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut => {
                BackendError::Connection(e.to_string())
            }
            other => BackendError::Query(other.to_string()),
        }
    }
}

/// Errors raised while creating, running or cancelling an import.
#[derive(Debug, Error)]
pub enum ImportError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A precondition failed before any copy work started. The message is
    /// stored verbatim on the import.
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    /// A cross-database copy needs a transfer directory for its named pipe.
    #[error("Transfer directory is not configured")]
    TransferNotConfigured,

    /// A reader session is already attached to this import's channel.
    #[error("Transfer already active on channel {0}")]
    TransferActive(String),

    #[error("Transfer pipe error: {0}")]
    Pipe(#[from] std::io::Error),

    /// The copy itself could not be carried out.
    #[error("Copy failed: {0}")]
    Copy(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type Result<T> = std::result::Result<T, ImportError>;
