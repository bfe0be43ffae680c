//! Domain events emitted by job runs and imports.
//!
//! The scheduler and the import executor only ever talk to an [`EventSink`];
//! how events are stored, fanned out to activity feeds or turned into
//! notifications is up to the sink.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{
    DatasetId, EventId, ImportId, ImportScheduleId, JobId, UserId, WorkspaceId,
};

/// What created an import: a one-off request or a recurring schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ImportReference {
    Import(ImportId),
    Schedule(ImportScheduleId),
}

impl ImportReference {
    pub fn kind(&self) -> &'static str {
        match self {
            ImportReference::Import(_) => "import",
            ImportReference::Schedule(_) => "schedule",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ImportReference::Import(id) => id.as_str(),
            ImportReference::Schedule(id) => id.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    JobSucceeded {
        workspace_id: WorkspaceId,
        job_id: JobId,
        job_name: String,
    },
    JobFailed {
        workspace_id: WorkspaceId,
        job_id: JobId,
        job_name: String,
        reason: String,
    },
    /// Published when an import is requested. `dataset_id` is filled in
    /// later, once the destination table exists.
    DatasetImportCreated {
        workspace_id: WorkspaceId,
        source_dataset_id: DatasetId,
        destination_table: String,
        reference: ImportReference,
        dataset_id: Option<DatasetId>,
    },
    DatasetImportSuccess {
        workspace_id: WorkspaceId,
        source_dataset_id: DatasetId,
        dataset_id: Option<DatasetId>,
    },
    DatasetImportFailed {
        workspace_id: WorkspaceId,
        source_dataset_id: DatasetId,
        destination_table: String,
        error_message: String,
        dataset_id: Option<DatasetId>,
    },
}

impl DomainEvent {
    /// Stable type name, used as the stored event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::JobSucceeded { .. } => "JobSucceeded",
            DomainEvent::JobFailed { .. } => "JobFailed",
            DomainEvent::DatasetImportCreated { .. } => "DatasetImportCreated",
            DomainEvent::DatasetImportSuccess { .. } => "DatasetImportSuccess",
            DomainEvent::DatasetImportFailed { .. } => "DatasetImportFailed",
        }
    }

    pub fn workspace_id(&self) -> &WorkspaceId {
        match self {
            DomainEvent::JobSucceeded { workspace_id, .. }
            | DomainEvent::JobFailed { workspace_id, .. }
            | DomainEvent::DatasetImportCreated { workspace_id, .. }
            | DomainEvent::DatasetImportSuccess { workspace_id, .. }
            | DomainEvent::DatasetImportFailed { workspace_id, .. } => workspace_id,
        }
    }

    /// Primary target of the event: the job, or the source dataset of an import.
    pub fn target(&self) -> &str {
        match self {
            DomainEvent::JobSucceeded { job_id, .. } | DomainEvent::JobFailed { job_id, .. } => {
                job_id.as_str()
            }
            DomainEvent::DatasetImportCreated {
                source_dataset_id, ..
            }
            | DomainEvent::DatasetImportSuccess {
                source_dataset_id, ..
            }
            | DomainEvent::DatasetImportFailed {
                source_dataset_id, ..
            } => source_dataset_id.as_str(),
        }
    }
}

/// Receives domain events and user notifications.
///
/// Implementations must be cheap to call from a worker; they run inline with
/// job and import finalisation.
pub trait EventSink: Send + Sync {
    /// Record an event performed by `actor` and return its id.
    fn publish(&self, actor: &UserId, event: DomainEvent) -> Result<EventId>;

    /// Point `recipient` at a previously published event.
    fn notify(&self, recipient: &UserId, event_id: &EventId) -> Result<()>;

    /// Attach the resolved destination dataset to the most recent
    /// `DatasetImportCreated` event for this source, workspace and reference.
    ///
    /// Returns `false` when no such event exists.
    fn link_import_created(
        &self,
        workspace_id: &WorkspaceId,
        source_dataset_id: &DatasetId,
        reference: &ImportReference,
        dataset_id: Option<&DatasetId>,
    ) -> Result<bool>;
}
