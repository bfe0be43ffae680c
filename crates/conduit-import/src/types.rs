use chrono::{DateTime, Utc};
use conduit_core::{
    events::ImportReference,
    types::{DataSourceId, DatasetId, ImportId, ImportScheduleId, UserId, WorkspaceId},
};
use serde::{Deserialize, Serialize};

use crate::pipe::TransferChannel;

/// Database product behind a data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vendor {
    Postgres,
    Greenplum,
    Oracle,
}

impl Vendor {
    /// Whether copies out of this vendor need the vendor-specific strategy.
    pub fn is_foreign(&self) -> bool {
        matches!(self, Vendor::Oracle)
    }
}

impl std::fmt::Display for Vendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Vendor::Postgres => "postgres",
            Vendor::Greenplum => "greenplum",
            Vendor::Oracle => "oracle",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Vendor {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "postgres" => Ok(Vendor::Postgres),
            "greenplum" => Ok(Vendor::Greenplum),
            "oracle" => Ok(Vendor::Oracle),
            other => Err(format!("unknown vendor: {other}")),
        }
    }
}

/// A registered backend instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSource {
    pub id: DataSourceId,
    /// Matches a `[[data_sources]]` entry in the config.
    pub name: String,
    pub vendor: Vendor,
}

/// A schema on a specific physical database of a data source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaRef {
    pub data_source_id: DataSourceId,
    pub database: String,
    pub schema: String,
}

impl SchemaRef {
    pub fn new(data_source_id: DataSourceId, database: &str, schema: &str) -> Self {
        Self {
            data_source_id,
            database: database.to_string(),
            schema: schema.to_string(),
        }
    }

    /// True when both schemas live on the same physical database.
    pub fn same_database(&self, other: &SchemaRef) -> bool {
        self.data_source_id == other.data_source_id && self.database == other.database
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub name: String,
    /// Schema imports are written into; `None` until one is assigned.
    pub sandbox: Option<SchemaRef>,
    pub deleted_at: Option<String>,
}

impl Workspace {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A table or view known to the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub id: DatasetId,
    pub name: String,
    pub schema: SchemaRef,
    pub deleted_at: Option<String>,
}

impl Dataset {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// `schema.name`, as shown to users.
    pub fn scoped_name(&self) -> String {
        format!("{}.{}", self.schema.schema, self.name)
    }
}

/// Terminal state of an import. `Pending` until finalised, then write-once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportOutcome {
    Pending,
    Passed,
    Failed,
}

impl ImportOutcome {
    pub fn from_flag(success: Option<bool>) -> Self {
        match success {
            None => ImportOutcome::Pending,
            Some(true) => ImportOutcome::Passed,
            Some(false) => ImportOutcome::Failed,
        }
    }

    /// Column representation: NULL while pending.
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            ImportOutcome::Pending => None,
            ImportOutcome::Passed => Some(true),
            ImportOutcome::Failed => Some(false),
        }
    }

    pub fn is_finalized(&self) -> bool {
        !matches!(self, ImportOutcome::Pending)
    }
}

/// Parameters for a new import.
#[derive(Debug, Clone)]
pub struct NewImport {
    pub workspace_id: WorkspaceId,
    pub user_id: UserId,
    pub source_dataset_id: DatasetId,
    pub to_table: String,
    /// Copy at most this many rows; `None` copies everything.
    pub sample_count: Option<u64>,
    /// Empty an existing destination table before copying.
    pub truncate: bool,
    pub import_schedule_id: Option<ImportScheduleId>,
}

/// A persisted import record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Import {
    pub id: ImportId,
    pub workspace_id: WorkspaceId,
    pub user_id: UserId,
    pub source_dataset_id: DatasetId,
    pub to_table: String,
    pub sample_count: Option<u64>,
    pub truncate: bool,
    pub import_schedule_id: Option<ImportScheduleId>,
    pub destination_dataset_id: Option<DatasetId>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub success: ImportOutcome,
    pub message: Option<String>,
}

impl Import {
    /// Transfer channel for this import's named pipe and backend sessions.
    pub fn channel(&self) -> TransferChannel {
        TransferChannel::for_import(self.created_at, &self.id)
    }

    /// What the `DatasetImportCreated` event for this import refers to.
    pub fn reference(&self) -> ImportReference {
        match &self.import_schedule_id {
            Some(id) => ImportReference::Schedule(id.clone()),
            None => ImportReference::Import(self.id.clone()),
        }
    }
}
