use std::sync::Mutex;

use chrono::{DateTime, Utc};
use conduit_core::types::{
    DataSourceId, DatasetId, ImportId, ImportScheduleId, UserId, WorkspaceId,
};
use rusqlite::{Connection, OptionalExtension, Row};
use tracing::{debug, info, instrument};

use crate::{
    db::init_db,
    error::{ImportError, Result},
    types::{DataSource, Dataset, Import, ImportOutcome, NewImport, SchemaRef, Vendor, Workspace},
};

const IMPORT_COLUMNS: &str = "id, workspace_id, user_id, source_dataset_id, to_table,
    sample_count, truncate, import_schedule_id, destination_dataset_id,
    created_at, started_at, finished_at, success, message";

const DATASET_COLUMNS: &str =
    "id, name, data_source_id, database_name, schema_name, deleted_at";

/// Persistence for imports and the slice of the catalog they read.
///
/// Wraps a single SQLite connection in a `Mutex`. Every method is one short
/// statement (or a small batch), so holding the lock across it is cheap.
pub struct ImportStore {
    db: Mutex<Connection>,
}

impl ImportStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    // --- catalog -----------------------------------------------------------

    /// Register a data source, or return the existing one with that name.
    pub fn register_data_source(&self, name: &str, vendor: Vendor) -> Result<DataSource> {
        let db = self.db.lock().unwrap();
        let id = DataSourceId::new();
        db.execute(
            "INSERT OR IGNORE INTO data_sources (id, name, vendor, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![id.as_str(), name, vendor.to_string(), now()],
        )?;
        let ds = db.query_row(
            "SELECT id, name, vendor FROM data_sources WHERE name = ?1",
            [name],
            row_to_data_source,
        )?;
        Ok(ds)
    }

    pub fn data_source(&self, id: &DataSourceId) -> Result<Option<DataSource>> {
        let db = self.db.lock().unwrap();
        let ds = db
            .query_row(
                "SELECT id, name, vendor FROM data_sources WHERE id = ?1",
                [id.as_str()],
                row_to_data_source,
            )
            .optional()?;
        Ok(ds)
    }

    pub fn create_workspace(&self, name: &str, sandbox: Option<&SchemaRef>) -> Result<Workspace> {
        let id = WorkspaceId::new();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO workspaces
             (id, name, sandbox_data_source_id, sandbox_database, sandbox_schema, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                id.as_str(),
                name,
                sandbox.map(|s| s.data_source_id.as_str()),
                sandbox.map(|s| s.database.as_str()),
                sandbox.map(|s| s.schema.as_str()),
                now()
            ],
        )?;
        Ok(Workspace {
            id,
            name: name.to_string(),
            sandbox: sandbox.cloned(),
            deleted_at: None,
        })
    }

    /// Look up a workspace, including soft-deleted ones.
    pub fn workspace(&self, id: &WorkspaceId) -> Result<Option<Workspace>> {
        let db = self.db.lock().unwrap();
        let ws = db
            .query_row(
                "SELECT id, name, sandbox_data_source_id, sandbox_database, sandbox_schema,
                        deleted_at
                 FROM workspaces WHERE id = ?1",
                [id.as_str()],
                row_to_workspace,
            )
            .optional()?;
        Ok(ws)
    }

    pub fn delete_workspace(&self, id: &WorkspaceId) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE workspaces SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
            rusqlite::params![now(), id.as_str()],
        )?;
        if n == 0 {
            return Err(ImportError::NotFound {
                kind: "workspace",
                id: id.to_string(),
            });
        }
        info!(workspace_id = %id, "workspace deleted");
        Ok(())
    }

    pub fn create_dataset(&self, name: &str, schema: &SchemaRef) -> Result<Dataset> {
        let id = DatasetId::new();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO datasets
             (id, name, data_source_id, database_name, schema_name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                id.as_str(),
                name,
                schema.data_source_id.as_str(),
                schema.database,
                schema.schema,
                now()
            ],
        )?;
        Ok(Dataset {
            id,
            name: name.to_string(),
            schema: schema.clone(),
            deleted_at: None,
        })
    }

    /// Look up a dataset, including soft-deleted ones.
    pub fn dataset(&self, id: &DatasetId) -> Result<Option<Dataset>> {
        let db = self.db.lock().unwrap();
        let ds = db
            .query_row(
                &format!("SELECT {DATASET_COLUMNS} FROM datasets WHERE id = ?1"),
                [id.as_str()],
                row_to_dataset,
            )
            .optional()?;
        Ok(ds)
    }

    /// The live dataset called `name` in `schema`, if the catalog knows it.
    pub fn dataset_by_name(&self, schema: &SchemaRef, name: &str) -> Result<Option<Dataset>> {
        let db = self.db.lock().unwrap();
        let ds = db
            .query_row(
                &format!(
                    "SELECT {DATASET_COLUMNS} FROM datasets
                     WHERE data_source_id = ?1 AND database_name = ?2 AND schema_name = ?3
                       AND name = ?4 AND deleted_at IS NULL"
                ),
                rusqlite::params![
                    schema.data_source_id.as_str(),
                    schema.database,
                    schema.schema,
                    name
                ],
                row_to_dataset,
            )
            .optional()?;
        Ok(ds)
    }

    pub fn delete_dataset(&self, id: &DatasetId) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE datasets SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
            rusqlite::params![now(), id.as_str()],
        )?;
        if n == 0 {
            return Err(ImportError::NotFound {
                kind: "dataset",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Make the catalog aware of every table in `names` under `schema`.
    ///
    /// Returns how many datasets were added. Tables that disappeared are
    /// left alone; removal is the catalog owner's job.
    #[instrument(skip(self, names), fields(schema = %schema.schema))]
    pub fn sync_datasets(&self, schema: &SchemaRef, names: &[String]) -> Result<usize> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        let mut added = 0;
        for name in names {
            let exists: bool = tx.query_row(
                "SELECT EXISTS (SELECT 1 FROM datasets
                  WHERE data_source_id = ?1 AND database_name = ?2 AND schema_name = ?3
                    AND name = ?4 AND deleted_at IS NULL)",
                rusqlite::params![
                    schema.data_source_id.as_str(),
                    schema.database,
                    schema.schema,
                    name
                ],
                |row| row.get(0),
            )?;
            if exists {
                continue;
            }
            tx.execute(
                "INSERT INTO datasets
                 (id, name, data_source_id, database_name, schema_name, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    DatasetId::new().as_str(),
                    name,
                    schema.data_source_id.as_str(),
                    schema.database,
                    schema.schema,
                    now()
                ],
            )?;
            added += 1;
        }
        tx.commit()?;
        debug!(added, "catalog synced");
        Ok(added)
    }

    // --- import schedules ---------------------------------------------------

    /// A new schedule starts out expecting to create its destination table.
    pub fn create_import_schedule(&self, workspace_id: &WorkspaceId) -> Result<ImportScheduleId> {
        let id = ImportScheduleId::new();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO import_schedules (id, workspace_id, new_table, created_at)
             VALUES (?1, ?2, 1, ?3)",
            rusqlite::params![id.as_str(), workspace_id.as_str(), now()],
        )?;
        Ok(id)
    }

    pub fn schedule_new_table(&self, id: &ImportScheduleId) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let flag: Option<bool> = db
            .query_row(
                "SELECT new_table FROM import_schedules WHERE id = ?1",
                [id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        flag.ok_or_else(|| ImportError::NotFound {
            kind: "import schedule",
            id: id.to_string(),
        })
    }

    /// After a successful import the destination exists; later runs append.
    pub fn clear_new_table(&self, id: &ImportScheduleId) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE import_schedules SET new_table = 0 WHERE id = ?1",
            [id.as_str()],
        )?;
        Ok(())
    }

    // --- imports -------------------------------------------------------------

    pub fn create_import(&self, new: &NewImport) -> Result<Import> {
        let id = ImportId::new();
        let created_at = Utc::now();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO imports
             (id, workspace_id, user_id, source_dataset_id, to_table, sample_count, truncate,
              import_schedule_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                id.as_str(),
                new.workspace_id.as_str(),
                new.user_id.as_str(),
                new.source_dataset_id.as_str(),
                new.to_table,
                new.sample_count.map(|n| n as i64),
                new.truncate,
                new.import_schedule_id.as_ref().map(|s| s.as_str()),
                created_at.to_rfc3339()
            ],
        )?;
        info!(import_id = %id, to_table = %new.to_table, "import created");
        Ok(Import {
            id,
            workspace_id: new.workspace_id.clone(),
            user_id: new.user_id.clone(),
            source_dataset_id: new.source_dataset_id.clone(),
            to_table: new.to_table.clone(),
            sample_count: new.sample_count,
            truncate: new.truncate,
            import_schedule_id: new.import_schedule_id.clone(),
            destination_dataset_id: None,
            created_at,
            started_at: None,
            finished_at: None,
            success: ImportOutcome::Pending,
            message: None,
        })
    }

    pub fn import(&self, id: &ImportId) -> Result<Option<Import>> {
        let db = self.db.lock().unwrap();
        let import = db
            .query_row(
                &format!("SELECT {IMPORT_COLUMNS} FROM imports WHERE id = ?1"),
                [id.as_str()],
                row_to_import,
            )
            .optional()?;
        Ok(import)
    }

    /// Stamp `started_at` on an import nobody has started or finalized yet.
    ///
    /// Returns `false` when another run got there first.
    pub fn claim(&self, id: &ImportId, at: DateTime<Utc>) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE imports SET started_at = ?1
             WHERE id = ?2 AND started_at IS NULL AND success IS NULL",
            rusqlite::params![at.to_rfc3339(), id.as_str()],
        )?;
        Ok(n == 1)
    }

    /// Write the terminal outcome if, and only if, none has been written yet.
    ///
    /// The check and the write are a single conditional `UPDATE`, so exactly
    /// one of several concurrent finalisers gets `true`.
    pub fn finalize(
        &self,
        id: &ImportId,
        outcome: ImportOutcome,
        message: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(flag) = outcome.as_flag() else {
            return Ok(false);
        };
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE imports SET success = ?1, message = ?2, finished_at = ?3
             WHERE id = ?4 AND success IS NULL",
            rusqlite::params![flag, message, at.to_rfc3339(), id.as_str()],
        )?;
        Ok(n == 1)
    }

    /// Undo a [`finalize`](Self::finalize) made at `at`, leaving the import
    /// pending again. Only the write stamped with that exact time is undone.
    pub fn release_outcome(&self, id: &ImportId, at: DateTime<Utc>) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE imports SET success = NULL, message = NULL, finished_at = NULL
             WHERE id = ?1 AND finished_at = ?2",
            rusqlite::params![id.as_str(), at.to_rfc3339()],
        )?;
        Ok(n == 1)
    }

    pub fn set_destination_dataset(&self, id: &ImportId, dataset_id: &DatasetId) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE imports SET destination_dataset_id = ?1 WHERE id = ?2",
            rusqlite::params![dataset_id.as_str(), id.as_str()],
        )?;
        Ok(())
    }

    /// Imports that started but never recorded an outcome.
    pub fn unfinished_imports(&self) -> Result<Vec<Import>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {IMPORT_COLUMNS} FROM imports
             WHERE success IS NULL AND started_at IS NOT NULL
             ORDER BY started_at"
        ))?;
        let imports = stmt
            .query_map([], row_to_import)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(imports)
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn parse_ts(idx: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_opt_ts(idx: usize, value: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_ts(idx, v)).transpose()
}

fn row_to_data_source(row: &Row<'_>) -> rusqlite::Result<DataSource> {
    let vendor: String = row.get(2)?;
    let vendor = vendor.parse::<Vendor>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(DataSource {
        id: row.get::<_, String>(0)?.into(),
        name: row.get(1)?,
        vendor,
    })
}

fn row_to_workspace(row: &Row<'_>) -> rusqlite::Result<Workspace> {
    let sandbox_ds: Option<String> = row.get(2)?;
    let sandbox_db: Option<String> = row.get(3)?;
    let sandbox_schema: Option<String> = row.get(4)?;
    let sandbox = match (sandbox_ds, sandbox_db, sandbox_schema) {
        (Some(ds), Some(db), Some(schema)) => Some(SchemaRef {
            data_source_id: ds.into(),
            database: db,
            schema,
        }),
        _ => None,
    };
    Ok(Workspace {
        id: row.get::<_, String>(0)?.into(),
        name: row.get(1)?,
        sandbox,
        deleted_at: row.get(5)?,
    })
}

fn row_to_dataset(row: &Row<'_>) -> rusqlite::Result<Dataset> {
    Ok(Dataset {
        id: row.get::<_, String>(0)?.into(),
        name: row.get(1)?,
        schema: SchemaRef {
            data_source_id: row.get::<_, String>(2)?.into(),
            database: row.get(3)?,
            schema: row.get(4)?,
        },
        deleted_at: row.get(5)?,
    })
}

fn row_to_import(row: &Row<'_>) -> rusqlite::Result<Import> {
    Ok(Import {
        id: row.get::<_, String>(0)?.into(),
        workspace_id: row.get::<_, String>(1)?.into(),
        user_id: UserId::from(row.get::<_, String>(2)?),
        source_dataset_id: row.get::<_, String>(3)?.into(),
        to_table: row.get(4)?,
        sample_count: row.get::<_, Option<i64>>(5)?.map(|n| n.max(0) as u64),
        truncate: row.get(6)?,
        import_schedule_id: row.get::<_, Option<String>>(7)?.map(ImportScheduleId::from),
        destination_dataset_id: row.get::<_, Option<String>>(8)?.map(DatasetId::from),
        created_at: parse_ts(9, row.get(9)?)?,
        started_at: parse_opt_ts(10, row.get(10)?)?,
        finished_at: parse_opt_ts(11, row.get(11)?)?,
        success: ImportOutcome::from_flag(row.get(12)?),
        message: row.get(13)?,
    })
}
