use std::{path::PathBuf, sync::Arc};

use chrono::Utc;
use conduit_core::{
    events::{DomainEvent, EventSink},
    types::{DatasetId, EventId, ImportId, UserId},
};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    backend::{BackendConnection, BackendConnector},
    error::{ImportError, Result},
    pipe::TransferDir,
    store::ImportStore,
    strategy::{
        CopyRequest, CopyStrategy, CrossDatabaseCopy, SameDatabaseCopy, StrategyKind, VendorCopy,
    },
    types::{Dataset, Import, ImportOutcome, NewImport, SchemaRef, Workspace},
};

const INTERRUPTED_BY_RESTART: &str = "interrupted by restart";

/// Result of trying to stop one side of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterruptOutcome {
    /// This many matching sessions were terminated.
    Killed(usize),
    /// Nothing matched; the copy finished or never started.
    NotRunning,
    /// The backend could not be reached or refused the kill.
    Failed(String),
}

/// What [`ImportExecutor::cancel`] managed to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelReport {
    /// Whether this call wrote the outcome (false if something else got there first).
    pub finalized: bool,
    pub reader: InterruptOutcome,
    pub writer: InterruptOutcome,
    pub pipe_removed: Option<PathBuf>,
}

/// Drives imports from creation to a recorded outcome.
pub struct ImportExecutor {
    store: Arc<ImportStore>,
    connector: Arc<dyn BackendConnector>,
    events: Arc<dyn EventSink>,
    transfer: TransferDir,
}

impl ImportExecutor {
    pub fn new(
        store: Arc<ImportStore>,
        connector: Arc<dyn BackendConnector>,
        events: Arc<dyn EventSink>,
        transfer: TransferDir,
    ) -> Self {
        Self {
            store,
            connector,
            events,
            transfer,
        }
    }

    pub fn store(&self) -> &Arc<ImportStore> {
        &self.store
    }

    /// Persist a new import and announce it with `DatasetImportCreated`.
    pub fn create(&self, new: NewImport) -> Result<Import> {
        let import = self.store.create_import(&new)?;
        self.events.publish(
            &import.user_id,
            DomainEvent::DatasetImportCreated {
                workspace_id: import.workspace_id.clone(),
                source_dataset_id: import.source_dataset_id.clone(),
                destination_table: import.to_table.clone(),
                reference: import.reference(),
                dataset_id: None,
            },
        )?;
        Ok(import)
    }

    /// Run the import unless it already has an outcome.
    pub async fn run_by_id(&self, id: &ImportId) -> Result<()> {
        let import = self.load(id)?;
        if import.success.is_finalized() {
            debug!(import_id = %id, "import already finalized, skipping");
            return Ok(());
        }
        self.run(&import).await
    }

    /// Copy the source into the sandbox and record the outcome once.
    ///
    /// Only the run that claims the import does any work; a second run of
    /// the same import returns without touching its transfer channel.
    /// Failures are recorded on the import and then returned to the caller.
    #[instrument(skip(self, import), fields(import_id = %import.id))]
    pub async fn run(&self, import: &Import) -> Result<()> {
        if !self.store.claim(&import.id, Utc::now())? {
            warn!("import already started or finalized, skipping");
            return Ok(());
        }
        info!(to_table = %import.to_table, "import started");

        let result = match self.copy(import).await {
            Ok(()) => self
                .finalize(import, ImportOutcome::Passed, None)
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            let message = e.to_string();
            error!(error = %message, "import failed");
            if let Err(fe) = self
                .finalize(import, ImportOutcome::Failed, Some(&message))
                .await
            {
                warn!("could not record import failure: {fe}");
            }
        }
        result
    }

    /// Finalize with the given outcome, then stop the reader, the writer and
    /// remove the pipe. Each step runs regardless of how the previous one went.
    #[instrument(skip(self, id, message), fields(import_id = %id))]
    pub async fn cancel(
        &self,
        id: &ImportId,
        success: bool,
        message: Option<&str>,
    ) -> Result<CancelReport> {
        let import = self.load(id)?;
        info!("terminating import");

        let outcome = if success {
            ImportOutcome::Passed
        } else {
            ImportOutcome::Failed
        };
        let finalized = match self.finalize(&import, outcome, message).await {
            Ok(won) => won,
            Err(e) => {
                warn!("could not finalize cancelled import: {e}");
                false
            }
        };

        let channel = import.channel();

        let reader = match self.sandbox_connection(&import).await {
            Ok(Some(conn)) => interrupt(conn.as_ref(), "reader", &channel.reader_pattern()).await,
            Ok(None) => {
                info!("workspace has no sandbox, no reader to stop");
                InterruptOutcome::NotRunning
            }
            Err(e) => {
                warn!("could not reach destination to stop reader: {e}");
                InterruptOutcome::Failed(e.to_string())
            }
        };

        let writer = match self.source_connection(&import).await {
            Ok(conn) => interrupt(conn.as_ref(), "writer", &channel.writer_pattern()).await,
            Err(e) => {
                warn!("could not reach source to stop writer: {e}");
                InterruptOutcome::Failed(e.to_string())
            }
        };

        let pipe_removed = match self.transfer.remove(&channel) {
            Ok(Some(path)) => {
                info!(path = %path.display(), "removed named pipe");
                Some(path)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(%channel, "could not remove named pipe: {e}");
                None
            }
        };

        Ok(CancelReport {
            finalized,
            reader,
            writer,
            pipe_removed,
        })
    }

    /// Fail every import a previous process started but never finished.
    pub async fn recover_unfinished(&self) -> Result<usize> {
        let mut recovered = 0;
        for import in self.store.unfinished_imports()? {
            if self
                .finalize(&import, ImportOutcome::Failed, Some(INTERRUPTED_BY_RESTART))
                .await?
            {
                recovered += 1;
            }
            if let Err(e) = self.transfer.remove(&import.channel()) {
                warn!(import_id = %import.id, "could not remove stale pipe: {e}");
            }
        }
        if recovered > 0 {
            warn!(recovered, "failed imports interrupted by restart");
        }
        Ok(recovered)
    }

    fn load(&self, id: &ImportId) -> Result<Import> {
        self.store.import(id)?.ok_or_else(|| ImportError::NotFound {
            kind: "import",
            id: id.to_string(),
        })
    }

    fn workspace(&self, import: &Import) -> Result<Workspace> {
        self.store
            .workspace(&import.workspace_id)?
            .ok_or_else(|| ImportError::NotFound {
                kind: "workspace",
                id: import.workspace_id.to_string(),
            })
    }

    fn source_dataset(&self, import: &Import) -> Result<Dataset> {
        self.store
            .dataset(&import.source_dataset_id)?
            .ok_or_else(|| ImportError::NotFound {
                kind: "dataset",
                id: import.source_dataset_id.to_string(),
            })
    }

    async fn connect(&self, schema: &SchemaRef, user: &UserId) -> Result<Arc<dyn BackendConnection>> {
        let data_source = self
            .store
            .data_source(&schema.data_source_id)?
            .ok_or_else(|| ImportError::NotFound {
                kind: "data source",
                id: schema.data_source_id.to_string(),
            })?;
        Ok(self
            .connector
            .connect(&data_source, &schema.database, user)
            .await?)
    }

    async fn sandbox_connection(&self, import: &Import) -> Result<Option<Arc<dyn BackendConnection>>> {
        let Some(sandbox) = self.workspace(import)?.sandbox else {
            return Ok(None);
        };
        Ok(Some(self.connect(&sandbox, &import.user_id).await?))
    }

    async fn source_connection(&self, import: &Import) -> Result<Arc<dyn BackendConnection>> {
        let source = self.source_dataset(import)?;
        self.connect(&source.schema, &import.user_id).await
    }

    /// Validate, pick a strategy and move the rows.
    async fn copy(&self, import: &Import) -> Result<()> {
        let workspace = self.workspace(import)?;
        if workspace.is_deleted() {
            return Err(ImportError::Validation(format!(
                "Destination workspace {} has been deleted",
                workspace.name
            )));
        }
        let source = self.source_dataset(import)?;
        if source.is_deleted() {
            return Err(ImportError::Validation(format!(
                "Original source dataset {} has been deleted",
                source.scoped_name()
            )));
        }
        let sandbox = workspace.sandbox.clone().ok_or_else(|| {
            ImportError::Validation(format!(
                "Destination workspace {} has no sandbox",
                workspace.name
            ))
        })?;

        let strategy = self.strategy_for(import, &source, &sandbox).await?;
        let request = CopyRequest {
            source,
            destination_schema: sandbox,
            destination_table: import.to_table.clone(),
            actor: import.user_id.clone(),
            sample_count: import.sample_count,
            truncate: import.truncate,
            channel: import.channel(),
        };
        info!(strategy = ?strategy.kind(), channel = %request.channel, "copy started");
        strategy.start(&request).await?;
        Ok(())
    }

    async fn strategy_for(
        &self,
        import: &Import,
        source: &Dataset,
        sandbox: &SchemaRef,
    ) -> Result<CopyStrategy> {
        let source_vendor = self
            .store
            .data_source(&source.schema.data_source_id)?
            .ok_or_else(|| ImportError::NotFound {
                kind: "data source",
                id: source.schema.data_source_id.to_string(),
            })?
            .vendor;

        let source_conn = self.connect(&source.schema, &import.user_id).await?;
        let strategy = match StrategyKind::select(source_vendor, &source.schema, sandbox) {
            StrategyKind::SameDatabase => CopyStrategy::SameDatabase(SameDatabaseCopy::new(source_conn)),
            StrategyKind::CrossDatabase => {
                let dest_conn = self.connect(sandbox, &import.user_id).await?;
                CopyStrategy::CrossDatabase(CrossDatabaseCopy::new(
                    source_conn,
                    dest_conn,
                    self.transfer.clone(),
                ))
            }
            StrategyKind::Vendor => {
                let dest_conn = self.connect(sandbox, &import.user_id).await?;
                CopyStrategy::Vendor(VendorCopy::new(source_conn, dest_conn, self.transfer.clone()))
            }
        };
        Ok(strategy)
    }

    /// Record the outcome if none is recorded yet, then emit the matching
    /// event and notification. Returns `false` when another path already
    /// finalized the import.
    ///
    /// An outcome is never left behind without its event: if publishing
    /// fails the write is undone and the import is pending again.
    async fn finalize(
        &self,
        import: &Import,
        outcome: ImportOutcome,
        message: Option<&str>,
    ) -> Result<bool> {
        let at = Utc::now();
        if !self.store.finalize(&import.id, outcome, message, at)? {
            debug!(import_id = %import.id, "import already finalized");
            return Ok(false);
        }

        let published = match outcome {
            ImportOutcome::Passed => self.record_success(import).await,
            _ => self.record_failure(import, message.unwrap_or_default()),
        };
        let event_id = match published {
            Ok(id) => id,
            Err(e) => {
                error!(import_id = %import.id, ?outcome, "could not publish outcome event: {e}");
                if let Err(re) = self.store.release_outcome(&import.id, at) {
                    error!(import_id = %import.id, "could not undo outcome: {re}");
                }
                return Err(e);
            }
        };

        if let Err(e) = self.events.notify(&import.user_id, &event_id) {
            warn!(import_id = %import.id, "could not notify owner: {e}");
        }
        info!(import_id = %import.id, ?outcome, "import finalized");
        Ok(true)
    }

    /// Publish `DatasetImportSuccess`. Catalog bookkeeping around it is best
    /// effort; only the publish itself can fail this.
    async fn record_success(&self, import: &Import) -> Result<EventId> {
        let dataset_id = self.resolve_destination(import).await;

        let event_id = self.events.publish(
            &import.user_id,
            DomainEvent::DatasetImportSuccess {
                workspace_id: import.workspace_id.clone(),
                source_dataset_id: import.source_dataset_id.clone(),
                dataset_id: dataset_id.clone(),
            },
        )?;

        match self.events.link_import_created(
            &import.workspace_id,
            &import.source_dataset_id,
            &import.reference(),
            dataset_id.as_ref(),
        ) {
            Ok(true) => {}
            Ok(false) => debug!(import_id = %import.id, "no import-created event to link"),
            Err(e) => warn!(import_id = %import.id, "could not link import-created event: {e}"),
        }
        if let Some(schedule_id) = &import.import_schedule_id {
            if let Err(e) = self.store.clear_new_table(schedule_id) {
                warn!(import_id = %import.id, "could not clear new-table flag: {e}");
            }
        }
        Ok(event_id)
    }

    /// Refresh the sandbox catalog and record the destination dataset.
    async fn resolve_destination(&self, import: &Import) -> Option<DatasetId> {
        let sandbox = match self.workspace(import) {
            Ok(workspace) => workspace.sandbox?,
            Err(e) => {
                warn!(import_id = %import.id, "could not load workspace: {e}");
                return None;
            }
        };
        if let Err(e) = self.refresh_sandbox(import, &sandbox).await {
            warn!(import_id = %import.id, "could not refresh sandbox catalog: {e}");
        }
        let dataset_id = match self.store.dataset_by_name(&sandbox, &import.to_table) {
            Ok(found) => found.map(|d| d.id)?,
            Err(e) => {
                warn!(import_id = %import.id, "could not look up destination dataset: {e}");
                return None;
            }
        };
        if let Err(e) = self.store.set_destination_dataset(&import.id, &dataset_id) {
            warn!(import_id = %import.id, "could not record destination dataset: {e}");
        }
        Some(dataset_id)
    }

    fn record_failure(&self, import: &Import, message: &str) -> Result<EventId> {
        let event_id = self.events.publish(
            &import.user_id,
            DomainEvent::DatasetImportFailed {
                workspace_id: import.workspace_id.clone(),
                source_dataset_id: import.source_dataset_id.clone(),
                destination_table: import.to_table.clone(),
                error_message: message.to_string(),
                dataset_id: self.existing_destination(import),
            },
        )?;
        Ok(event_id)
    }

    /// Best-effort lookup of the destination table in the sandbox catalog.
    fn existing_destination(&self, import: &Import) -> Option<DatasetId> {
        let sandbox = self.store.workspace(&import.workspace_id).ok()??.sandbox?;
        self.store
            .dataset_by_name(&sandbox, &import.to_table)
            .ok()?
            .map(|d| d.id)
    }

    async fn refresh_sandbox(&self, import: &Import, sandbox: &SchemaRef) -> Result<()> {
        let conn = self.connect(sandbox, &import.user_id).await?;
        let names = conn.table_names(&sandbox.schema).await?;
        self.store.sync_datasets(sandbox, &names)?;
        Ok(())
    }
}

/// Find sessions matching `pattern` and terminate them.
async fn interrupt(conn: &dyn BackendConnection, side: &str, pattern: &str) -> InterruptOutcome {
    let processes = match conn.list_processes(pattern).await {
        Ok(p) => p,
        Err(e) => {
            warn!(side, pattern, "could not list backend sessions: {e}");
            return InterruptOutcome::Failed(e.to_string());
        }
    };
    if processes.is_empty() {
        info!(side, pattern, "no running session found");
        return InterruptOutcome::NotRunning;
    }

    let mut killed = 0;
    let mut last_error = None;
    for process in &processes {
        match conn.kill(process).await {
            Ok(()) => {
                info!(side, pid = process.pid, name = %process.name, "killed running session");
                killed += 1;
            }
            Err(e) => {
                warn!(side, pid = process.pid, "could not kill session: {e}");
                last_error = Some(e.to_string());
            }
        }
    }
    match (killed, last_error) {
        (0, Some(e)) => InterruptOutcome::Failed(e),
        (n, _) => InterruptOutcome::Killed(n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        testing::{FakeBackend, FakeConnector, RecordingSink},
        types::Vendor,
    };
    use rusqlite::Connection;

    struct Fixture {
        executor: Arc<ImportExecutor>,
        store: Arc<ImportStore>,
        sink: Arc<RecordingSink>,
        source: Arc<FakeBackend>,
        sandbox: Arc<FakeBackend>,
        workspace: Workspace,
        dataset: Dataset,
        _tmp: tempfile::TempDir,
        transfer_dir: PathBuf,
    }

    /// Source table lives in `erp`, the sandbox in `analytics`, both on one data source.
    fn fixture(cross_database: bool) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(ImportStore::new(Connection::open_in_memory().unwrap()).unwrap());
        let ds = store.register_data_source("warehouse", Vendor::Greenplum).unwrap();
        let source_db = if cross_database { "erp" } else { "analytics" };

        let sandbox_ref = SchemaRef::new(ds.id.clone(), "analytics", "sandbox");
        let workspace = store.create_workspace("marketing", Some(&sandbox_ref)).unwrap();
        let dataset = store
            .create_dataset("orders", &SchemaRef::new(ds.id.clone(), source_db, "public"))
            .unwrap();

        let source = Arc::new(FakeBackend::new(Vendor::Greenplum));
        let sandbox = if cross_database {
            Arc::new(FakeBackend::new(Vendor::Greenplum))
        } else {
            source.clone()
        };
        let connector = Arc::new(FakeConnector::default());
        connector.register("warehouse", source_db, source.clone());
        connector.register("warehouse", "analytics", sandbox.clone());

        let sink = Arc::new(RecordingSink::default());
        let executor = Arc::new(ImportExecutor::new(
            store.clone(),
            connector,
            sink.clone(),
            TransferDir::new(Some(tmp.path().to_path_buf())),
        ));
        Fixture {
            executor,
            store,
            sink,
            source,
            sandbox,
            workspace,
            dataset,
            transfer_dir: tmp.path().to_path_buf(),
            _tmp: tmp,
        }
    }

    fn new_import(f: &Fixture) -> NewImport {
        NewImport {
            workspace_id: f.workspace.id.clone(),
            user_id: "u-1".into(),
            source_dataset_id: f.dataset.id.clone(),
            to_table: "orders_copy".into(),
            sample_count: None,
            truncate: false,
            import_schedule_id: None,
        }
    }

    fn pipe_files(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn successful_import_resolves_destination_and_links_created_event() {
        let f = fixture(false);
        let import = f.executor.create(new_import(&f)).unwrap();
        f.executor.run(&import).await.unwrap();

        let loaded = f.store.import(&import.id).unwrap().unwrap();
        assert_eq!(loaded.success, ImportOutcome::Passed);
        assert!(loaded.started_at.is_some());
        assert!(loaded.finished_at.is_some());
        let sandbox = f.workspace.sandbox.clone().unwrap();
        let destination = f
            .store
            .dataset_by_name(&sandbox, "orders_copy")
            .unwrap()
            .expect("catalog was refreshed");
        assert_eq!(loaded.destination_dataset_id, Some(destination.id.clone()));

        assert_eq!(
            f.sink.kinds(),
            vec!["DatasetImportCreated", "DatasetImportSuccess"]
        );
        let events = f.sink.events.lock().unwrap();
        match &events[0].2 {
            DomainEvent::DatasetImportCreated { dataset_id, .. } => {
                assert_eq!(dataset_id.as_ref(), Some(&destination.id))
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(f.sink.notifications.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn schedule_flag_cleared_after_success() {
        let f = fixture(false);
        let schedule = f.store.create_import_schedule(&f.workspace.id).unwrap();
        let mut new = new_import(&f);
        new.import_schedule_id = Some(schedule.clone());
        let import = f.executor.create(new).unwrap();
        f.executor.run(&import).await.unwrap();
        assert!(!f.store.schedule_new_table(&schedule).unwrap());
    }

    #[tokio::test]
    async fn copy_failure_is_recorded_and_returned() {
        let f = fixture(false);
        f.source.fail_statements();
        let import = f.executor.create(new_import(&f)).unwrap();

        let err = f.executor.run(&import).await.unwrap_err();
        assert!(matches!(err, ImportError::Backend(_)));

        let loaded = f.store.import(&import.id).unwrap().unwrap();
        assert_eq!(loaded.success, ImportOutcome::Failed);
        assert_eq!(loaded.message, Some(err.to_string()));
        assert_eq!(f.sink.count("DatasetImportFailed"), 1);
        assert_eq!(f.sink.notifications.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn validation_failure_touches_nothing_and_cancel_is_a_noop() {
        let f = fixture(true);
        let import = f.executor.create(new_import(&f)).unwrap();
        f.store.delete_workspace(&f.workspace.id).unwrap();

        let err = f.executor.run(&import).await.unwrap_err();
        assert_eq!(err.to_string(), "Destination workspace marketing has been deleted");
        assert_eq!(pipe_files(&f.transfer_dir), 0);
        assert!(f.source.statements().is_empty());
        assert!(f.sandbox.statements().is_empty());

        let report = f
            .executor
            .cancel(&import.id, false, Some("aborted by user"))
            .await
            .unwrap();
        assert!(!report.finalized);
        assert_eq!(report.reader, InterruptOutcome::NotRunning);
        assert_eq!(report.writer, InterruptOutcome::NotRunning);
        assert_eq!(report.pipe_removed, None);

        let loaded = f.store.import(&import.id).unwrap().unwrap();
        assert_eq!(
            loaded.message.as_deref(),
            Some("Destination workspace marketing has been deleted")
        );
        assert_eq!(f.sink.count("DatasetImportFailed"), 1);
    }

    #[tokio::test]
    async fn deleted_source_dataset_fails_with_scoped_name() {
        let f = fixture(false);
        let import = f.executor.create(new_import(&f)).unwrap();
        f.store.delete_dataset(&f.dataset.id).unwrap();

        let err = f.executor.run(&import).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Original source dataset public.orders has been deleted"
        );
    }

    #[tokio::test]
    async fn cancel_mid_run_kills_sessions_and_removes_pipe() {
        let f = fixture(true);
        f.source.block_sessions();
        f.sandbox.block_sessions();
        let import = f.executor.create(new_import(&f)).unwrap();

        let executor = f.executor.clone();
        let running = import.clone();
        let run = tokio::spawn(async move { executor.run(&running).await });

        f.sandbox.wait_for_sessions(1).await;
        f.source.wait_for_sessions(1).await;
        assert_eq!(pipe_files(&f.transfer_dir), 1);

        let report = f
            .executor
            .cancel(&import.id, false, Some("aborted by user"))
            .await
            .unwrap();
        assert!(report.finalized);
        assert_eq!(report.reader, InterruptOutcome::Killed(1));
        assert_eq!(report.writer, InterruptOutcome::Killed(1));
        let pipe = report.pipe_removed.expect("cancel removes the pipe itself");
        assert_eq!(pipe, f.transfer_dir.join(import.channel().file_name()));

        // The run notices its reader died and tries to finalize too.
        assert!(run.await.unwrap().is_err());

        let loaded = f.store.import(&import.id).unwrap().unwrap();
        assert_eq!(loaded.success, ImportOutcome::Failed);
        assert_eq!(loaded.message.as_deref(), Some("aborted by user"));
        assert_eq!(pipe_files(&f.transfer_dir), 0);
        assert_eq!(f.sink.count("DatasetImportFailed"), 1);
        assert_eq!(f.sink.count("DatasetImportSuccess"), 0);
    }

    #[tokio::test]
    async fn unpublishable_success_is_recorded_as_failure() {
        let f = fixture(false);
        f.sink.reject("DatasetImportSuccess");
        let import = f.executor.create(new_import(&f)).unwrap();

        let err = f.executor.run(&import).await.unwrap_err();
        assert_eq!(err.to_string(), "Event sink error: sink down");

        let loaded = f.store.import(&import.id).unwrap().unwrap();
        assert_eq!(loaded.success, ImportOutcome::Failed);
        assert_eq!(loaded.message.as_deref(), Some("Event sink error: sink down"));
        assert_eq!(f.sink.kinds(), vec!["DatasetImportCreated", "DatasetImportFailed"]);
        assert_eq!(f.sink.notifications.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn sink_outage_leaves_import_for_restart_recovery() {
        let f = fixture(false);
        f.sink.reject("DatasetImportSuccess");
        f.sink.reject("DatasetImportFailed");
        let import = f.executor.create(new_import(&f)).unwrap();

        assert!(f.executor.run(&import).await.is_err());
        let loaded = f.store.import(&import.id).unwrap().unwrap();
        assert_eq!(loaded.success, ImportOutcome::Pending);
        assert!(loaded.finished_at.is_none());
        assert_eq!(f.store.unfinished_imports().unwrap().len(), 1);
        assert_eq!(f.sink.kinds(), vec!["DatasetImportCreated"]);
    }

    #[tokio::test]
    async fn second_run_leaves_the_live_transfer_alone() {
        let f = fixture(true);
        f.source.block_sessions();
        f.sandbox.block_sessions();
        let import = f.executor.create(new_import(&f)).unwrap();

        let executor = f.executor.clone();
        let running = import.clone();
        let run = tokio::spawn(async move { executor.run(&running).await });
        f.sandbox.wait_for_sessions(1).await;
        f.source.wait_for_sessions(1).await;

        f.executor.run(&import).await.unwrap();
        f.executor.run_by_id(&import.id).await.unwrap();
        assert_eq!(f.sandbox.session_count(), 1);
        assert_eq!(f.source.session_count(), 1);
        assert_eq!(pipe_files(&f.transfer_dir), 1);

        let report = f.executor.cancel(&import.id, false, None).await.unwrap();
        assert_eq!(report.reader, InterruptOutcome::Killed(1));
        assert!(run.await.unwrap().is_err());
        assert_eq!(f.sink.count("DatasetImportFailed"), 1);
    }

    #[tokio::test]
    async fn cancel_continues_past_unreachable_destination() {
        let f = fixture(true);
        let import = f.executor.create(new_import(&f)).unwrap();
        f.sandbox.set_unreachable();
        let stale = f.transfer_dir.join(import.channel().file_name());
        std::fs::write(&stale, b"").unwrap();

        let report = f.executor.cancel(&import.id, false, None).await.unwrap();
        assert!(report.finalized);
        assert!(matches!(report.reader, InterruptOutcome::Failed(_)));
        assert_eq!(report.writer, InterruptOutcome::NotRunning);
        assert_eq!(report.pipe_removed, Some(stale));
    }

    #[tokio::test]
    async fn run_by_id_skips_finalized_imports() {
        let f = fixture(false);
        let import = f.executor.create(new_import(&f)).unwrap();
        f.executor.cancel(&import.id, true, None).await.unwrap();
        let statements = f.source.statements().len();

        f.executor.run_by_id(&import.id).await.unwrap();
        assert_eq!(f.source.statements().len(), statements);
        assert_eq!(f.sink.count("DatasetImportSuccess"), 1);
    }

    #[tokio::test]
    async fn restart_recovery_fails_started_imports() {
        let f = fixture(false);
        let started = f.executor.create(new_import(&f)).unwrap();
        let queued = f.executor.create(new_import(&f)).unwrap();
        assert!(f.store.claim(&started.id, Utc::now()).unwrap());

        assert_eq!(f.executor.recover_unfinished().await.unwrap(), 1);
        let loaded = f.store.import(&started.id).unwrap().unwrap();
        assert_eq!(loaded.success, ImportOutcome::Failed);
        assert_eq!(loaded.message.as_deref(), Some(INTERRUPTED_BY_RESTART));
        assert_eq!(
            f.store.import(&queued.id).unwrap().unwrap().success,
            ImportOutcome::Pending
        );
    }
}
