use std::{path::Path, sync::Arc, time::Duration};

use conduit_core::config::ConduitConfig;
use conduit_events::SqliteEventSink;
use conduit_import::{pipe::TransferDir, postgres::PgConnector, ImportExecutor, ImportStore};
use conduit_scheduler::{JobRunner, JobStore, SchedulerEngine, WorkQueue};
use rusqlite::Connection;
use tracing::info;

/// Every subsystem, wired against one SQLite file.
pub struct App {
    pub config: ConduitConfig,
    pub jobs: Arc<JobStore>,
    pub imports: Arc<ImportExecutor>,
    pub runner: Arc<JobRunner>,
}

impl App {
    pub fn open(config: ConduitConfig) -> anyhow::Result<Self> {
        let db_path = config.database.path.clone();
        ensure_parent_dir(&db_path);
        info!(path = %db_path, "opening SQLite database");

        // each subsystem gets its own connection; tables are created on construction
        let events = Arc::new(SqliteEventSink::new(open_connection(&db_path)?)?);
        let import_store = Arc::new(ImportStore::new(open_connection(&db_path)?)?);
        let jobs = Arc::new(JobStore::new(open_connection(&db_path)?)?);
        let queue = Arc::new(WorkQueue::new(open_connection(&db_path)?)?);
        info!("database migrations complete");

        let transfer = TransferDir::from_config(&config.transfer);
        match transfer.path() {
            Some(dir) => info!(dir = %dir.display(), "transfer directory configured"),
            None => info!("no transfer directory, cross-database imports are disabled"),
        }

        let imports = Arc::new(ImportExecutor::new(
            import_store,
            Arc::new(PgConnector::new(config.clone())),
            events.clone(),
            transfer,
        ));
        let runner = Arc::new(JobRunner::new(
            jobs.clone(),
            queue,
            imports.clone(),
            events,
        ));

        Ok(Self {
            config,
            jobs,
            imports,
            runner,
        })
    }

    pub fn engine(&self) -> SchedulerEngine {
        SchedulerEngine::new(
            self.runner.clone(),
            Duration::from_secs(self.config.scheduler.poll_interval_secs),
            self.config.scheduler.workers,
        )
    }
}

fn open_connection(path: &str) -> anyhow::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;",
    )?;
    Ok(conn)
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
