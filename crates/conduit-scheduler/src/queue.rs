use std::sync::Mutex;

use chrono::Utc;
use conduit_core::types::{ImportId, JobId};
use rusqlite::{Connection, OptionalExtension};
use tokio::sync::Notify;
use tracing::debug;

use crate::{
    db::init_queue,
    error::{Result, SchedulerError},
};

/// A named unit of work for the worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    RunJob(JobId),
    RunImport(ImportId),
}

impl WorkItem {
    pub fn method(&self) -> &'static str {
        match self {
            WorkItem::RunJob(_) => "job.run",
            WorkItem::RunImport(_) => "import.run",
        }
    }

    pub fn key(&self) -> &str {
        match self {
            WorkItem::RunJob(id) => id.as_str(),
            WorkItem::RunImport(id) => id.as_str(),
        }
    }

    fn from_parts(method: &str, key: String) -> Result<Self> {
        match method {
            "job.run" => Ok(WorkItem::RunJob(key.into())),
            "import.run" => Ok(WorkItem::RunImport(key.into())),
            other => Err(SchedulerError::InvalidTask(format!(
                "unknown queue method: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.method(), self.key())
    }
}

/// Persistent FIFO of work items, deduplicated while queued.
///
/// An item leaves the table when a worker takes it, so the same item can be
/// queued again while its previous instance is still executing.
pub struct WorkQueue {
    db: Mutex<Connection>,
    wake: Notify,
}

impl WorkQueue {
    pub fn new(conn: Connection) -> Result<Self> {
        init_queue(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            wake: Notify::new(),
        })
    }

    /// Queue `item` unless an identical item is already waiting.
    ///
    /// Returns `true` when a row was added.
    pub fn enqueue_if_not_queued(&self, item: &WorkItem) -> Result<bool> {
        let added = {
            let db = self.db.lock().unwrap();
            db.execute(
                "INSERT OR IGNORE INTO work_queue (method, item_key, queued_at)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![item.method(), item.key(), Utc::now().to_rfc3339()],
            )? == 1
        };
        if added {
            debug!(%item, "work queued");
            self.wake.notify_one();
        } else {
            debug!(%item, "already queued");
        }
        Ok(added)
    }

    /// Take the oldest item off the queue.
    pub fn dequeue(&self) -> Result<Option<WorkItem>> {
        let db = self.db.lock().unwrap();
        let row = db
            .query_row(
                "DELETE FROM work_queue
                 WHERE id = (SELECT id FROM work_queue ORDER BY id LIMIT 1)
                 RETURNING method, item_key",
                [],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        row.map(|(method, key)| WorkItem::from_parts(&method, key))
            .transpose()
    }

    pub fn contains(&self, item: &WorkItem) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let found: bool = db.query_row(
            "SELECT EXISTS (SELECT 1 FROM work_queue WHERE method = ?1 AND item_key = ?2)",
            rusqlite::params![item.method(), item.key()],
            |row| row.get(0),
        )?;
        Ok(found)
    }

    pub fn len(&self) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let n: i64 = db.query_row("SELECT COUNT(*) FROM work_queue", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Resolves after an in-process enqueue. Items queued by another process
    /// are only seen by polling.
    pub async fn notified(&self) {
        self.wake.notified().await
    }
}
