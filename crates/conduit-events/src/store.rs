use std::sync::Mutex;

use chrono::Utc;
use conduit_core::{
    error::{CoreError, Result},
    events::{DomainEvent, EventSink, ImportReference},
    types::{DatasetId, EventId, UserId, WorkspaceId},
};
use rusqlite::Connection;
use tracing::{debug, warn};

use crate::db::init_db;

/// A stored event as read back by feeds and tests.
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub id: EventId,
    pub actor_id: UserId,
    pub event: DomainEvent,
    pub created_at: String,
}

/// Event sink writing to the shared SQLite database.
///
/// Wraps a single connection in a `Mutex`; every call is a short statement
/// so contention stays low even with several workers finalising at once.
pub struct SqliteEventSink {
    db: Mutex<Connection>,
}

fn db_err(e: rusqlite::Error) -> CoreError {
    CoreError::EventSink(e.to_string())
}

impl SqliteEventSink {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn).map_err(db_err)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// All events of `kind` in publish order.
    pub fn events_of_kind(&self, kind: &str) -> Result<Vec<RecordedEvent>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db
            .prepare(
                "SELECT id, actor_id, body, created_at FROM events
                 WHERE kind = ?1 ORDER BY created_at, rowid",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([kind], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(db_err)?;

        let mut events = Vec::new();
        for row in rows {
            let (id, actor_id, body, created_at) = row.map_err(db_err)?;
            let event: DomainEvent = serde_json::from_str(&body)?;
            events.push(RecordedEvent {
                id: id.into(),
                actor_id: actor_id.into(),
                event,
                created_at,
            });
        }
        Ok(events)
    }

    /// Event ids `recipient` has been notified about, oldest first.
    pub fn notifications_for(&self, recipient: &UserId) -> Result<Vec<EventId>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db
            .prepare(
                "SELECT event_id FROM notifications
                 WHERE recipient_id = ?1 ORDER BY id",
            )
            .map_err(db_err)?;
        let ids = stmt
            .query_map([recipient.as_str()], |row| row.get::<_, String>(0))
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(ids.into_iter().map(EventId::from).collect())
    }
}

impl EventSink for SqliteEventSink {
    fn publish(&self, actor: &UserId, event: DomainEvent) -> Result<EventId> {
        let id = EventId::new();
        let body = serde_json::to_string(&event)?;
        let now = Utc::now().to_rfc3339();

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO events (id, kind, actor_id, workspace_id, target_id, body, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                id.as_str(),
                event.kind(),
                actor.as_str(),
                event.workspace_id().as_str(),
                event.target(),
                body,
                now
            ],
        )
        .map_err(db_err)?;

        debug!(event_id = %id, kind = event.kind(), "event published");
        Ok(id)
    }

    fn notify(&self, recipient: &UserId, event_id: &EventId) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO notifications (recipient_id, event_id, created_at)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![
                recipient.as_str(),
                event_id.as_str(),
                Utc::now().to_rfc3339()
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn link_import_created(
        &self,
        workspace_id: &WorkspaceId,
        source_dataset_id: &DatasetId,
        reference: &ImportReference,
        dataset_id: Option<&DatasetId>,
    ) -> Result<bool> {
        let db = self.db.lock().unwrap();

        // Newest first: the matching event is almost always the latest one.
        let candidates: Vec<(String, String)> = {
            let mut stmt = db
                .prepare(
                    "SELECT id, body FROM events
                     WHERE kind = 'DatasetImportCreated'
                       AND target_id = ?1 AND workspace_id = ?2
                     ORDER BY created_at DESC, rowid DESC",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(
                    [source_dataset_id.as_str(), workspace_id.as_str()],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                )
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;
            rows
        };

        for (id, body) in candidates {
            let mut event: DomainEvent = match serde_json::from_str(&body) {
                Ok(e) => e,
                Err(e) => {
                    warn!(event_id = %id, "skipping undecodable event body: {e}");
                    continue;
                }
            };
            let DomainEvent::DatasetImportCreated {
                reference: ref found,
                dataset_id: ref mut linked,
                ..
            } = event
            else {
                continue;
            };
            if found != reference {
                continue;
            }
            *linked = dataset_id.cloned();
            let body = serde_json::to_string(&event)?;
            db.execute(
                "UPDATE events SET body = ?1 WHERE id = ?2",
                rusqlite::params![body, id],
            )
            .map_err(db_err)?;
            debug!(event_id = %id, "import created event linked to destination dataset");
            return Ok(true);
        }

        Ok(false)
    }
}
