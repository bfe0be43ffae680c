use rusqlite::Connection;

/// Initialise the events and notifications tables.
///
/// Safe to call on every startup, uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS events (
            id            TEXT PRIMARY KEY,
            kind          TEXT NOT NULL,
            actor_id      TEXT NOT NULL,
            workspace_id  TEXT NOT NULL,
            target_id     TEXT NOT NULL,
            body          TEXT NOT NULL,   -- JSON-encoded DomainEvent
            created_at    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_events_target
            ON events(kind, target_id, workspace_id, created_at);

        CREATE TABLE IF NOT EXISTS notifications (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            recipient_id  TEXT NOT NULL,
            event_id      TEXT NOT NULL REFERENCES events(id) ON DELETE CASCADE,
            read          INTEGER NOT NULL DEFAULT 0,
            created_at    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_notifications_recipient
            ON notifications(recipient_id, created_at DESC);",
    )?;
    Ok(())
}
