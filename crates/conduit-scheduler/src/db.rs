use rusqlite::Connection;

use crate::error::Result;

/// Initialise the job tables in `conn`.
///
/// Job names are unique per workspace among live rows only, so a soft-deleted
/// job frees its name. The `next_run` index serves the trigger's polling query.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            id              TEXT    NOT NULL PRIMARY KEY,
            workspace_id    TEXT    NOT NULL,
            owner_id        TEXT    NOT NULL,
            name            TEXT    NOT NULL,
            interval_value  INTEGER NOT NULL,
            interval_unit   TEXT    NOT NULL,
            next_run        TEXT    NOT NULL,   -- RFC 3339
            last_run        TEXT,
            end_run         TEXT,               -- YYYY-MM-DD or NULL
            enabled         INTEGER NOT NULL DEFAULT 0,
            status          TEXT    NOT NULL DEFAULT 'idle',
            deleted_at      TEXT,
            created_at      TEXT    NOT NULL,
            updated_at      TEXT    NOT NULL
        ) STRICT;

        CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_live_name
            ON jobs (workspace_id, name) WHERE deleted_at IS NULL;

        -- SELECT … WHERE enabled = 1 AND next_run <= ? ORDER BY next_run
        CREATE INDEX IF NOT EXISTS idx_jobs_next_run ON jobs (next_run);

        CREATE TABLE IF NOT EXISTS job_tasks (
            id          TEXT    NOT NULL PRIMARY KEY,
            job_id      TEXT    NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
            idx         INTEGER NOT NULL,
            payload     TEXT    NOT NULL,   -- JSON-encoded TaskAction
            created_at  TEXT    NOT NULL,
            UNIQUE (job_id, idx)
        ) STRICT;

        -- At most one row: the engine currently driving this database.
        CREATE TABLE IF NOT EXISTS engine_lease (
            id          INTEGER NOT NULL PRIMARY KEY CHECK (id = 1),
            owner       TEXT    NOT NULL,
            heartbeat   TEXT    NOT NULL
        ) STRICT;
        ",
    )?;
    Ok(())
}

/// Initialise the work queue table.
pub fn init_queue(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS work_queue (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            method      TEXT    NOT NULL,
            item_key    TEXT    NOT NULL,
            queued_at   TEXT    NOT NULL,
            UNIQUE (method, item_key)
        ) STRICT;
        ",
    )?;
    Ok(())
}
