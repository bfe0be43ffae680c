use rusqlite::Connection;

use crate::error::Result;

/// Initialise the catalog mirror and the imports table.
///
/// Creates tables idempotently. Soft-deleted rows keep their `deleted_at`
/// so failed imports can still describe what they pointed at.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS data_sources (
            id          TEXT NOT NULL PRIMARY KEY,
            name        TEXT NOT NULL UNIQUE,
            vendor      TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS workspaces (
            id                      TEXT NOT NULL PRIMARY KEY,
            name                    TEXT NOT NULL,
            sandbox_data_source_id  TEXT REFERENCES data_sources(id),
            sandbox_database        TEXT,
            sandbox_schema          TEXT,
            deleted_at              TEXT,
            created_at              TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS datasets (
            id              TEXT NOT NULL PRIMARY KEY,
            name            TEXT NOT NULL,
            data_source_id  TEXT NOT NULL REFERENCES data_sources(id),
            database_name   TEXT NOT NULL,
            schema_name     TEXT NOT NULL,
            deleted_at      TEXT,
            created_at      TEXT NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_datasets_live_name
            ON datasets (data_source_id, database_name, schema_name, name)
            WHERE deleted_at IS NULL;

        CREATE TABLE IF NOT EXISTS import_schedules (
            id            TEXT NOT NULL PRIMARY KEY,
            workspace_id  TEXT NOT NULL REFERENCES workspaces(id),
            new_table     INTEGER NOT NULL DEFAULT 1,
            created_at    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS imports (
            id                      TEXT NOT NULL PRIMARY KEY,
            workspace_id            TEXT NOT NULL REFERENCES workspaces(id),
            user_id                 TEXT NOT NULL,
            source_dataset_id       TEXT NOT NULL REFERENCES datasets(id),
            to_table                TEXT NOT NULL,
            sample_count            INTEGER,            -- NULL copies every row
            truncate                INTEGER NOT NULL DEFAULT 0,
            import_schedule_id      TEXT REFERENCES import_schedules(id),
            destination_dataset_id  TEXT,
            created_at              TEXT NOT NULL,
            started_at              TEXT,
            finished_at             TEXT,
            success                 INTEGER,            -- NULL pending, 1 passed, 0 failed
            message                 TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_imports_pending
            ON imports (started_at) WHERE success IS NULL;
        ",
    )?;
    Ok(())
}
