use rusqlite::Connection;

use crate::error::Result;

/// Initialise the schedule schema in `conn`.
///
/// Creates the `schedules` table (idempotent) plus the two indexes the
/// service lives on: the due-poll scan and owner-scoped CRUD lookups.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schedules (
            id               TEXT    NOT NULL PRIMARY KEY,
            token            TEXT    NOT NULL,
            scenario_id      INTEGER NOT NULL,
            user_id          INTEGER NOT NULL,
            trigger_spec     TEXT    NOT NULL,   -- JSON-encoded TriggerSpec
            active           INTEGER NOT NULL DEFAULT 1,
            state            TEXT    NOT NULL DEFAULT 'pending',
            next_run_at      TEXT,               -- RFC 3339 UTC or NULL
            last_run_at      TEXT,
            retry_count      INTEGER NOT NULL DEFAULT 0,
            lease_owner      TEXT,
            lease_expires_at TEXT,
            version          INTEGER NOT NULL DEFAULT 1,
            created_at       TEXT    NOT NULL,
            updated_at       TEXT    NOT NULL
        ) STRICT;

        -- Due poll: WHERE active = 1 AND next_run_at <= ? ORDER BY next_run_at
        CREATE INDEX IF NOT EXISTS idx_schedules_due
            ON schedules (active, state, next_run_at);

        -- List / by-key delete / daily replace-on-create
        CREATE INDEX IF NOT EXISTS idx_schedules_owner
            ON schedules (token, user_id);
        ",
    )?;
    Ok(())
}
