//! v001 -- Initial schema creation.
//!
//! Creates the `messages` table. Rows are partitioned by `context_id` (the
//! logged-in user) and the `(context_id, server_id)` pair is unique whenever
//! a server id is present; that pair is the dedup key.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    context_id       INTEGER NOT NULL,            -- logged-in user scope
    server_id        INTEGER,                     -- NULL until confirmed
    server_timestamp TEXT,                        -- ISO-8601 / RFC-3339
    kind             TEXT NOT NULL,               -- TEXT | AUDIO
    sender_id        INTEGER NOT NULL,
    sender_name      TEXT,
    recipient_id     INTEGER,                     -- private messages
    recipient_name   TEXT,
    channel_id       INTEGER,                     -- channel messages
    content          TEXT,
    audio_path       TEXT,
    transcript       TEXT,
    mime_type        TEXT,
    duration_ms      INTEGER,
    created_at       TEXT NOT NULL                -- local insertion time
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_context_server
    ON messages(context_id, server_id)
    WHERE server_id IS NOT NULL;

CREATE INDEX IF NOT EXISTS idx_messages_context_channel
    ON messages(context_id, channel_id);

CREATE INDEX IF NOT EXISTS idx_messages_context_sender
    ON messages(context_id, sender_id);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
