//! v001 -- Initial schema creation.
//!
//! Creates the two core tables: `chat_messages` and `files`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Chat messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat_messages (
    id              TEXT PRIMARY KEY NOT NULL,  -- app-assigned UUID v4
    chat_message_id TEXT,                       -- server id, once confirmed
    sender          TEXT,                       -- raw identity, NULL = unknown kind
    sender_is_local INTEGER NOT NULL DEFAULT 0, -- identity kind discriminant
    body            TEXT,
    created_at      TEXT NOT NULL,              -- ISO-8601 / RFC-3339
    status          INTEGER NOT NULL,           -- 0 pending, 1 sent, 2 read
    is_invalidated  INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_chat_messages_created_at
    ON chat_messages(created_at);

CREATE INDEX IF NOT EXISTS idx_chat_messages_server_id
    ON chat_messages(chat_message_id);

-- ----------------------------------------------------------------
-- File attachments (at most one per message)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS files (
    id         TEXT PRIMARY KEY NOT NULL,       -- UUID v4
    message_id TEXT NOT NULL,                   -- FK -> chat_messages(id)
    remote_id  TEXT,                            -- file-store id, once known
    name       TEXT NOT NULL,
    file_type  TEXT NOT NULL,                   -- wire value: jpg | pdf
    bytes      BLOB,                            -- NULL until downloaded

    FOREIGN KEY (message_id) REFERENCES chat_messages(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_files_message_id ON files(message_id);
"#;

/// Apply the version 1 schema.
pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(UP_SQL)
}
