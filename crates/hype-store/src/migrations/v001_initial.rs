//! v001 -- Initial schema creation.
//!
//! Creates `users`, `messages` and `friend_edges`.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    name       TEXT NOT NULL UNIQUE,
    token      TEXT NOT NULL,
    created_at INTEGER NOT NULL              -- unix milliseconds
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    sender_id    INTEGER NOT NULL,
    recipient_id INTEGER NOT NULL,
    body         TEXT NOT NULL,
    sent_at      INTEGER NOT NULL,           -- unix milliseconds

    FOREIGN KEY (sender_id)    REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (recipient_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_pair
    ON messages(sender_id, recipient_id, sent_at);

-- ----------------------------------------------------------------
-- Friend edges, one row per direction
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS friend_edges (
    from_id    INTEGER NOT NULL,
    to_id      INTEGER NOT NULL,
    status     TEXT NOT NULL CHECK (status IN ('pending', 'accepted')),
    updated_at INTEGER NOT NULL,

    PRIMARY KEY (from_id, to_id),
    FOREIGN KEY (from_id) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (to_id)   REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_friend_edges_to ON friend_edges(to_id, status);
"#;

/// Apply the migration.
pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(UP_SQL)
}
