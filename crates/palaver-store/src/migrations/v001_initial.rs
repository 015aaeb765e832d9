//! v001 -- Initial schema creation.
//!
//! Creates the five core tables: `users`, `sessions`, `messages`,
//! `reactions`, and `read_receipts`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id            TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    email         TEXT NOT NULL UNIQUE,
    display_name  TEXT NOT NULL,
    password_hash TEXT NOT NULL,              -- hex-encoded BLAKE3
    password_salt TEXT NOT NULL,              -- hex-encoded random salt
    avatar_url    TEXT NOT NULL DEFAULT '',
    is_online     INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    last_seen     TEXT NOT NULL,              -- ISO-8601 / RFC-3339
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Sessions (bearer tokens)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS sessions (
    token      TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    user_id    TEXT NOT NULL,
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,

    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id);

-- ----------------------------------------------------------------
-- Messages (strictly 1:1, soft-deleted via tombstone flag)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id             TEXT PRIMARY KEY NOT NULL, -- UUID v4
    sender_id      TEXT NOT NULL,
    receiver_id    TEXT NOT NULL,
    text           TEXT,
    image_url      TEXT,
    voice_url      TEXT,
    voice_duration INTEGER NOT NULL DEFAULT 0,
    status         TEXT NOT NULL DEFAULT 'sent',
    edited_at      TEXT,
    reply_to       TEXT,                      -- nullable self-reference
    is_deleted     INTEGER NOT NULL DEFAULT 0,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL,

    FOREIGN KEY (sender_id)   REFERENCES users(id),
    FOREIGN KEY (receiver_id) REFERENCES users(id),
    FOREIGN KEY (reply_to)    REFERENCES messages(id)
);

CREATE INDEX IF NOT EXISTS idx_messages_pair
    ON messages(sender_id, receiver_id, created_at);
CREATE INDEX IF NOT EXISTS idx_messages_receiver
    ON messages(receiver_id);

-- ----------------------------------------------------------------
-- Reactions (at most one per user per message)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS reactions (
    message_id TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    emoji      TEXT NOT NULL,
    created_at TEXT NOT NULL,

    PRIMARY KEY (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id)    REFERENCES users(id)
);

-- ----------------------------------------------------------------
-- Read receipts
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS read_receipts (
    message_id TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    read_at    TEXT NOT NULL,

    PRIMARY KEY (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id)    REFERENCES users(id)
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
