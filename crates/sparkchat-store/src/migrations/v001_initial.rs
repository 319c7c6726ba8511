//! v001 -- Initial schema creation.
//!
//! Creates the four core tables: `channels`, `channel_members`, `messages`,
//! and `presence`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Channels
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS channels (
    id           TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    name         TEXT NOT NULL UNIQUE,
    description  TEXT,
    channel_type TEXT NOT NULL,               -- public | private | group | announcement
    created_by   TEXT NOT NULL,               -- UUID v4
    created_at   TEXT NOT NULL                -- ISO-8601 / RFC-3339
);

-- ----------------------------------------------------------------
-- Channel members
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS channel_members (
    channel_id TEXT NOT NULL,                 -- FK -> channels(id)
    user_id    TEXT NOT NULL,                 -- UUID v4
    role       TEXT NOT NULL,                 -- member | admin
    joined_at  TEXT NOT NULL,

    PRIMARY KEY (channel_id, user_id),
    FOREIGN KEY (channel_id) REFERENCES channels(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_members_user_id ON channel_members(user_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id                TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    channel_id        TEXT NOT NULL,              -- FK -> channels(id)
    sender_id         TEXT NOT NULL,              -- UUID v4
    content           TEXT NOT NULL,
    message_type      TEXT NOT NULL,              -- text | file | image | system
    reply_to_id       TEXT,                       -- nullable, same channel
    forwarded_from_id TEXT,
    is_deleted        INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    reactions         TEXT NOT NULL DEFAULT '{}', -- JSON: symbol -> [user ids]
    created_at        TEXT NOT NULL,              -- ISO-8601
    edited_at         TEXT,

    FOREIGN KEY (channel_id) REFERENCES channels(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_channel_ts
    ON messages(channel_id, created_at ASC);

-- ----------------------------------------------------------------
-- Presence (last-active stamps)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS presence (
    user_id     TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    last_active TEXT NOT NULL
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
