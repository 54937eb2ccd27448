use rusqlite::Connection;
use tracing::info;

use parley_types::error::ChatResult;

use crate::StoreExt;

pub fn run(conn: &Connection) -> ChatResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL,
            avatar      TEXT,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS conversations (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            kind        TEXT NOT NULL CHECK (kind IN ('direct', 'group')),
            title       TEXT,
            is_active   INTEGER NOT NULL DEFAULT 1,
            created_at  TEXT NOT NULL,
            updated_at  TEXT
        );

        CREATE TABLE IF NOT EXISTS conversation_participants (
            conversation_id  INTEGER NOT NULL REFERENCES conversations(id),
            user_id          TEXT NOT NULL REFERENCES users(id),
            is_admin         INTEGER NOT NULL DEFAULT 0,
            joined_at        TEXT NOT NULL,
            left_at          TEXT,
            last_read_at     TEXT
        );

        -- One active membership window per (conversation, user); rejoining
        -- after a leave inserts a fresh row.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_participants_active
            ON conversation_participants(conversation_id, user_id)
            WHERE left_at IS NULL;

        CREATE INDEX IF NOT EXISTS idx_participants_user
            ON conversation_participants(user_id);

        CREATE TABLE IF NOT EXISTS messages (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id  INTEGER NOT NULL REFERENCES conversations(id),
            sender_id        TEXT NOT NULL REFERENCES users(id),
            content          TEXT NOT NULL,
            kind             TEXT NOT NULL,
            created_at       TEXT NOT NULL,
            modified_at      TEXT,
            is_deleted       INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at DESC, id DESC);

        CREATE INDEX IF NOT EXISTS idx_messages_sender
            ON messages(sender_id);

        CREATE TABLE IF NOT EXISTS message_statuses (
            message_id  INTEGER NOT NULL REFERENCES messages(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            status      TEXT NOT NULL CHECK (status IN ('sent', 'delivered', 'read')),
            status_at   TEXT NOT NULL,
            PRIMARY KEY (message_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS attachments (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id   INTEGER NOT NULL REFERENCES messages(id),
            file_url     TEXT NOT NULL,
            file_name    TEXT,
            file_type    TEXT,
            file_size    INTEGER NOT NULL DEFAULT 0,
            uploaded_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_attachments_message
            ON attachments(message_id);
        ",
    )
    .store_err()?;

    info!("Database migrations complete");
    Ok(())
}
