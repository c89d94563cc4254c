use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id            TEXT PRIMARY KEY,
            username      TEXT NOT NULL UNIQUE,
            display_name  TEXT NOT NULL,
            avatar_url    TEXT,
            password      TEXT NOT NULL,
            online        INTEGER NOT NULL DEFAULT 0,
            last_seen_at  TEXT,
            created_at    TEXT NOT NULL
        );

        -- One row per unordered pair: participants stored as user_a < user_b
        CREATE TABLE IF NOT EXISTS conversations (
            id          TEXT PRIMARY KEY,
            user_a      TEXT NOT NULL REFERENCES users(id),
            user_b      TEXT NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL,
            CHECK (user_a < user_b),
            UNIQUE (user_a, user_b)
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_user_b
            ON conversations(user_b);

        CREATE TABLE IF NOT EXISTS messages (
            id               TEXT PRIMARY KEY,
            conversation_id  TEXT NOT NULL REFERENCES conversations(id),
            sender_id        TEXT NOT NULL REFERENCES users(id),
            kind             TEXT NOT NULL,
            text             TEXT NOT NULL,
            file_url         TEXT,
            created_at       TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);

        -- status: 0 = SENT, 1 = DELIVERED, 2 = SEEN
        CREATE TABLE IF NOT EXISTS message_statuses (
            message_id  TEXT NOT NULL REFERENCES messages(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            status      INTEGER NOT NULL CHECK (status BETWEEN 0 AND 2),
            updated_at  TEXT NOT NULL,
            PRIMARY KEY (message_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_statuses_user
            ON message_statuses(user_id, status);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
