use crate::models::{
    CONVERSATION_COLUMNS, USER_COLUMNS, UserRow, row_to_conversation, row_to_user_row, ts,
};
use crate::{Database, OptionalExt};
use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use uuid::Uuid;

use murmur_types::models::{Conversation, User, ordered_pair};

impl Database {
    // -- Users --

    /// Returns false, inserting nothing, when the username is already taken.
    pub fn create_user(
        &self,
        id: Uuid,
        username: &str,
        display_name: &str,
        avatar_url: Option<&str>,
        password_hash: &str,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (id, username, display_name, avatar_url, password, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(username) DO NOTHING",
                params![id.to_string(), username, display_name, avatar_url, password_hash, ts(Utc::now())],
            )?;
            Ok(inserted == 1)
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS),
                [username],
                row_to_user_row,
            )
            .optional()
        })
    }

    pub fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    /// Case-insensitive substring match on username or display name.
    pub fn search_users(&self, search: Option<&str>, exclude: Uuid, limit: u32) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let needle = search.map(str::trim).unwrap_or_default().to_lowercase();
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM users
                 WHERE id != ?1
                   AND (?2 = '' OR instr(lower(username), ?2) > 0 OR instr(lower(display_name), ?2) > 0)
                 ORDER BY display_name
                 LIMIT ?3",
                USER_COLUMNS
            ))?;

            let rows = stmt
                .query_map(params![exclude.to_string(), needle, limit], row_to_user_row)?
                .map(|r| r.map(|row| row.user))
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Persist presence. `last_seen_at` is cleared when going online.
    /// Returns false if the user does not exist.
    pub fn set_user_online(
        &self,
        user_id: Uuid,
        online: bool,
        last_seen_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET online = ?2, last_seen_at = ?3 WHERE id = ?1",
                params![user_id.to_string(), online, last_seen_at.map(ts)],
            )?;
            Ok(changed == 1)
        })
    }

    /// Clear online flags left behind by a process that did not shut down
    /// cleanly. Nobody is connected at startup. Returns how many were reset.
    pub fn reset_presence(&self, at: DateTime<Utc>) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET online = 0, last_seen_at = ?1 WHERE online = 1",
                params![ts(at)],
            )?;
            Ok(changed)
        })
    }

    // -- Conversations --

    pub fn find_conversation_by_participants(&self, a: Uuid, b: Uuid) -> Result<Option<Conversation>> {
        let [user_a, user_b] = ordered_pair(a, b);
        self.with_conn(|conn| query_conversation_by_pair(conn, user_a, user_b))
    }

    /// Create the conversation for an unordered pair, or return the one that
    /// already exists. The bool is true only if this call inserted the row.
    /// A concurrent insert for the same pair resolves to the winner's row.
    pub fn create_conversation(&self, id: Uuid, a: Uuid, b: Uuid) -> Result<(Conversation, bool)> {
        let [user_a, user_b] = ordered_pair(a, b);
        if user_a == user_b {
            bail!("conversation needs two distinct participants");
        }

        self.with_conn(|conn| {
            let now = ts(Utc::now());
            let inserted = conn.execute(
                "INSERT INTO conversations (id, user_a, user_b, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT (user_a, user_b) DO NOTHING",
                params![id.to_string(), user_a.to_string(), user_b.to_string(), now],
            )?;

            let conversation = query_conversation_by_pair(conn, user_a, user_b)?
                .ok_or_else(|| anyhow!("Conversation for pair {}/{} vanished", user_a, user_b))?;

            Ok((conversation, inserted == 1))
        })
    }

    pub fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM conversations WHERE id = ?1", CONVERSATION_COLUMNS),
                [id.to_string()],
                row_to_conversation,
            )
            .optional()
        })
    }

    /// All conversations the user participates in, most recently active first.
    pub fn list_conversations_for_user(&self, user_id: Uuid) -> Result<Vec<Conversation>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM conversations
                 WHERE user_a = ?1 OR user_b = ?1
                 ORDER BY updated_at DESC, rowid DESC",
                CONVERSATION_COLUMNS
            ))?;

            let rows = stmt
                .query_map([user_id.to_string()], row_to_conversation)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn query_user_by_id(conn: &Connection, id: Uuid) -> Result<Option<User>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
            [id.to_string()],
            row_to_user_row,
        )
        .optional()?;

    Ok(row.map(|r| r.user))
}

fn query_conversation_by_pair(conn: &Connection, user_a: Uuid, user_b: Uuid) -> Result<Option<Conversation>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM conversations WHERE user_a = ?1 AND user_b = ?2",
            CONVERSATION_COLUMNS
        ),
        [user_a.to_string(), user_b.to_string()],
        row_to_conversation,
    )
    .optional()
}
