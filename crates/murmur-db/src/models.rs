//! Database row types and column helpers.
//! Ids are stored as hyphenated UUID text, timestamps as RFC 3339 UTC text
//! with fixed microsecond precision so they sort lexicographically.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

use murmur_types::models::{Conversation, Message, MessageKind, MessageStatus, StatusRecord, User};

/// A user row including the password hash. Only the auth path sees this.
pub struct UserRow {
    pub user: User,
    pub password: String,
}

pub fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

pub(crate) fn uuid_col(row: &Row, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn ts_col(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_ts_col(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(s) => DateTime::parse_from_rfc3339(&s)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| conversion_error(idx, e)),
        None => Ok(None),
    }
}

pub(crate) fn status_col(row: &Row, idx: usize) -> rusqlite::Result<MessageStatus> {
    let rank: i64 = row.get(idx)?;
    MessageStatus::from_rank(rank).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, rank))
}

pub(crate) const USER_COLUMNS: &str =
    "id, username, display_name, avatar_url, online, last_seen_at, created_at, password";

pub(crate) fn row_to_user_row(row: &Row) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        user: User {
            id: uuid_col(row, 0)?,
            username: row.get(1)?,
            display_name: row.get(2)?,
            avatar_url: row.get(3)?,
            online: row.get::<_, i64>(4)? != 0,
            last_seen_at: opt_ts_col(row, 5)?,
            created_at: ts_col(row, 6)?,
        },
        password: row.get(7)?,
    })
}

pub(crate) const CONVERSATION_COLUMNS: &str = "id, user_a, user_b, created_at, updated_at";

pub(crate) fn row_to_conversation(row: &Row) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: uuid_col(row, 0)?,
        participants: [uuid_col(row, 1)?, uuid_col(row, 2)?],
        created_at: ts_col(row, 3)?,
        updated_at: ts_col(row, 4)?,
    })
}

pub(crate) const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_id, kind, text, file_url, created_at";

pub(crate) fn row_to_message(row: &Row) -> rusqlite::Result<Message> {
    let kind: String = row.get(3)?;
    Ok(Message {
        id: uuid_col(row, 0)?,
        conversation_id: uuid_col(row, 1)?,
        sender_id: uuid_col(row, 2)?,
        kind: MessageKind::parse(&kind).unwrap_or_default(),
        text: row.get(4)?,
        file_url: row.get(5)?,
        created_at: ts_col(row, 6)?,
    })
}

pub(crate) fn row_to_status(row: &Row) -> rusqlite::Result<StatusRecord> {
    Ok(StatusRecord {
        message_id: uuid_col(row, 0)?,
        user_id: uuid_col(row, 1)?,
        status: status_col(row, 2)?,
        updated_at: ts_col(row, 3)?,
    })
}
