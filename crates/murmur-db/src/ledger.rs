//! Messages and the per-recipient status ledger.
//!
//! Status rows only ever move forward. Every advance is a compare-and-set
//! `UPDATE ... WHERE status < target`, so two writers racing on the same row
//! can never move it backwards. Bulk advances apply the same update row by row.

use std::collections::HashMap;

use crate::models::{MESSAGE_COLUMNS, row_to_message, row_to_status, status_col, ts, uuid_col};
use crate::{Database, OptionalExt};
use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use uuid::Uuid;

use murmur_types::models::{Message, MessageStatus, StatusRecord};

/// Outcome of a single-row advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// The row moved forward from `from` to the requested status.
    Advanced { from: MessageStatus },
    /// The row already was at or past the requested status.
    Unchanged { current: MessageStatus },
    /// No status row exists for (message, user).
    Missing,
}

/// A row moved forward by a bulk advance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvancedRow {
    pub message_id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub from: MessageStatus,
}

impl Database {
    /// Insert a message, one SENT row per recipient and bump the
    /// conversation watermark, all in one transaction. Either everything
    /// commits or nothing is visible.
    pub fn create_message_with_statuses(
        &self,
        message: &Message,
        recipients: &[Uuid],
    ) -> Result<Vec<StatusRecord>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let created_at = ts(message.created_at);

            tx.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, kind, text, file_url, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    message.id.to_string(),
                    message.conversation_id.to_string(),
                    message.sender_id.to_string(),
                    message.kind.as_str(),
                    message.text,
                    message.file_url,
                    created_at,
                ],
            )?;

            let mut statuses = Vec::with_capacity(recipients.len());
            for recipient in recipients {
                tx.execute(
                    "INSERT INTO message_statuses (message_id, user_id, status, updated_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        message.id.to_string(),
                        recipient.to_string(),
                        MessageStatus::Sent.rank(),
                        created_at,
                    ],
                )?;
                statuses.push(StatusRecord {
                    message_id: message.id,
                    user_id: *recipient,
                    status: MessageStatus::Sent,
                    updated_at: message.created_at,
                });
            }

            let bumped = tx.execute(
                "UPDATE conversations SET updated_at = max(updated_at, ?2) WHERE id = ?1",
                params![message.conversation_id.to_string(), created_at],
            )?;
            if bumped != 1 {
                // Dropping the transaction rolls back the inserts above
                bail!("Conversation not found: {}", message.conversation_id);
            }

            tx.commit()?;
            Ok(statuses)
        })
    }

    pub fn get_message(&self, id: Uuid) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS),
                [id.to_string()],
                row_to_message,
            )
            .optional()
        })
    }

    /// One page of a conversation, returned oldest first. `before` is the id
    /// of the oldest message of the previous page.
    pub fn list_messages_for_conversation(
        &self,
        conversation_id: Uuid,
        limit: u32,
        before: Option<Uuid>,
    ) -> Result<Vec<Message>> {
        self.with_conn(|conn| query_messages(conn, conversation_id, limit, before))
    }

    pub fn last_message(&self, conversation_id: Uuid) -> Result<Option<Message>> {
        self.with_conn(|conn| Ok(query_messages(conn, conversation_id, 1, None)?.pop()))
    }

    /// Batch-fetch status rows for a set of message ids.
    pub fn statuses_for_messages(&self, message_ids: &[Uuid]) -> Result<Vec<StatusRecord>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT message_id, user_id, status, updated_at FROM message_statuses
                 WHERE message_id IN ({})",
                placeholders.join(", ")
            );

            let ids: Vec<String> = message_ids.iter().map(Uuid::to_string).collect();
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(ids.iter()), row_to_status)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn get_status(&self, message_id: Uuid, user_id: Uuid) -> Result<Option<StatusRecord>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT message_id, user_id, status, updated_at FROM message_statuses
                 WHERE message_id = ?1 AND user_id = ?2",
                [message_id.to_string(), user_id.to_string()],
                row_to_status,
            )
            .optional()
        })
    }

    /// Move one (message, user) row forward to `target`.
    pub fn advance_status_record(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        target: MessageStatus,
    ) -> Result<Advance> {
        let now = ts(Utc::now());
        self.with_conn(|conn| advance_row(conn, message_id, user_id, target, &now))
    }

    /// Advance every row of `user_id` in the conversation, for messages from
    /// the other participant created at or before `up_to`, towards `target`.
    /// Rows are advanced one at a time with the same compare-and-set as
    /// [`Database::advance_status_record`]; rows already at or past `target`
    /// are left alone.
    pub fn advance_conversation_statuses(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        target: MessageStatus,
        up_to: DateTime<Utc>,
    ) -> Result<Vec<AdvancedRow>> {
        let candidates = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT s.message_id, m.conversation_id, m.sender_id, s.status
                 FROM message_statuses s
                 JOIN messages m ON m.id = s.message_id
                 WHERE m.conversation_id = ?1
                   AND s.user_id = ?2
                   AND m.sender_id != ?2
                   AND s.status < ?3
                   AND m.created_at <= ?4
                 ORDER BY m.created_at, m.rowid",
            )?;
            let rows = stmt
                .query_map(
                    params![conversation_id.to_string(), user_id.to_string(), target.rank(), ts(up_to)],
                    row_to_candidate,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        self.advance_candidates(user_id, target, candidates)
    }

    /// Advance the user's rows for the given messages towards `target`.
    /// Messages the user sent, or has no row for, are skipped.
    pub fn advance_statuses_for_messages(
        &self,
        user_id: Uuid,
        message_ids: &[Uuid],
        target: MessageStatus,
    ) -> Result<Vec<AdvancedRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        let candidates = self.with_conn(|conn| {
            let placeholders: Vec<String> = (3..message_ids.len() + 3).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT s.message_id, m.conversation_id, m.sender_id, s.status
                 FROM message_statuses s
                 JOIN messages m ON m.id = s.message_id
                 WHERE s.user_id = ?1
                   AND s.status < ?2
                   AND s.message_id IN ({})
                 ORDER BY m.created_at, m.rowid",
                placeholders.join(", ")
            );

            let mut values: Vec<Box<dyn rusqlite::types::ToSql>> =
                vec![Box::new(user_id.to_string()), Box::new(target.rank())];
            values.extend(message_ids.iter().map(|id| Box::new(id.to_string()) as Box<dyn rusqlite::types::ToSql>));

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(values.iter()), row_to_candidate)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        self.advance_candidates(user_id, target, candidates)
    }

    fn advance_candidates(
        &self,
        user_id: Uuid,
        target: MessageStatus,
        candidates: Vec<AdvancedRow>,
    ) -> Result<Vec<AdvancedRow>> {
        let mut advanced = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let now = ts(Utc::now());
            let outcome = self.with_conn(|conn| advance_row(conn, candidate.message_id, user_id, target, &now))?;
            if let Advance::Advanced { from } = outcome {
                advanced.push(AdvancedRow { from, ..candidate });
            }
        }
        Ok(advanced)
    }

    /// Messages from the other participant the user has not seen yet.
    pub fn unread_count(&self, conversation_id: Uuid, user_id: Uuid) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*)
                 FROM message_statuses s
                 JOIN messages m ON m.id = s.message_id
                 WHERE m.conversation_id = ?1
                   AND s.user_id = ?2
                   AND m.sender_id != ?2
                   AND s.status < ?3",
                params![conversation_id.to_string(), user_id.to_string(), MessageStatus::Seen.rank()],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Unread counts for every conversation of the user that has any.
    pub fn unread_counts_for_user(&self, user_id: Uuid) -> Result<HashMap<Uuid, u64>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.conversation_id, COUNT(*)
                 FROM message_statuses s
                 JOIN messages m ON m.id = s.message_id
                 WHERE s.user_id = ?1
                   AND m.sender_id != ?1
                   AND s.status < ?2
                 GROUP BY m.conversation_id",
            )?;
            let rows = stmt
                .query_map(params![user_id.to_string(), MessageStatus::Seen.rank()], |row| {
                    Ok((uuid_col(row, 0)?, row.get::<_, i64>(1)? as u64))
                })?
                .collect::<std::result::Result<HashMap<_, _>, _>>()?;
            Ok(rows)
        })
    }
}

fn row_to_candidate(row: &rusqlite::Row) -> rusqlite::Result<AdvancedRow> {
    Ok(AdvancedRow {
        message_id: uuid_col(row, 0)?,
        conversation_id: uuid_col(row, 1)?,
        sender_id: uuid_col(row, 2)?,
        from: status_col(row, 3)?,
    })
}

/// Compare-and-set on one status row.
fn advance_row(
    conn: &Connection,
    message_id: Uuid,
    user_id: Uuid,
    target: MessageStatus,
    now: &str,
) -> Result<Advance> {
    let current = conn
        .query_row(
            "SELECT status FROM message_statuses WHERE message_id = ?1 AND user_id = ?2",
            [message_id.to_string(), user_id.to_string()],
            |row| status_col(row, 0),
        )
        .optional()?;

    let Some(current) = current else {
        return Ok(Advance::Missing);
    };
    if current.dominates(target) {
        return Ok(Advance::Unchanged { current });
    }

    let changed = conn.execute(
        "UPDATE message_statuses SET status = ?3, updated_at = ?4
         WHERE message_id = ?1 AND user_id = ?2 AND status < ?3",
        params![message_id.to_string(), user_id.to_string(), target.rank(), now],
    )?;

    if changed == 1 {
        return Ok(Advance::Advanced { from: current });
    }

    // Lost the race to another writer; report whatever it left behind.
    let current = conn.query_row(
        "SELECT status FROM message_statuses WHERE message_id = ?1 AND user_id = ?2",
        [message_id.to_string(), user_id.to_string()],
        |row| status_col(row, 0),
    )?;
    Ok(Advance::Unchanged { current })
}

fn query_messages(
    conn: &Connection,
    conversation_id: Uuid,
    limit: u32,
    before: Option<Uuid>,
) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM messages
         WHERE conversation_id = ?1
           AND (?2 IS NULL
                OR (created_at, rowid) < (SELECT created_at, rowid FROM messages WHERE id = ?2))
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?3",
        MESSAGE_COLUMNS
    ))?;

    let mut rows = stmt
        .query_map(
            params![conversation_id.to_string(), before.map(|id| id.to_string()), limit],
            row_to_message,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.reverse();
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use murmur_types::models::MessageKind;

    struct Fixture {
        db: Database,
        alice: Uuid,
        bob: Uuid,
        conversation: Uuid,
    }

    fn fixture() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        db.create_user(alice, "alice", "Alice", None, "hash").unwrap();
        db.create_user(bob, "bob", "Bob", None, "hash").unwrap();
        let (conv, _) = db.create_conversation(Uuid::new_v4(), alice, bob).unwrap();
        Fixture { db, alice, bob, conversation: conv.id }
    }

    fn message(f: &Fixture, sender: Uuid, text: &str, created_at: DateTime<Utc>) -> Message {
        let recipient = if sender == f.alice { f.bob } else { f.alice };
        let message = Message {
            id: Uuid::new_v4(),
            conversation_id: f.conversation,
            sender_id: sender,
            kind: MessageKind::Text,
            text: text.to_string(),
            file_url: None,
            created_at,
        };
        f.db.create_message_with_statuses(&message, &[recipient]).unwrap();
        message
    }

    #[test]
    fn creation_writes_sent_rows_and_bumps_watermark() {
        let f = fixture();
        let before = f.db.get_conversation(f.conversation).unwrap().unwrap().updated_at;
        let at = before + Duration::seconds(5);
        let m = message(&f, f.alice, "hi", at);

        let status = f.db.get_status(m.id, f.bob).unwrap().unwrap();
        assert_eq!(status.status, MessageStatus::Sent);
        assert!(f.db.get_status(m.id, f.alice).unwrap().is_none());

        let conv = f.db.get_conversation(f.conversation).unwrap().unwrap();
        assert_eq!(ts(conv.updated_at), ts(at));
    }

    #[test]
    fn failed_status_insert_leaves_no_message() {
        let f = fixture();
        let m = Message {
            id: Uuid::new_v4(),
            conversation_id: f.conversation,
            sender_id: f.alice,
            kind: MessageKind::Text,
            text: "lost".into(),
            file_url: None,
            created_at: Utc::now(),
        };
        // Unknown recipient violates the users foreign key
        assert!(f.db.create_message_with_statuses(&m, &[Uuid::new_v4()]).is_err());
        assert!(f.db.get_message(m.id).unwrap().is_none());
    }

    #[test]
    fn unknown_conversation_rolls_back() {
        let f = fixture();
        let m = Message {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            sender_id: f.alice,
            kind: MessageKind::Text,
            text: "nowhere".into(),
            file_url: None,
            created_at: Utc::now(),
        };
        assert!(f.db.create_message_with_statuses(&m, &[f.bob]).is_err());
        assert!(f.db.get_message(m.id).unwrap().is_none());
    }

    #[test]
    fn advance_is_monotonic() {
        let f = fixture();
        let m = message(&f, f.alice, "hi", Utc::now());

        assert_eq!(
            f.db.advance_status_record(m.id, f.bob, MessageStatus::Seen).unwrap(),
            Advance::Advanced { from: MessageStatus::Sent }
        );
        assert_eq!(
            f.db.advance_status_record(m.id, f.bob, MessageStatus::Delivered).unwrap(),
            Advance::Unchanged { current: MessageStatus::Seen }
        );
        assert_eq!(
            f.db.get_status(m.id, f.bob).unwrap().unwrap().status,
            MessageStatus::Seen
        );
    }

    #[test]
    fn advance_missing_row() {
        let f = fixture();
        let m = message(&f, f.alice, "hi", Utc::now());
        // The sender has no row of their own
        assert_eq!(
            f.db.advance_status_record(m.id, f.alice, MessageStatus::Delivered).unwrap(),
            Advance::Missing
        );
        assert_eq!(
            f.db.advance_status_record(Uuid::new_v4(), f.bob, MessageStatus::Delivered).unwrap(),
            Advance::Missing
        );
    }

    #[test]
    fn bulk_seen_clears_unread() {
        let f = fixture();
        // All three exist before the watermark taken below
        let t0 = Utc::now() - Duration::milliseconds(3);
        let m1 = message(&f, f.alice, "one", t0);
        let _m2 = message(&f, f.alice, "two", t0 + Duration::milliseconds(1));
        let _own = message(&f, f.bob, "mine", t0 + Duration::milliseconds(2));
        f.db.advance_status_record(m1.id, f.bob, MessageStatus::Seen).unwrap();

        assert_eq!(f.db.unread_count(f.conversation, f.bob).unwrap(), 1);
        assert_eq!(f.db.unread_count(f.conversation, f.alice).unwrap(), 1);

        let advanced = f
            .db
            .advance_conversation_statuses(f.conversation, f.bob, MessageStatus::Seen, Utc::now())
            .unwrap();
        assert_eq!(advanced.len(), 1);
        assert_eq!(advanced[0].sender_id, f.alice);
        assert_eq!(advanced[0].from, MessageStatus::Sent);

        assert_eq!(f.db.unread_count(f.conversation, f.bob).unwrap(), 0);
        // Bob's own message is untouched
        assert_eq!(f.db.unread_count(f.conversation, f.alice).unwrap(), 1);
    }

    #[test]
    fn bulk_seen_respects_watermark() {
        let f = fixture();
        let t0 = Utc::now();
        let early = message(&f, f.alice, "early", t0);
        let late = message(&f, f.alice, "late", t0 + Duration::seconds(10));

        let advanced = f
            .db
            .advance_conversation_statuses(f.conversation, f.bob, MessageStatus::Seen, t0 + Duration::seconds(1))
            .unwrap();
        assert_eq!(advanced.len(), 1);
        assert_eq!(advanced[0].message_id, early.id);
        assert_eq!(f.db.get_status(late.id, f.bob).unwrap().unwrap().status, MessageStatus::Sent);
    }

    #[test]
    fn delivered_for_messages_skips_dominated_rows() {
        let f = fixture();
        let t0 = Utc::now();
        let m1 = message(&f, f.alice, "one", t0);
        let m2 = message(&f, f.alice, "two", t0 + Duration::milliseconds(1));
        let own = message(&f, f.bob, "mine", t0 + Duration::milliseconds(2));
        f.db.advance_status_record(m2.id, f.bob, MessageStatus::Seen).unwrap();

        let advanced = f
            .db
            .advance_statuses_for_messages(f.bob, &[m1.id, m2.id, own.id], MessageStatus::Delivered)
            .unwrap();
        assert_eq!(advanced.len(), 1);
        assert_eq!(advanced[0].message_id, m1.id);
        assert_eq!(f.db.get_status(m2.id, f.bob).unwrap().unwrap().status, MessageStatus::Seen);
    }

    #[test]
    fn pagination_is_oldest_first_with_cursor() {
        let f = fixture();
        let t0 = Utc::now();
        let ids: Vec<Uuid> = (0..5)
            .map(|i| message(&f, f.alice, &format!("m{}", i), t0 + Duration::milliseconds(i)).id)
            .collect();

        let page = f.db.list_messages_for_conversation(f.conversation, 2, None).unwrap();
        assert_eq!(page.iter().map(|m| m.id).collect::<Vec<_>>(), vec![ids[3], ids[4]]);

        let older = f.db.list_messages_for_conversation(f.conversation, 2, Some(ids[3])).unwrap();
        assert_eq!(older.iter().map(|m| m.id).collect::<Vec<_>>(), vec![ids[1], ids[2]]);

        assert_eq!(f.db.last_message(f.conversation).unwrap().unwrap().id, ids[4]);

        let statuses = f.db.statuses_for_messages(&ids).unwrap();
        assert_eq!(statuses.len(), 5);

        let counts = f.db.unread_counts_for_user(f.bob).unwrap();
        assert_eq!(counts.get(&f.conversation), Some(&5));
    }
}
