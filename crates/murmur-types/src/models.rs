use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-recipient delivery state. Ordered: `Sent < Delivered < Seen`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Seen,
}

impl MessageStatus {
    /// Integer rank as stored in the `message_statuses.status` column.
    pub fn rank(self) -> i64 {
        match self {
            Self::Sent => 0,
            Self::Delivered => 1,
            Self::Seen => 2,
        }
    }

    pub fn from_rank(rank: i64) -> Option<Self> {
        match rank {
            0 => Some(Self::Sent),
            1 => Some(Self::Delivered),
            2 => Some(Self::Seen),
            _ => None,
        }
    }

    /// True if moving from `self` to `target` would not advance the record.
    pub fn dominates(self, target: Self) -> bool {
        self >= target
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "SENT",
            Self::Delivered => "DELIVERED",
            Self::Seen => "SEEN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Image => "IMAGE",
            Self::File => "FILE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TEXT" => Some(Self::Text),
            "IMAGE" => Some(Self::Image),
            "FILE" => Some(Self::File),
            _ => None,
        }
    }
}

/// Public user profile. Never carries the password hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub online: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A private conversation between exactly two distinct users.
/// Participants are kept in ascending order so each unordered pair
/// has a single canonical form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub participants: [Uuid; 2],
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn has_participant(&self, user_id: Uuid) -> bool {
        self.participants.contains(&user_id)
    }

    /// The other participant, or `None` if `user_id` is not a member.
    pub fn peer_of(&self, user_id: Uuid) -> Option<Uuid> {
        match self.participants {
            [a, b] if a == user_id => Some(b),
            [a, b] if b == user_id => Some(a),
            _ => None,
        }
    }
}

/// Canonical ordering of an unordered participant pair.
pub fn ordered_pair(a: Uuid, b: Uuid) -> [Uuid; 2] {
    if a <= b { [a, b] } else { [b, a] }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub kind: MessageKind,
    pub text: String,
    pub file_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRecord {
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub status: MessageStatus,
    pub updated_at: DateTime<Utc>,
}

/// A freshly ingested message together with the status rows created with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedMessage {
    pub message: Message,
    pub statuses: Vec<StatusRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_order_is_monotonic() {
        assert!(MessageStatus::Sent < MessageStatus::Delivered);
        assert!(MessageStatus::Delivered < MessageStatus::Seen);
        assert!(MessageStatus::Seen.dominates(MessageStatus::Delivered));
        assert!(MessageStatus::Delivered.dominates(MessageStatus::Delivered));
        assert!(!MessageStatus::Sent.dominates(MessageStatus::Seen));
    }

    #[test]
    fn rank_maps_back() {
        for s in [MessageStatus::Sent, MessageStatus::Delivered, MessageStatus::Seen] {
            assert_eq!(MessageStatus::from_rank(s.rank()), Some(s));
        }
        assert_eq!(MessageStatus::from_rank(7), None);
    }

    #[test]
    fn peer_lookup() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let conv = Conversation {
            id: Uuid::new_v4(),
            participants: ordered_pair(a, b),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(conv.peer_of(a), Some(b));
        assert_eq!(conv.peer_of(b), Some(a));
        assert_eq!(conv.peer_of(Uuid::new_v4()), None);
        assert_eq!(ordered_pair(a, b), ordered_pair(b, a));
    }

    #[test]
    fn status_serializes_uppercase() {
        let json = serde_json::to_string(&MessageStatus::Delivered).unwrap();
        assert_eq!(json, "\"DELIVERED\"");
        let kind: MessageKind = serde_json::from_str("\"IMAGE\"").unwrap();
        assert_eq!(kind, MessageKind::Image);
    }
}
