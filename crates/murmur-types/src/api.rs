use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, MessageKind, MessageStatus, User};

// -- JWT Claims --

/// JWT claims shared across murmur-api (REST middleware) and the
/// WebSocket upgrade in murmur-server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

// -- Users --

#[derive(Debug, Deserialize)]
pub struct UserSearchQuery {
    #[serde(default)]
    pub search: Option<String>,
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateConversationRequest {
    pub participant_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub id: Uuid,
    pub participants: [Uuid; 2],
    pub peer: User,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// False when an existing conversation for the pair was returned.
    pub created: bool,
}

/// One inbox row.
#[derive(Debug, Serialize)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub peer: User,
    pub last_message: Option<MessageResponse>,
    pub unread_count: u64,
    pub updated_at: DateTime<Utc>,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub text: String,
    #[serde(default, rename = "type")]
    pub kind: Option<MessageKind>,
    #[serde(default)]
    pub file_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor: id of the oldest message from the previous page.
    pub before: Option<Uuid>,
}

fn default_limit() -> u32 {
    50
}

/// A message as presented to one viewer. `status` is the recipient's status
/// for the viewer's own messages, and the viewer's status otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub text: String,
    pub file_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: MessageStatus,
}

impl MessageResponse {
    pub fn new(message: &Message, status: MessageStatus) -> Self {
        Self {
            id: message.id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            kind: message.kind,
            text: message.text.clone(),
            file_url: message.file_url.clone(),
            created_at: message.created_at,
            status,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusChangeResponse {
    pub message_id: Uuid,
    pub status: MessageStatus,
    /// False when the record already dominated the requested status.
    pub advanced: bool,
}

#[derive(Debug, Serialize)]
pub struct ConversationSeenResponse {
    pub conversation_id: Uuid,
    pub updated: usize,
}
