use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::MessageResponse;
use crate::models::{MessageKind, MessageStatus};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// Server confirms the connection is registered
    Ready { user_id: Uuid, username: String },

    /// A message was created in a conversation the receiver belongs to
    NewMessage {
        conversation_id: Uuid,
        message: MessageResponse,
    },

    /// Lightweight inbox ping: re-pull the conversation list
    ConversationUpdated { conversation_id: Uuid },

    /// A recipient's status for one of your messages moved forward
    MessageStatusUpdate {
        message_id: Uuid,
        conversation_id: Uuid,
        user_id: Uuid,
        status: MessageStatus,
    },

    /// The peer has opened the conversation and read everything in it
    ConversationSeen { conversation_id: Uuid, user_id: Uuid },

    /// A peer came online or went offline
    UserStatusUpdate {
        user_id: Uuid,
        online: bool,
        last_seen: Option<DateTime<Utc>>,
    },

    /// A peer started or stopped typing
    UserTyping {
        user_id: Uuid,
        conversation_id: Uuid,
        is_typing: bool,
    },

    /// A command from this connection failed
    Error { message: String },
}

impl GatewayEvent {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::NewMessage { .. } => "new_message",
            Self::ConversationUpdated { .. } => "conversation_updated",
            Self::MessageStatusUpdate { .. } => "message_status_update",
            Self::ConversationSeen { .. } => "conversation_seen",
            Self::UserStatusUpdate { .. } => "user_status_update",
            Self::UserTyping { .. } => "user_typing",
            Self::Error { .. } => "error",
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GatewayCommand {
    /// Join the broadcast rooms of these conversations.
    /// Ids the caller does not participate in are ignored.
    JoinConversations { conversation_ids: Vec<Uuid> },

    SendMessage {
        conversation_id: Uuid,
        text: String,
        #[serde(default, rename = "type")]
        kind: Option<MessageKind>,
        #[serde(default)]
        file_url: Option<String>,
    },

    /// Acknowledge receipt of a pushed message
    MessageDelivered { message_id: Uuid },

    /// The user opened the conversation
    MessageSeen { conversation_id: Uuid },

    Typing { conversation_id: Uuid, is_typing: bool },
}
