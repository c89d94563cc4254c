//! Message ingest and status transitions.
//!
//! Both the WebSocket commands and the REST handlers go through
//! [`ChatService`], so the push and pull paths leave identical state behind.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{SubsecRound, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use murmur_db::{Advance, Database};
use murmur_types::api::{ConversationSummary, MessageResponse, StatusChangeResponse};
use murmur_types::models::{
    Conversation, CreatedMessage, Message, MessageKind, MessageStatus, StatusRecord, User,
};

use crate::error::{ChatError, Result};
use crate::presence::Presence;
use crate::registry::Registry;
use crate::router::FanoutRouter;
use crate::run_blocking;

/// Longest accepted message body, in bytes.
pub const MAX_TEXT_LEN: usize = 4000;

/// Hard cap on one page of pulled messages.
pub const MAX_PAGE: u32 = 200;

/// Results returned by the user search.
const SEARCH_LIMIT: u32 = 10;

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub kind: MessageKind,
    pub text: String,
    pub file_url: Option<String>,
}

impl NewMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Text,
            text: text.into(),
            file_url: None,
        }
    }

    fn validate(&self) -> Result<()> {
        let has_file = self.file_url.as_deref().is_some_and(|u| !u.trim().is_empty());
        if self.text.trim().is_empty() && !has_file {
            return Err(ChatError::Invalid("message text is empty".into()));
        }
        if self.text.len() > MAX_TEXT_LEN {
            return Err(ChatError::Invalid(format!(
                "message text exceeds {} bytes",
                MAX_TEXT_LEN
            )));
        }
        if self.kind != MessageKind::Text && !has_file {
            return Err(ChatError::Invalid(format!(
                "{} message needs a file_url",
                self.kind.as_str()
            )));
        }
        Ok(())
    }
}

/// Shared entry point to the delivery core. Cheap to clone.
#[derive(Clone)]
pub struct ChatService {
    db: Arc<Database>,
    registry: Registry,
    router: FanoutRouter,
    presence: Presence,
}

impl ChatService {
    pub fn new(db: Arc<Database>, registry: Registry) -> Self {
        Self {
            router: FanoutRouter::new(registry.clone()),
            presence: Presence::new(db.clone(), registry.clone()),
            db,
            registry,
        }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn router(&self) -> &FanoutRouter {
        &self.router
    }

    pub fn presence(&self) -> &Presence {
        &self.presence
    }

    /// Load the conversation and check `user_id` belongs to it.
    async fn participant_conversation(&self, user_id: Uuid, conversation_id: Uuid) -> Result<Conversation> {
        let conversation = run_blocking(&self.db, move |db| db.get_conversation(conversation_id))
            .await?
            .ok_or(ChatError::NotFound("conversation"))?;

        if !conversation.has_participant(user_id) {
            return Err(ChatError::NotAParticipant);
        }
        Ok(conversation)
    }

    // -- Conversations --

    /// Idempotent per unordered pair. The bool is true if a new conversation
    /// was created.
    pub async fn create_conversation(&self, user_id: Uuid, peer_id: Uuid) -> Result<(Conversation, User, bool)> {
        if user_id == peer_id {
            return Err(ChatError::Invalid("cannot start a conversation with yourself".into()));
        }

        let (conversation, peer, created) = run_blocking(&self.db, move |db| {
            let Some(peer) = db.get_user_by_id(peer_id)? else {
                return Ok(None);
            };
            let (conversation, created) = db.create_conversation(Uuid::new_v4(), user_id, peer_id)?;
            Ok(Some((conversation, peer, created)))
        })
        .await?
        .ok_or(ChatError::NotFound("user"))?;

        if created {
            info!("Conversation {} created for {} and {}", conversation.id, user_id, peer_id);
        }
        Ok((conversation, self.with_live_presence(peer).await, created))
    }

    /// Inbox for `user_id`, most recently active first.
    pub async fn list_conversations(&self, user_id: Uuid) -> Result<Vec<ConversationSummary>> {
        let rows = run_blocking(&self.db, move |db| {
            let conversations = db.list_conversations_for_user(user_id)?;
            let unread = db.unread_counts_for_user(user_id)?;

            let mut rows = Vec::with_capacity(conversations.len());
            for conversation in conversations {
                let Some(peer_id) = conversation.peer_of(user_id) else {
                    continue;
                };
                let Some(peer) = db.get_user_by_id(peer_id)? else {
                    warn!("Conversation {} references missing user {}", conversation.id, peer_id);
                    continue;
                };
                let last_message = match db.last_message(conversation.id)? {
                    Some(message) => {
                        let statuses = db.statuses_for_messages(&[message.id])?;
                        let status = viewer_status(&message, user_id, &statuses);
                        Some(MessageResponse::new(&message, status))
                    }
                    None => None,
                };
                let unread_count = unread.get(&conversation.id).copied().unwrap_or(0);
                rows.push((conversation, peer, last_message, unread_count));
            }
            Ok(rows)
        })
        .await?;

        let mut summaries = Vec::with_capacity(rows.len());
        for (conversation, peer, last_message, unread_count) in rows {
            summaries.push(ConversationSummary {
                id: conversation.id,
                peer: self.with_live_presence(peer).await,
                last_message,
                unread_count,
                updated_at: conversation.updated_at,
            });
        }
        Ok(summaries)
    }

    /// The registry is the authority on who is connected to this process;
    /// the stored flag can lag behind it.
    async fn with_live_presence(&self, mut user: User) -> User {
        user.online = self.registry.is_online(user.id).await;
        user
    }

    /// Filter `conversation_ids` down to those the user participates in and
    /// join their rooms on connection `conn_id`.
    pub async fn join_conversations(
        &self,
        user_id: Uuid,
        conn_id: Uuid,
        conversation_ids: Vec<Uuid>,
    ) -> Result<Vec<Uuid>> {
        let joinable = run_blocking(&self.db, move |db| {
            let mine: Vec<Uuid> = db
                .list_conversations_for_user(user_id)?
                .into_iter()
                .map(|c| c.id)
                .collect();
            Ok(conversation_ids
                .into_iter()
                .filter(|id| mine.contains(id))
                .collect::<Vec<_>>())
        })
        .await?;

        self.registry
            .join_rooms(user_id, conn_id, joinable.iter().copied())
            .await;
        Ok(joinable)
    }

    pub async fn search_users(&self, user_id: Uuid, search: Option<String>) -> Result<Vec<User>> {
        let users = run_blocking(&self.db, move |db| {
            db.search_users(search.as_deref(), user_id, SEARCH_LIMIT)
        })
        .await?;

        let mut out = Vec::with_capacity(users.len());
        for user in users {
            out.push(self.with_live_presence(user).await);
        }
        Ok(out)
    }

    // -- Ingest --

    /// Persist a message with a SENT row for every other participant, then
    /// fan it out. Nothing is pushed unless the whole write committed.
    pub async fn send_message(
        &self,
        sender_id: Uuid,
        conversation_id: Uuid,
        new: NewMessage,
    ) -> Result<CreatedMessage> {
        new.validate()?;
        let conversation = self.participant_conversation(sender_id, conversation_id).await?;
        let recipients: Vec<Uuid> = conversation
            .participants
            .iter()
            .copied()
            .filter(|p| *p != sender_id)
            .collect();

        let message = Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            kind: new.kind,
            text: new.text,
            file_url: new.file_url.filter(|u| !u.trim().is_empty()),
            created_at: Utc::now().trunc_subsecs(6),
        };

        let to_store = message.clone();
        let statuses = run_blocking(&self.db, move |db| {
            db.create_message_with_statuses(&to_store, &recipients)
        })
        .await?;

        debug!(
            "Message {} stored in {} with {} status rows",
            message.id,
            conversation_id,
            statuses.len()
        );

        self.router
            .on_message_created(&message, &conversation.participants)
            .await;

        Ok(CreatedMessage { message, statuses })
    }

    // -- Status transitions --

    /// Move the (message, user) status forward to `target`. Already at or
    /// past `target` is a successful no-op.
    pub async fn advance_status(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        target: MessageStatus,
    ) -> Result<StatusChangeResponse> {
        let outcome = run_blocking(&self.db, move |db| {
            let outcome = db.advance_status_record(message_id, user_id, target)?;
            let message = match outcome {
                Advance::Advanced { .. } => db.get_message(message_id)?,
                _ => None,
            };
            Ok((outcome, message))
        })
        .await?;

        match outcome {
            (Advance::Missing, _) => Err(ChatError::NotFound("message status")),
            (Advance::Unchanged { current }, _) => Ok(StatusChangeResponse {
                message_id,
                status: current,
                advanced: false,
            }),
            (Advance::Advanced { from }, message) => {
                debug!("{} {} -> {} for {}", message_id, from.as_str(), target.as_str(), user_id);
                if let Some(message) = message {
                    self.router
                        .on_status_changed(
                            message_id,
                            message.conversation_id,
                            message.sender_id,
                            user_id,
                            target,
                        )
                        .await;
                }
                Ok(StatusChangeResponse {
                    message_id,
                    status: target,
                    advanced: true,
                })
            }
        }
    }

    pub async fn mark_delivered(&self, user_id: Uuid, message_id: Uuid) -> Result<StatusChangeResponse> {
        self.advance_status(message_id, user_id, MessageStatus::Delivered).await
    }

    pub async fn mark_seen(&self, user_id: Uuid, message_id: Uuid) -> Result<StatusChangeResponse> {
        self.advance_status(message_id, user_id, MessageStatus::Seen).await
    }

    /// The user opened the conversation: every message from the peer that
    /// existed at this moment becomes SEEN, row by row. Returns how many
    /// rows moved.
    pub async fn mark_conversation_seen(&self, user_id: Uuid, conversation_id: Uuid) -> Result<usize> {
        let conversation = self.participant_conversation(user_id, conversation_id).await?;
        let up_to = Utc::now();

        let advanced = run_blocking(&self.db, move |db| {
            db.advance_conversation_statuses(conversation_id, user_id, MessageStatus::Seen, up_to)
        })
        .await?;

        for row in &advanced {
            self.router
                .on_status_changed(row.message_id, row.conversation_id, row.sender_id, user_id, MessageStatus::Seen)
                .await;
        }

        if !advanced.is_empty() {
            if let Some(peer) = conversation.peer_of(user_id) {
                self.router
                    .on_conversation_seen(conversation_id, user_id, peer)
                    .await;
            }
        }

        debug!("{} saw {} messages in {}", user_id, advanced.len(), conversation_id);
        Ok(advanced.len())
    }

    /// Pull path: one page of messages as the caller sees them, with the
    /// status each had before this call. Received messages still SENT are
    /// then advanced to DELIVERED. Opening the conversation (SEEN) is a
    /// separate step.
    pub async fn pull_messages(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        limit: u32,
        before: Option<Uuid>,
    ) -> Result<Vec<MessageResponse>> {
        self.participant_conversation(user_id, conversation_id).await?;
        let limit = limit.clamp(1, MAX_PAGE);

        let (page, advanced) = run_blocking(&self.db, move |db| {
            let messages = db.list_messages_for_conversation(conversation_id, limit, before)?;
            let ids: Vec<Uuid> = messages.iter().map(|m| m.id).collect();
            let statuses = db.statuses_for_messages(&ids)?;

            let page: Vec<MessageResponse> = messages
                .iter()
                .map(|m| MessageResponse::new(m, viewer_status(m, user_id, &statuses)))
                .collect();

            let received: Vec<Uuid> = messages
                .iter()
                .filter(|m| m.sender_id != user_id)
                .map(|m| m.id)
                .collect();
            let advanced = db.advance_statuses_for_messages(user_id, &received, MessageStatus::Delivered)?;

            Ok((page, advanced))
        })
        .await?;

        for row in &advanced {
            self.router
                .on_status_changed(
                    row.message_id,
                    row.conversation_id,
                    row.sender_id,
                    user_id,
                    MessageStatus::Delivered,
                )
                .await;
        }

        Ok(page)
    }

    pub async fn unread_count(&self, user_id: Uuid, conversation_id: Uuid) -> Result<u64> {
        self.participant_conversation(user_id, conversation_id).await?;
        Ok(run_blocking(&self.db, move |db| db.unread_count(conversation_id, user_id)).await?)
    }
}

/// Status of `message` from `viewer`'s point of view: the lowest recipient
/// status for the viewer's own messages, the viewer's own row otherwise.
fn viewer_status(message: &Message, viewer: Uuid, statuses: &[StatusRecord]) -> MessageStatus {
    let mut by_user: HashMap<Uuid, MessageStatus> = HashMap::new();
    for s in statuses.iter().filter(|s| s.message_id == message.id) {
        by_user.insert(s.user_id, s.status);
    }

    if message.sender_id == viewer {
        by_user
            .iter()
            .filter(|(user, _)| **user != viewer)
            .map(|(_, status)| *status)
            .min()
            .unwrap_or(MessageStatus::Sent)
    } else {
        by_user.get(&viewer).copied().unwrap_or(MessageStatus::Sent)
    }
}
