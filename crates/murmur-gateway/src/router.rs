use tracing::{debug, trace};
use uuid::Uuid;

use murmur_types::api::MessageResponse;
use murmur_types::events::GatewayEvent;
use murmur_types::models::{Message, MessageStatus};

use crate::registry::Registry;

/// Turns ledger changes into events for whoever is connected right now.
/// Nothing is queued for offline users: they catch up through the pull path.
#[derive(Clone)]
pub struct FanoutRouter {
    registry: Registry,
}

impl FanoutRouter {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// Push `new_message` to every live participant (the sender's own
    /// connection gets it as an echo of the persisted message), plus a
    /// `conversation_updated` inbox ping to each live participant other than
    /// the sender. Returns how many recipients got the message.
    pub async fn on_message_created(&self, message: &Message, participants: &[Uuid]) -> usize {
        let formatted = MessageResponse::new(message, MessageStatus::Sent);
        let mut delivered = 0;

        for &participant in participants {
            let pushed = self
                .registry
                .send_to_user(
                    participant,
                    GatewayEvent::NewMessage {
                        conversation_id: message.conversation_id,
                        message: formatted.clone(),
                    },
                )
                .await;

            if participant == message.sender_id {
                continue;
            }

            if pushed {
                delivered += 1;
                self.registry
                    .send_to_user(
                        participant,
                        GatewayEvent::ConversationUpdated {
                            conversation_id: message.conversation_id,
                        },
                    )
                    .await;
            } else {
                debug!(
                    "{} offline, message {} left for pull",
                    participant, message.id
                );
            }
        }

        delivered
    }

    /// Tell the sender a recipient's status moved. Silent if the sender is
    /// the recipient or is offline.
    pub async fn on_status_changed(
        &self,
        message_id: Uuid,
        conversation_id: Uuid,
        sender_id: Uuid,
        recipient_id: Uuid,
        status: MessageStatus,
    ) -> bool {
        if sender_id == recipient_id {
            return false;
        }

        self.registry
            .send_to_user(
                sender_id,
                GatewayEvent::MessageStatusUpdate {
                    message_id,
                    conversation_id,
                    user_id: recipient_id,
                    status,
                },
            )
            .await
    }

    pub async fn on_conversation_seen(&self, conversation_id: Uuid, reader_id: Uuid, peer_id: Uuid) -> bool {
        self.registry
            .send_to_user(
                peer_id,
                GatewayEvent::ConversationSeen {
                    conversation_id,
                    user_id: reader_id,
                },
            )
            .await
    }

    /// Relay a typing indicator to the conversation room, minus the typist.
    /// Perishable: nothing is stored or retried.
    pub async fn on_typing(&self, user_id: Uuid, conversation_id: Uuid, is_typing: bool) -> usize {
        if !self.registry.in_room(user_id, conversation_id).await {
            trace!("{} typing in unjoined room {}, dropped", user_id, conversation_id);
            return 0;
        }

        self.registry
            .broadcast_to_room(
                conversation_id,
                GatewayEvent::UserTyping {
                    user_id,
                    conversation_id,
                    is_typing,
                },
                Some(user_id),
            )
            .await
    }
}
