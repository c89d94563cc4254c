//! End-to-end walk through the delivery core without a network: two users,
//! one offline while the message is sent, catching up over the pull path.

use std::sync::Arc;

use murmur_db::Database;
use murmur_gateway::service::NewMessage;
use murmur_gateway::{ChatService, Registry};
use murmur_types::events::GatewayEvent;
use murmur_types::models::MessageStatus;
use uuid::Uuid;

fn service_with_users() -> (ChatService, Uuid, Uuid) {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    db.create_user(a, "alice", "Alice", None, "hash").unwrap();
    db.create_user(b, "bob", "Bob", None, "hash").unwrap();
    (ChatService::new(db, Registry::new()), a, b)
}

#[tokio::test]
async fn offline_recipient_catches_up_over_pull() {
    let (service, a, b) = service_with_users();
    let (handle_a, mut rx_a) = service.registry().register(a).await;
    service.presence().connected(a).await;

    // A creates the conversation with B; asking again yields the same one
    let (c1, _, created) = service.create_conversation(a, b).await.unwrap();
    assert!(created);
    assert_eq!(c1.participants.len(), 2);
    let (again, _, created) = service.create_conversation(b, a).await.unwrap();
    assert_eq!(again.id, c1.id);
    assert!(!created);

    service
        .join_conversations(a, handle_a.conn_id, vec![c1.id])
        .await
        .unwrap();

    // A sends "hi" while B is offline
    let m1 = service
        .send_message(a, c1.id, NewMessage::text("hi"))
        .await
        .unwrap();
    assert_eq!(m1.statuses.len(), 1);
    assert_eq!(m1.statuses[0].user_id, b);
    assert_eq!(m1.statuses[0].status, MessageStatus::Sent);
    let m1 = m1.message;

    // Only the sender's echo went out
    assert!(matches!(rx_a.try_recv(), Ok(GatewayEvent::NewMessage { .. })));
    assert!(rx_a.try_recv().is_err());

    // B pulls: sees M1 as SENT, and the pull marks it DELIVERED
    let page = service.pull_messages(b, c1.id, 50, None).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, m1.id);
    assert_eq!(page[0].text, "hi");
    assert_eq!(page[0].status, MessageStatus::Sent);
    match rx_a.try_recv() {
        Ok(GatewayEvent::MessageStatusUpdate { message_id, status, .. }) => {
            assert_eq!(message_id, m1.id);
            assert_eq!(status, MessageStatus::Delivered);
        }
        other => panic!("expected DELIVERED update, got {:?}", other),
    }
    assert_eq!(service.unread_count(b, c1.id).await.unwrap(), 1);

    // B opens C1: M1 becomes SEEN and A hears about it
    assert_eq!(service.mark_conversation_seen(b, c1.id).await.unwrap(), 1);
    match rx_a.try_recv() {
        Ok(GatewayEvent::MessageStatusUpdate { message_id, status, user_id, .. }) => {
            assert_eq!(message_id, m1.id);
            assert_eq!(status, MessageStatus::Seen);
            assert_eq!(user_id, b);
        }
        other => panic!("expected SEEN update, got {:?}", other),
    }
    assert!(matches!(
        rx_a.try_recv(),
        Ok(GatewayEvent::ConversationSeen { user_id, .. }) if user_id == b
    ));
    assert_eq!(service.unread_count(b, c1.id).await.unwrap(), 0);

    // A late DELIVERED ack does not move it back
    let late = service.mark_delivered(b, m1.id).await.unwrap();
    assert!(!late.advanced);
    assert_eq!(late.status, MessageStatus::Seen);
    assert!(rx_a.try_recv().is_err());
}

#[tokio::test]
async fn online_recipient_gets_push_and_presence() {
    let (service, a, b) = service_with_users();
    let (c1, _, _) = service.create_conversation(a, b).await.unwrap();

    let (_ha, mut rx_a) = service.registry().register(a).await;
    service.presence().connected(a).await;

    let (hb, mut rx_b) = service.registry().register(b).await;
    service.presence().connected(b).await;

    // A learns B came online; B gets a snapshot that A is online
    assert!(matches!(
        rx_a.try_recv(),
        Ok(GatewayEvent::UserStatusUpdate { user_id, online: true, .. }) if user_id == b
    ));
    assert!(matches!(
        rx_b.try_recv(),
        Ok(GatewayEvent::UserStatusUpdate { user_id, online: true, .. }) if user_id == a
    ));

    let m = service
        .send_message(a, c1.id, NewMessage::text("ping"))
        .await
        .unwrap()
        .message;

    assert!(matches!(
        rx_b.try_recv(),
        Ok(GatewayEvent::NewMessage { message, .. }) if message.id == m.id
    ));
    assert!(matches!(
        rx_b.try_recv(),
        Ok(GatewayEvent::ConversationUpdated { conversation_id }) if conversation_id == c1.id
    ));

    // B acks delivery over the socket path; A sees the tick
    let _ = rx_a.try_recv(); // echo of A's own message
    service.mark_delivered(b, m.id).await.unwrap();
    assert!(matches!(
        rx_a.try_recv(),
        Ok(GatewayEvent::MessageStatusUpdate { status: MessageStatus::Delivered, .. })
    ));

    // B disconnects: A is told, with a last-seen stamp
    assert!(service.registry().unregister(b, hb.conn_id).await);
    service.presence().disconnected(b).await;
    assert!(matches!(
        rx_a.try_recv(),
        Ok(GatewayEvent::UserStatusUpdate { online: false, last_seen: Some(_), .. })
    ));
}

#[tokio::test]
async fn reconnect_routes_to_newest_connection() {
    let (service, a, b) = service_with_users();
    let (c1, _, _) = service.create_conversation(a, b).await.unwrap();

    let (old, mut old_rx) = service.registry().register(b).await;
    let (_new, mut new_rx) = service.registry().register(b).await;

    service
        .send_message(a, c1.id, NewMessage::text("after reconnect"))
        .await
        .unwrap();

    assert!(matches!(new_rx.try_recv(), Ok(GatewayEvent::NewMessage { .. })));
    assert!(old_rx.try_recv().is_err());

    // The stale connection closing does not knock B offline
    assert!(!service.registry().unregister(b, old.conn_id).await);
    assert!(service.registry().is_online(b).await);
}
