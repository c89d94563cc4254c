use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use murmur_db::Database;
use murmur_types::events::GatewayEvent;

use crate::registry::Registry;
use crate::run_blocking;

/// Keeps the durable online/last-seen flags in step with the registry and
/// tells conversation peers about changes.
///
/// Best-effort: storage failures are logged and never abort a connect or
/// disconnect. A stale `online` flag is corrected by the next disconnect.
#[derive(Clone)]
pub struct Presence {
    db: Arc<Database>,
    registry: Registry,
}

impl Presence {
    pub fn new(db: Arc<Database>, registry: Registry) -> Self {
        Self { db, registry }
    }

    /// Call after the user's connection is registered.
    pub async fn connected(&self, user_id: Uuid) {
        self.persist(user_id, true, None).await;

        let peers = self.peers_of(user_id).await;
        let mut notified = 0;
        for &peer in &peers {
            if self.registry.send_to_user(peer, status_event(user_id, true, None)).await {
                notified += 1;
            }

            // Let the new connection know which peers are already here
            if self.registry.is_online(peer).await {
                self.registry
                    .send_to_user(user_id, status_event(peer, true, None))
                    .await;
            }
        }

        debug!("{} online, notified {}/{} peers", user_id, notified, peers.len());
    }

    /// Call after the user's connection was unregistered. Skip it when a
    /// newer connection superseded this one.
    pub async fn disconnected(&self, user_id: Uuid) {
        let last_seen = Utc::now().trunc_subsecs(6);
        self.persist(user_id, false, Some(last_seen)).await;

        let peers = self.peers_of(user_id).await;
        for &peer in &peers {
            self.registry
                .send_to_user(peer, status_event(user_id, false, Some(last_seen)))
                .await;
        }

        debug!("{} offline, {} peers", user_id, peers.len());
    }

    async fn persist(&self, user_id: Uuid, online: bool, last_seen: Option<DateTime<Utc>>) {
        match run_blocking(&self.db, move |db| db.set_user_online(user_id, online, last_seen)).await {
            Ok(true) => {}
            Ok(false) => warn!("Presence update for unknown user {}", user_id),
            Err(e) => warn!("Failed to persist presence for {}: {}", user_id, e),
        }
    }

    /// Every user that shares a conversation with `user_id`.
    async fn peers_of(&self, user_id: Uuid) -> Vec<Uuid> {
        match run_blocking(&self.db, move |db| db.list_conversations_for_user(user_id)).await {
            Ok(conversations) => conversations
                .iter()
                .filter_map(|c| c.peer_of(user_id))
                .collect(),
            Err(e) => {
                warn!("Failed to list conversations for {}: {}", user_id, e);
                Vec::new()
            }
        }
    }
}

fn status_event(user_id: Uuid, online: bool, last_seen: Option<DateTime<Utc>>) -> GatewayEvent {
    GatewayEvent::UserStatusUpdate {
        user_id,
        online,
        last_seen,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Arc<Database>, Registry, Presence) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let registry = Registry::new();
        let presence = Presence::new(db.clone(), registry.clone());
        (db, registry, presence)
    }

    fn user(db: &Database, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        db.create_user(id, name, name, None, "hash").unwrap();
        id
    }

    #[tokio::test]
    async fn connect_and_disconnect_reach_peers_only() {
        let (db, registry, presence) = setup();
        let a = user(&db, "alice");
        let b = user(&db, "bob");
        let stranger = user(&db, "carol");
        db.create_conversation(Uuid::new_v4(), a, b).unwrap();

        let (_hb, mut rx_b) = registry.register(b).await;
        let (_hs, mut rx_s) = registry.register(stranger).await;
        let (ha, mut rx_a) = registry.register(a).await;

        presence.connected(a).await;
        assert!(db.get_user_by_id(a).unwrap().unwrap().online);

        match rx_b.try_recv() {
            Ok(GatewayEvent::UserStatusUpdate { user_id, online, last_seen }) => {
                assert_eq!(user_id, a);
                assert!(online);
                assert!(last_seen.is_none());
            }
            other => panic!("expected presence event, got {:?}", other),
        }
        // Snapshot of peers already online
        assert!(matches!(
            rx_a.try_recv(),
            Ok(GatewayEvent::UserStatusUpdate { user_id, online: true, .. }) if user_id == b
        ));
        assert!(rx_s.try_recv().is_err());

        registry.unregister(a, ha.conn_id).await;
        presence.disconnected(a).await;

        let stored = db.get_user_by_id(a).unwrap().unwrap();
        assert!(!stored.online);
        assert!(stored.last_seen_at.is_some());
        match rx_b.try_recv() {
            Ok(GatewayEvent::UserStatusUpdate { online, last_seen, .. }) => {
                assert!(!online);
                assert_eq!(last_seen, stored.last_seen_at);
            }
            other => panic!("expected offline event, got {:?}", other),
        }
        assert!(rx_s.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_user_does_not_abort() {
        let (_db, _registry, presence) = setup();
        // No such user row: logged, not propagated
        presence.connected(Uuid::new_v4()).await;
        presence.disconnected(Uuid::new_v4()).await;
    }
}
