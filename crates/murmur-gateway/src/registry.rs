use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use murmur_types::events::GatewayEvent;

/// Addressable end of one live connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub conn_id: Uuid,
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

impl ConnectionHandle {
    /// Queue an event for this connection. False if it has already gone away.
    pub fn send(&self, event: GatewayEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

struct ConnectionEntry {
    handle: ConnectionHandle,
    /// Conversation rooms this connection has joined
    rooms: HashSet<Uuid>,
}

/// Tracks the single live connection of each user and the rooms it joined.
///
/// In-memory and process-local. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RwLock<HashMap<Uuid, ConnectionEntry>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection for `user_id`, superseding any previous one.
    /// The old connection is not closed here; it just stops being addressable.
    pub async fn register(&self, user_id: Uuid) -> (ConnectionHandle, mpsc::UnboundedReceiver<GatewayEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle {
            conn_id: Uuid::new_v4(),
            tx,
        };

        let previous = self.inner.write().await.insert(
            user_id,
            ConnectionEntry {
                handle: handle.clone(),
                rooms: HashSet::new(),
            },
        );

        if let Some(old) = previous {
            tracing::debug!(
                "Connection {} for {} superseded by {}",
                old.handle.conn_id,
                user_id,
                handle.conn_id
            );
        }

        (handle, rx)
    }

    /// Remove the user's entry, but only if it still belongs to `conn_id`.
    /// Returns true if the entry was removed.
    pub async fn unregister(&self, user_id: Uuid, conn_id: Uuid) -> bool {
        let mut connections = self.inner.write().await;
        match connections.get(&user_id) {
            Some(entry) if entry.handle.conn_id == conn_id => {
                connections.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    pub async fn lookup(&self, user_id: Uuid) -> Option<ConnectionHandle> {
        self.inner
            .read()
            .await
            .get(&user_id)
            .map(|entry| entry.handle.clone())
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.read().await.contains_key(&user_id)
    }

    /// Send a targeted event to a specific user. False if the user has no
    /// live connection; that is the normal offline case, not an error.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) -> bool {
        match self.inner.read().await.get(&user_id) {
            Some(entry) => entry.handle.send(event),
            None => false,
        }
    }

    /// Add rooms to the connection's set. Ignored unless `conn_id` is still
    /// the user's current connection.
    pub async fn join_rooms(&self, user_id: Uuid, conn_id: Uuid, rooms: impl IntoIterator<Item = Uuid>) -> bool {
        let mut connections = self.inner.write().await;
        match connections.get_mut(&user_id) {
            Some(entry) if entry.handle.conn_id == conn_id => {
                entry.rooms.extend(rooms);
                true
            }
            _ => false,
        }
    }

    pub async fn in_room(&self, user_id: Uuid, room: Uuid) -> bool {
        self.inner
            .read()
            .await
            .get(&user_id)
            .is_some_and(|entry| entry.rooms.contains(&room))
    }

    /// Deliver to every live connection that joined `room`, skipping
    /// `except`. Returns the number of connections reached.
    pub async fn broadcast_to_room(&self, room: Uuid, event: GatewayEvent, except: Option<Uuid>) -> usize {
        let connections = self.inner.read().await;
        let mut reached = 0;
        for (user_id, entry) in connections.iter() {
            if Some(*user_id) == except || !entry.rooms.contains(&room) {
                continue;
            }
            if entry.handle.send(event.clone()) {
                reached += 1;
            }
        }
        reached
    }

    pub async fn connected_count(&self) -> usize {
        self.inner.read().await.len()
    }
}
