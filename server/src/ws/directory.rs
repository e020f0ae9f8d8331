//! Live Connection Directory
//!
//! Maps user ids to their current live WebSocket connection. The engine
//! only ever talks to the `ConnectionDirectory` trait, so it stays
//! process-agnostic; this in-process implementation is the transport
//! layer's concern.

use dashmap::{DashMap, DashSet};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::ServerEvent;

/// Resolution and delivery of events to one specific live connection.
/// Delivery is non-blocking; a full or closed channel counts as
/// unreachable.
pub trait ConnectionDirectory: Send + Sync {
    /// The user's current connection id, if they are connected right now.
    fn resolve(&self, user_id: Uuid) -> Option<Uuid>;

    /// Deliver an event to the user's current connection. Returns whether
    /// the event was accepted by a live connection.
    fn deliver(&self, user_id: Uuid, event: ServerEvent) -> bool;
}

struct ConnectionHandle {
    connection_id: Uuid,
    tx: mpsc::Sender<ServerEvent>,
}

/// In-process directory backed by the WebSocket handler's per-socket
/// channels. Reconnects replace the entry; a stale socket's cleanup only
/// removes the entry it registered.
#[derive(Default)]
pub struct WsDirectory {
    connections: DashMap<Uuid, ConnectionHandle>,
    stats_subscribers: DashSet<Uuid>,
}

impl WsDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a user's live connection.
    pub fn register(&self, user_id: Uuid, connection_id: Uuid, tx: mpsc::Sender<ServerEvent>) {
        self.connections
            .insert(user_id, ConnectionHandle { connection_id, tx });
    }

    /// Remove a user's connection, but only if it is still the one that
    /// registered; a reconnect that already replaced it is left alone.
    pub fn unregister(&self, user_id: Uuid, connection_id: Uuid) {
        self.connections
            .remove_if(&user_id, |_, handle| handle.connection_id == connection_id);
        self.stats_subscribers.remove(&user_id);
    }

    pub fn subscribe_stats(&self, user_id: Uuid) {
        self.stats_subscribers.insert(user_id);
    }

    pub fn unsubscribe_stats(&self, user_id: Uuid) {
        self.stats_subscribers.remove(&user_id);
    }

    #[must_use]
    pub fn stats_subscriber_count(&self) -> usize {
        self.stats_subscribers.len()
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Deliver an event to every stats subscriber.
    pub fn broadcast_stats(&self, event: &ServerEvent) {
        for user_id in self.stats_subscribers.iter() {
            self.deliver(*user_id, event.clone());
        }
    }
}

impl ConnectionDirectory for WsDirectory {
    fn resolve(&self, user_id: Uuid) -> Option<Uuid> {
        self.connections.get(&user_id).map(|h| h.connection_id)
    }

    fn deliver(&self, user_id: Uuid, event: ServerEvent) -> bool {
        self.connections
            .get(&user_id)
            .is_some_and(|handle| handle.tx.try_send(event).is_ok())
    }
}
