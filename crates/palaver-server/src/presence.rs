//! The presence registry: live mapping of online user to connection handle.
//!
//! One handle per user, last-connection-wins.  Unregistration is guarded by
//! the connection id so a stale disconnect arriving after a reconnect cannot
//! evict the newer handle.  Every change broadcasts the full online set to
//! all live connections.
//!
//! The registry is constructed once per server process and injected wherever
//! it is needed; state lives only in process memory and is rebuilt from
//! scratch on restart.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use palaver_shared::protocol::ServerEvent;
use palaver_shared::types::UserId;

/// Sender half of one live connection's outbound event queue.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    conn_id: Uuid,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl ConnectionHandle {
    pub fn new(tx: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self {
            conn_id: Uuid::new_v4(),
            tx,
        }
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    /// Queue an event for delivery.  Returns false when the connection's
    /// receive loop has already gone away.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

#[derive(Clone, Default)]
pub struct PresenceRegistry {
    inner: Arc<Mutex<HashMap<UserId, ConnectionHandle>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `user_id` to `handle`, replacing any prior handle for that user.
    pub async fn register(&self, user_id: UserId, handle: ConnectionHandle) {
        let mut map = self.inner.lock().await;
        let replaced = map.insert(user_id, handle).is_some();
        tracing::info!(user = %user_id, replaced, "presence registered");
        Self::broadcast_online(&map);
    }

    /// Remove the mapping for `user_id`, but only when `conn_id` still names
    /// the registered connection.  Returns whether the entry was removed.
    pub async fn unregister(&self, user_id: UserId, conn_id: Uuid) -> bool {
        let mut map = self.inner.lock().await;
        match map.get(&user_id) {
            Some(handle) if handle.conn_id == conn_id => {
                map.remove(&user_id);
                tracing::info!(user = %user_id, "presence unregistered");
                Self::broadcast_online(&map);
                true
            }
            Some(_) => {
                // A newer connection owns the entry; the stale disconnect
                // must not evict it.
                tracing::debug!(user = %user_id, "stale unregister ignored");
                false
            }
            None => false,
        }
    }

    pub async fn lookup(&self, user_id: UserId) -> Option<ConnectionHandle> {
        self.inner.lock().await.get(&user_id).cloned()
    }

    /// Currently online user ids, sorted for stable output.
    pub async fn online_users(&self) -> Vec<UserId> {
        let map = self.inner.lock().await;
        let mut users: Vec<_> = map.keys().copied().collect();
        users.sort();
        users
    }

    /// Best-effort push to one user.  Returns false when the user is offline
    /// or their connection is gone.
    pub async fn send_to(&self, user_id: UserId, event: ServerEvent) -> bool {
        match self.inner.lock().await.get(&user_id) {
            Some(handle) => handle.send(event),
            None => false,
        }
    }

    fn broadcast_online(map: &HashMap<UserId, ConnectionHandle>) {
        let mut users: Vec<_> = map.keys().copied().collect();
        users.sort();
        let event = ServerEvent::GetOnlineUsers { users };
        for handle in map.values() {
            handle.send(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (ConnectionHandle, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new(tx), rx)
    }

    #[tokio::test]
    async fn register_replaces_prior_handle() {
        let registry = PresenceRegistry::new();
        let user = UserId::new();
        let (h1, _rx1) = handle();
        let (h2, _rx2) = handle();
        let second_conn = h2.conn_id();

        registry.register(user, h1).await;
        registry.register(user, h2).await;

        let current = registry.lookup(user).await.unwrap();
        assert_eq!(current.conn_id(), second_conn);
    }

    #[tokio::test]
    async fn stale_unregister_does_not_evict_newer_connection() {
        let registry = PresenceRegistry::new();
        let user = UserId::new();
        let (h1, _rx1) = handle();
        let (h2, _rx2) = handle();
        let first_conn = h1.conn_id();
        let second_conn = h2.conn_id();

        registry.register(user, h1).await;
        registry.register(user, h2).await;

        assert!(!registry.unregister(user, first_conn).await);
        assert!(registry.lookup(user).await.is_some());

        assert!(registry.unregister(user, second_conn).await);
        assert!(registry.lookup(user).await.is_none());
    }

    #[tokio::test]
    async fn every_change_broadcasts_full_online_set() {
        let registry = PresenceRegistry::new();
        let alice = UserId::new();
        let bob = UserId::new();
        let (ha, mut rx_a) = handle();
        let (hb, mut rx_b) = handle();
        let bob_conn = hb.conn_id();

        registry.register(alice, ha).await;
        let event = rx_a.recv().await.unwrap();
        assert_eq!(event, ServerEvent::GetOnlineUsers { users: vec![alice] });

        registry.register(bob, hb).await;
        let mut expected = vec![alice, bob];
        expected.sort();
        assert_eq!(
            rx_a.recv().await.unwrap(),
            ServerEvent::GetOnlineUsers { users: expected.clone() }
        );
        assert_eq!(
            rx_b.recv().await.unwrap(),
            ServerEvent::GetOnlineUsers { users: expected }
        );

        registry.unregister(bob, bob_conn).await;
        assert_eq!(
            rx_a.recv().await.unwrap(),
            ServerEvent::GetOnlineUsers { users: vec![alice] }
        );
    }

    #[tokio::test]
    async fn send_to_offline_user_reports_false() {
        let registry = PresenceRegistry::new();
        assert!(
            !registry
                .send_to(UserId::new(), ServerEvent::Typing { from: UserId::new() })
                .await
        );
    }
}
