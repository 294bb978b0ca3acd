// In-process connection index.
//
// Three maps: connection -> sender, user -> connections, room -> connections.
// A connection's presence here is the single source of truth for "this node
// holds that socket". Mutations for one connection id go through entry-level
// locks; readers tolerate concurrent mutation and a send to a vanished
// connection is a no-op.

use std::collections::HashSet;

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

pub type ConnectionId = String;

struct ConnectionEntry {
    user_id: Uuid,
    sender: mpsc::UnboundedSender<String>,
}

#[derive(Default)]
pub struct ConnectionManager {
    connections: DashMap<ConnectionId, ConnectionEntry>,
    user_connections: DashMap<Uuid, HashSet<ConnectionId>>,
    room_connections: DashMap<Uuid, HashSet<ConnectionId>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(
        &self,
        connection_id: &str,
        user_id: Uuid,
        sender: mpsc::UnboundedSender<String>,
    ) {
        self.connections
            .insert(connection_id.to_string(), ConnectionEntry { user_id, sender });
        self.user_connections
            .entry(user_id)
            .or_default()
            .insert(connection_id.to_string());
        tracing::debug!(connection = connection_id, user = %user_id, "connection registered");
    }

    /// Remove the connection from every index. Returns the owning user.
    pub fn disconnect(&self, connection_id: &str) -> Option<Uuid> {
        let entry = self.connections.remove(connection_id)?;
        let user_id = entry.1.user_id;

        if let Some(mut set) = self.user_connections.get_mut(&user_id) {
            set.remove(connection_id);
        }
        self.user_connections.retain(|_, set| !set.is_empty());

        for mut room in self.room_connections.iter_mut() {
            room.value_mut().remove(connection_id);
        }
        self.room_connections.retain(|_, set| !set.is_empty());

        tracing::debug!(connection = connection_id, user = %user_id, "connection removed");
        Some(user_id)
    }

    pub fn join_room(&self, connection_id: &str, room_id: Uuid) {
        self.room_connections
            .entry(room_id)
            .or_default()
            .insert(connection_id.to_string());
    }

    pub fn leave_room(&self, connection_id: &str, room_id: Uuid) {
        if let Some(mut set) = self.room_connections.get_mut(&room_id) {
            set.remove(connection_id);
        }
    }

    pub fn connection_user(&self, connection_id: &str) -> Option<Uuid> {
        self.connections.get(connection_id).map(|e| e.user_id)
    }

    /// Send a frame to one connection. A closed or vanished socket is a
    /// silent miss, never a stale delivery.
    pub fn send_to(&self, connection_id: &str, frame: &str) -> bool {
        match self.connections.get(connection_id) {
            Some(entry) => entry.sender.send(frame.to_string()).is_ok(),
            None => false,
        }
    }

    /// Fan a frame out to the local connections in a room, optionally
    /// excluding the originator. Returns the delivered count.
    pub fn send_local_room(&self, room_id: Uuid, frame: &str, exclude: Option<&str>) -> usize {
        let targets: Vec<ConnectionId> = match self.room_connections.get(&room_id) {
            Some(set) => set
                .iter()
                .filter(|id| exclude.map(|ex| ex != id.as_str()).unwrap_or(true))
                .cloned()
                .collect(),
            None => return 0,
        };
        let mut delivered = 0;
        for id in targets {
            if self.send_to(&id, frame) {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn user_connection_ids(&self, user_id: Uuid) -> Vec<ConnectionId> {
        self.user_connections
            .get(&user_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn room_connection_count(&self, room_id: Uuid) -> usize {
        self.room_connections
            .get(&room_id)
            .map(|set| set.len())
            .unwrap_or(0)
    }

    pub fn total_connections(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (
        mpsc::UnboundedSender<String>,
        mpsc::UnboundedReceiver<String>,
    ) {
        mpsc::unbounded_channel()
    }

    #[tokio::test]
    async fn test_connect_and_send() {
        let manager = ConnectionManager::new();
        let user = Uuid::new_v4();
        let (tx, mut rx) = channel();

        manager.connect("c1", user, tx);
        assert_eq!(manager.total_connections(), 1);
        assert_eq!(manager.connection_user("c1"), Some(user));

        assert!(manager.send_to("c1", "hello"));
        assert_eq!(rx.recv().await.unwrap(), "hello");
        assert!(!manager.send_to("missing", "hello"));
    }

    #[tokio::test]
    async fn test_room_fanout_with_exclusion() {
        let manager = ConnectionManager::new();
        let room = Uuid::new_v4();
        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();

        manager.connect("c1", Uuid::new_v4(), tx1);
        manager.connect("c2", Uuid::new_v4(), tx2);
        manager.join_room("c1", room);
        manager.join_room("c2", room);

        let delivered = manager.send_local_room(room, "frame", Some("c1"));
        assert_eq!(delivered, 1);
        assert_eq!(rx2.recv().await.unwrap(), "frame");
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_cleans_all_indices() {
        let manager = ConnectionManager::new();
        let user = Uuid::new_v4();
        let room = Uuid::new_v4();
        let (tx, _rx) = channel();

        manager.connect("c1", user, tx);
        manager.join_room("c1", room);

        assert_eq!(manager.disconnect("c1"), Some(user));
        assert_eq!(manager.total_connections(), 0);
        assert_eq!(manager.room_connection_count(room), 0);
        assert!(manager.user_connection_ids(user).is_empty());
        assert_eq!(manager.disconnect("c1"), None);
    }

    #[tokio::test]
    async fn test_leave_room_keeps_connection() {
        let manager = ConnectionManager::new();
        let room = Uuid::new_v4();
        let (tx, _rx) = channel();

        manager.connect("c1", Uuid::new_v4(), tx);
        manager.join_room("c1", room);
        manager.leave_room("c1", room);

        assert_eq!(manager.room_connection_count(room), 0);
        assert_eq!(manager.total_connections(), 1);
    }
}
