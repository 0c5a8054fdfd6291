use dashmap::DashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::connection::Connection;
use crate::packet::Packet;

/// Server-side map from connection id to live connection.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<Uuid, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `connection` under its id, returning any connection it replaced.
    pub fn insert(&self, connection: Connection) -> Option<Connection> {
        self.connections.insert(connection.id(), connection)
    }

    pub fn remove(&self, id: &Uuid) -> Option<Connection> {
        self.connections.remove(id).map(|(_, connection)| connection)
    }

    pub fn get(&self, id: &Uuid) -> Option<Connection> {
        self.connections.get(id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.connections.contains_key(id)
    }

    /// Ids of every registered connection, in no particular order.
    pub fn ids(&self) -> Vec<Uuid> {
        self.connections.iter().map(|entry| *entry.key()).collect()
    }

    /// Clones of every registered connection.
    ///
    /// Work on connections happens on the snapshot, never under a map lock.
    pub fn snapshot(&self) -> Vec<Connection> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Send `packet` to every registered connection not in `excluding`.
    ///
    /// A failed send is logged and skipped. Returns how many sends were queued.
    pub fn broadcast(&self, packet: &Packet, excluding: &[Uuid]) -> usize {
        let mut delivered = 0;
        for connection in self.snapshot() {
            if excluding.contains(&connection.id()) {
                continue;
            }
            match connection.send(packet.clone()) {
                Ok(()) => delivered += 1,
                Err(err) => warn!(
                    connection_id = %connection.id(),
                    packet_type = %packet.packet_type,
                    error = %err,
                    "broadcast send failed"
                ),
            }
        }
        debug!(packet_type = %packet.packet_type, delivered, "broadcast");
        delivered
    }

    /// Disconnect every registered connection.
    pub fn disconnect_all(&self) {
        for connection in self.snapshot() {
            connection.disconnect();
        }
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.connections.len())
            .finish()
    }
}
