//! Connection registry - routes outbound messages to live sockets
//!
//! Implements the coordinator's broadcast seam so the tick loop can
//! push snapshots without knowing about WebSockets.

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::game::room::RoomSnapshot;
use crate::game::SnapshotSink;
use crate::ws::protocol::ServerMsg;

/// One outbound queue per connected socket
pub struct ConnectionRegistry {
    connections: DashMap<Uuid, mpsc::UnboundedSender<ServerMsg>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    pub fn register(&self, conn_id: Uuid, sender: mpsc::UnboundedSender<ServerMsg>) {
        self.connections.insert(conn_id, sender);
    }

    pub fn unregister(&self, conn_id: Uuid) {
        self.connections.remove(&conn_id);
    }

    /// Send to a single connection; a closed socket is not an error,
    /// the reader loop cleans it up on its own.
    pub fn send_to(&self, conn_id: Uuid, msg: ServerMsg) {
        if let Some(sender) = self.connections.get(&conn_id) {
            if sender.send(msg).is_err() {
                debug!(conn_id = %conn_id, "outbound queue closed");
            }
        }
    }

    /// Send the same message to a set of connections
    pub fn broadcast_to(&self, conn_ids: impl IntoIterator<Item = Uuid>, msg: &ServerMsg) {
        for conn_id in conn_ids {
            self.send_to(conn_id, msg.clone());
        }
    }

    /// Push a room snapshot to everyone in the room
    pub fn broadcast_room(&self, snapshot: &RoomSnapshot) {
        let msg = ServerMsg::room_update(snapshot);
        self.broadcast_to(snapshot.players.keys().copied(), &msg);
    }
}

impl SnapshotSink for ConnectionRegistry {
    fn room_update(&self, snapshot: &RoomSnapshot) {
        self.broadcast_room(snapshot);
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
