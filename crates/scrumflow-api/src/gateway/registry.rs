//! Live connection registry.
//!
//! Tracks which WebSocket connections belong to which user and which rooms
//! each connection has joined. The process-local [`InMemoryRegistry`] keeps
//! everything behind one `RwLock`; the lock is never held across an await.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::RwLock;

use tokio::sync::mpsc;
use uuid::Uuid;

/// Identifier assigned to a socket when it authenticates.
pub type ConnectionId = Uuid;

/// Outbound channel drained by the socket's send task. Frames are serialized
/// JSON text.
pub type FrameSender = mpsc::UnboundedSender<String>;

/// Broadcast group a connection can join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    Project(i64),
    Sprint(i64),
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::Project(id) => write!(f, "project-{}", id),
            Room::Sprint(id) => write!(f, "sprint-{}", id),
        }
    }
}

/// Registry of live connections.
///
/// Implementations backed by a shared store can replace the in-memory one
/// when several gateway instances serve the same users.
pub trait ConnectionRegistry: Send + Sync {
    /// Track an authenticated connection for `user_id`.
    fn register(&self, conn: ConnectionId, user_id: i64, sender: FrameSender);

    /// Forget a connection, dropping it from its user and from every room.
    fn unregister(&self, conn: ConnectionId);

    /// Returns false when the connection is unknown.
    fn join(&self, conn: ConnectionId, room: Room) -> bool;

    fn leave(&self, conn: ConnectionId, room: Room);

    fn connections_for_user(&self, user_id: i64) -> Vec<ConnectionId>;

    fn connections_in_room(&self, room: Room) -> Vec<ConnectionId>;

    /// Queue a frame on one connection. Returns false if it is gone.
    fn send(&self, conn: ConnectionId, frame: &str) -> bool;
}

struct Connection {
    user_id: i64,
    sender: FrameSender,
    rooms: HashSet<Room>,
}

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnectionId, Connection>,
    users: HashMap<i64, HashSet<ConnectionId>>,
    rooms: HashMap<Room, HashSet<ConnectionId>>,
}

/// Process-local registry.
#[derive(Default)]
pub struct InMemoryRegistry {
    inner: RwLock<Inner>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_count(&self) -> usize {
        self.read().connections.len()
    }

    pub fn user_count(&self) -> usize {
        self.read().users.len()
    }

    pub fn room_count(&self) -> usize {
        self.read().rooms.len()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Remove `conn` from the set under `key`, dropping the set once empty.
fn remove_member<K: Eq + std::hash::Hash>(
    map: &mut HashMap<K, HashSet<ConnectionId>>,
    key: K,
    conn: ConnectionId,
) {
    if let Some(set) = map.get_mut(&key) {
        set.remove(&conn);
        if set.is_empty() {
            map.remove(&key);
        }
    }
}

impl ConnectionRegistry for InMemoryRegistry {
    fn register(&self, conn: ConnectionId, user_id: i64, sender: FrameSender) {
        let mut inner = self.write();
        inner.users.entry(user_id).or_default().insert(conn);
        inner.connections.insert(
            conn,
            Connection {
                user_id,
                sender,
                rooms: HashSet::new(),
            },
        );
    }

    fn unregister(&self, conn: ConnectionId) {
        let mut inner = self.write();
        let Some(connection) = inner.connections.remove(&conn) else {
            return;
        };
        remove_member(&mut inner.users, connection.user_id, conn);
        for room in connection.rooms {
            remove_member(&mut inner.rooms, room, conn);
        }
    }

    fn join(&self, conn: ConnectionId, room: Room) -> bool {
        let mut inner = self.write();
        match inner.connections.get_mut(&conn) {
            Some(connection) => {
                connection.rooms.insert(room);
            }
            None => return false,
        }
        inner.rooms.entry(room).or_default().insert(conn);
        true
    }

    fn leave(&self, conn: ConnectionId, room: Room) {
        let mut inner = self.write();
        if let Some(connection) = inner.connections.get_mut(&conn) {
            connection.rooms.remove(&room);
        }
        remove_member(&mut inner.rooms, room, conn);
    }

    fn connections_for_user(&self, user_id: i64) -> Vec<ConnectionId> {
        self.read()
            .users
            .get(&user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    fn connections_in_room(&self, room: Room) -> Vec<ConnectionId> {
        self.read()
            .rooms
            .get(&room)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    fn send(&self, conn: ConnectionId, frame: &str) -> bool {
        match self.read().connections.get(&conn) {
            Some(connection) => connection.sender.send(frame.to_string()).is_ok(),
            None => false,
        }
    }
}
