//! Room membership and connection lookup.
//!
//! Two views are kept behind a single lock: room name to ordered member ids,
//! and connection id to handle. Every id listed in a room is also a key in
//! the handle map. No method awaits while the lock is held, so callers on
//! other tasks never see one view updated without the other.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use roomcast_core::ConnectionId;

use crate::websocket::connection::ClientConnection;

#[derive(Default)]
struct RegistryState {
    rooms: HashMap<String, Vec<ConnectionId>>,
    connections: HashMap<ConnectionId, Arc<ClientConnection>>,
}

impl RegistryState {
    fn detach(&mut self, id: &ConnectionId) -> bool {
        let removed = self.connections.remove(id).is_some();
        for members in self.rooms.values_mut() {
            members.retain(|member| member != id);
        }
        removed
    }
}

/// Registry of connected clients and the rooms they are subscribed to.
///
/// The set of rooms is fixed at construction; membership changes at runtime.
pub struct RoomRegistry {
    room_names: Vec<String>,
    state: Mutex<RegistryState>,
}

impl RoomRegistry {
    /// Create a registry with a fixed set of rooms. Duplicate names collapse.
    pub fn new<I, S>(rooms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut room_names: Vec<String> = Vec::new();
        let mut state = RegistryState::default();
        for room in rooms {
            let room = room.into();
            if state.rooms.insert(room.clone(), Vec::new()).is_none() {
                room_names.push(room);
            }
        }
        Self {
            room_names,
            state: Mutex::new(state),
        }
    }

    /// Register a connection. Returns the new connection count.
    pub fn add_connection(&self, connection: Arc<ClientConnection>) -> usize {
        let mut state = self.state.lock();
        let _ = state.connections.insert(connection.id.clone(), connection);
        state.connections.len()
    }

    /// Remove a connection from the handle map and from every room.
    ///
    /// Returns `false` if the id was not registered.
    pub fn remove_connection(&self, id: &ConnectionId) -> bool {
        self.state.lock().detach(id)
    }

    /// Add `id` to `room`. Returns whether membership changed.
    ///
    /// Unknown rooms, unregistered ids and existing members are no-ops.
    pub fn subscribe(&self, id: &ConnectionId, room: &str) -> bool {
        let mut state = self.state.lock();
        if !state.connections.contains_key(id) {
            return false;
        }
        match state.rooms.get_mut(room) {
            Some(members) if !members.contains(id) => {
                members.push(id.clone());
                true
            }
            _ => false,
        }
    }

    /// Remove `id` from `room`. Returns whether membership changed.
    pub fn unsubscribe(&self, id: &ConnectionId, room: &str) -> bool {
        let mut state = self.state.lock();
        let Some(members) = state.rooms.get_mut(room) else {
            return false;
        };
        let before = members.len();
        members.retain(|member| member != id);
        members.len() != before
    }

    /// Whether `name` is one of the configured rooms.
    pub fn room_exists(&self, name: &str) -> bool {
        self.state.lock().rooms.contains_key(name)
    }

    /// Current members of `room` in subscription order. Empty for unknown rooms.
    pub fn members_of(&self, room: &str) -> Vec<Arc<ClientConnection>> {
        let state = self.state.lock();
        state
            .rooms
            .get(room)
            .map(|members| {
                members
                    .iter()
                    .filter_map(|id| state.connections.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of registered connections.
    pub fn count(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// Look up a connection handle.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.state.lock().connections.get(id).cloned()
    }

    /// Configured room names, in configuration order.
    pub fn rooms(&self) -> &[String] {
        &self.room_names
    }

    /// Rooms `id` is currently subscribed to, in configuration order.
    pub fn rooms_of(&self, id: &ConnectionId) -> Vec<String> {
        let state = self.state.lock();
        self.room_names
            .iter()
            .filter(|room| state.rooms.get(*room).is_some_and(|members| members.contains(id)))
            .cloned()
            .collect()
    }

    /// Evict every connection whose socket is closed. Returns the evicted ids.
    pub fn sweep_disconnected(&self) -> Vec<ConnectionId> {
        let mut state = self.state.lock();
        let dead: Vec<ConnectionId> = state
            .connections
            .values()
            .filter(|conn| conn.is_closed())
            .map(|conn| conn.id.clone())
            .collect();
        for id in &dead {
            let _ = state.detach(id);
        }
        dead
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        let state = self.state.lock();
        for (room, members) in &state.rooms {
            for id in members {
                assert!(
                    state.connections.contains_key(id),
                    "{id} in {room} but not registered"
                );
            }
            let mut unique = members.clone();
            unique.sort();
            unique.dedup();
            assert_eq!(unique.len(), members.len(), "duplicate member in {room}");
        }
    }
}

impl std::fmt::Debug for RoomRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomRegistry")
            .field("rooms", &self.room_names)
            .field("connections", &self.count())
            .finish()
    }
}
