//! Keyed table of rooms.
//!
//! Each room sits behind its own `tokio::sync::Mutex` so transitions in one
//! room never wait on another. The table itself only needs a short
//! synchronous lock for lookups.

use crate::room::Room;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Room used by the bare `/ws` endpoint.
pub const DEFAULT_ROOM: &str = "default";

pub type SharedRoom = Arc<Mutex<Room>>;

pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, SharedRoom>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        let mut rooms = HashMap::new();
        rooms.insert(
            DEFAULT_ROOM.to_string(),
            Arc::new(Mutex::new(Room::new(DEFAULT_ROOM))),
        );
        Self {
            rooms: RwLock::new(rooms),
        }
    }

    pub fn get(&self, id: &str) -> Option<SharedRoom> {
        self.rooms.read().get(id).cloned()
    }

    pub fn get_or_create(&self, id: &str) -> SharedRoom {
        if let Some(room) = self.get(id) {
            return room;
        }

        self.rooms
            .write()
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Room::new(id))))
            .clone()
    }

    pub fn all(&self) -> Vec<SharedRoom> {
        self.rooms.read().values().cloned().collect()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
