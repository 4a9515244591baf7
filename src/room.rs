//! Room definitions
//!
//! A room is a logical broadcast group. `RoomTable` holds the local membership of
//! one server instance: which live connections are in which rooms.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{ConnectionId, ConversationId, UserId};

/// Broadcast group
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Room {
    /// Both participants of one 1:1 conversation
    Conversation(ConversationId),
    /// Every connection of one user
    Personal(UserId),
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::Conversation(id) => write!(f, "conv:{}", id),
            Room::Personal(id) => write!(f, "user:{}", id),
        }
    }
}

/// Local room membership
///
/// Rooms exist only while they have members. Joining twice is a no-op.
#[derive(Debug, Default)]
pub struct RoomTable {
    rooms: HashMap<Room, HashSet<ConnectionId>>,
    memberships: HashMap<ConnectionId, HashSet<Room>>,
}

impl RoomTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a room
    ///
    /// Returns false if it was already a member.
    pub fn join(&mut self, conn: ConnectionId, room: Room) -> bool {
        let added = self.rooms.entry(room.clone()).or_default().insert(conn);
        self.memberships.entry(conn).or_default().insert(room);
        added
    }

    /// Remove a connection from every room (disconnect)
    pub fn leave_all(&mut self, conn: ConnectionId) -> Vec<Room> {
        let rooms: Vec<Room> = self
            .memberships
            .remove(&conn)
            .map(|rooms| rooms.into_iter().collect())
            .unwrap_or_default();
        for room in &rooms {
            if let Some(members) = self.rooms.get_mut(room) {
                members.remove(&conn);
                if members.is_empty() {
                    self.rooms.remove(room);
                }
            }
        }
        rooms
    }

    /// Current members of a room
    pub fn members(&self, room: &Room) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of non-empty rooms
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
