//! Room store
//!
//! Owns every room and a per-connection membership index. The default room
//! is created with the store and can never be deleted. Callers only ever
//! receive copies of room state.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::error::RoomError;
use crate::message::Message;
use crate::room::{Room, RoomInfo, RoomSpec};
use crate::types::{ClientId, RoomId};

/// Creator recorded for the default room
pub const SYSTEM_USER: &str = "System";

#[derive(Debug)]
pub struct RoomStore {
    rooms: HashMap<RoomId, Room>,
    /// Rooms each connection is a member of
    memberships: HashMap<ClientId, BTreeSet<RoomId>>,
    default_room: RoomId,
    history_limit: usize,
}

impl RoomStore {
    /// Create the store together with its default room
    pub fn new(
        default_id: RoomId,
        default_name: &str,
        default_capacity: usize,
        history_limit: usize,
    ) -> Self {
        let mut rooms = HashMap::new();
        let general = Room::new(
            RoomSpec {
                id: default_id.clone(),
                name: default_name.to_string(),
                created_by: SYSTEM_USER.to_string(),
                is_private: false,
                max_members: default_capacity,
                description: "Welcome to the general chat room!".to_string(),
            },
            history_limit,
        );
        rooms.insert(default_id.clone(), general);

        Self {
            rooms,
            memberships: HashMap::new(),
            default_room: default_id,
            history_limit,
        }
    }

    pub fn default_room(&self) -> &RoomId {
        &self.default_room
    }

    pub fn create_room(&mut self, spec: RoomSpec) -> Result<RoomInfo, RoomError> {
        if spec.id.is_empty() {
            return Err(RoomError::InvalidRoomId);
        }
        if self.rooms.contains_key(&spec.id) {
            return Err(RoomError::AlreadyExists(spec.id));
        }

        let room = Room::new(spec, self.history_limit);
        let info = room.info();
        debug!("Room {} created by {}", room.id, room.created_by);
        self.rooms.insert(room.id.clone(), room);
        Ok(info)
    }

    /// Delete a room; only its creator or an admin may, never the default room
    ///
    /// Returns the display names that were members at deletion time.
    pub fn delete_room(&mut self, id: &RoomId, requested_by: &str) -> Result<Vec<String>, RoomError> {
        if *id == self.default_room {
            return Err(RoomError::Protected);
        }
        let room = self
            .rooms
            .get(id)
            .ok_or_else(|| RoomError::NotFound(id.clone()))?;
        if !room.can_manage(requested_by) {
            return Err(RoomError::Forbidden);
        }

        let members = room.members();
        self.rooms.remove(id);
        for rooms in self.memberships.values_mut() {
            rooms.remove(id);
        }
        debug!("Room {} deleted by {}", id, requested_by);
        Ok(members)
    }

    pub fn join_room(
        &mut self,
        id: &RoomId,
        user: ClientId,
        display_name: &str,
    ) -> Result<RoomInfo, RoomError> {
        let room = self
            .rooms
            .get_mut(id)
            .ok_or_else(|| RoomError::NotFound(id.clone()))?;

        if !room.add_member(display_name) {
            return Err(RoomError::RoomFull(id.clone()));
        }

        self.memberships.entry(user).or_default().insert(id.clone());
        Ok(room.info())
    }

    /// Returns false when the room or the membership did not exist
    pub fn leave_room(&mut self, id: &RoomId, user: ClientId, display_name: &str) -> bool {
        let indexed = self
            .memberships
            .get_mut(&user)
            .map(|rooms| rooms.remove(id))
            .unwrap_or(false);

        let Some(room) = self.rooms.get_mut(id) else {
            return false;
        };
        room.remove_member(display_name) || indexed
    }

    /// Drop every membership of a connection; returns the rooms it left
    pub fn leave_all_rooms(&mut self, user: ClientId, display_name: &str) -> Vec<RoomId> {
        let Some(ids) = self.memberships.remove(&user) else {
            return Vec::new();
        };

        ids.into_iter()
            .filter(|id| {
                self.rooms
                    .get_mut(id)
                    .map(|room| {
                        room.remove_member(display_name);
                        true
                    })
                    .unwrap_or(false)
            })
            .collect()
    }

    /// No-op if the room is gone
    pub fn append_history(&mut self, id: &RoomId, message: Message) {
        if let Some(room) = self.rooms.get_mut(id) {
            room.push_history(message);
        }
    }

    pub fn message_history(&self, id: &RoomId, limit: usize) -> Vec<Message> {
        self.rooms
            .get(id)
            .map(|room| room.recent_history(limit))
            .unwrap_or_default()
    }

    /// Rooms sorted by id; private rooms only when asked for
    pub fn list_rooms(&self, include_private: bool) -> Vec<RoomInfo> {
        let mut rooms: Vec<RoomInfo> = self
            .rooms
            .values()
            .filter(|room| include_private || !room.is_private)
            .map(Room::info)
            .collect();
        rooms.sort_by(|a, b| a.id.cmp(&b.id));
        rooms
    }

    /// Empty for unknown rooms
    pub fn get_members(&self, id: &RoomId) -> Vec<String> {
        self.rooms.get(id).map(Room::members).unwrap_or_default()
    }

    pub fn get_room(&self, id: &RoomId) -> Option<Room> {
        self.rooms.get(id).cloned()
    }

    pub fn rooms_of(&self, user: ClientId) -> Vec<RoomId> {
        self.memberships
            .get(&user)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_member(&self, id: &RoomId, display_name: &str) -> bool {
        self.rooms
            .get(id)
            .map(|room| room.contains(display_name))
            .unwrap_or(false)
    }

    /// Grant admin rights; the requester must already be an admin
    pub fn make_admin(&mut self, id: &RoomId, target: &str, requested_by: &str) -> Result<(), RoomError> {
        let room = self
            .rooms
            .get_mut(id)
            .ok_or_else(|| RoomError::NotFound(id.clone()))?;
        if !room.is_admin(requested_by) {
            return Err(RoomError::Forbidden);
        }
        room.add_admin(target);
        Ok(())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Sum of member counts across rooms
    pub fn total_members(&self) -> usize {
        self.rooms.values().map(Room::member_count).sum()
    }
}
