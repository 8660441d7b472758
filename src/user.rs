//! Registered users and the registry that owns them
//!
//! A connection becomes a user once it picks a username. The registry hands
//! out display names that stay unique among live users even when two
//! connections ask for the same raw name.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::RegistryError;
use crate::types::{ClientId, RoomId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Online,
}

/// Connected user record
///
/// Returned by the registry as a snapshot; mutating it does not touch the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    #[serde(skip)]
    pub id: ClientId,
    /// Raw name as requested by the client
    pub username: String,
    /// Unique, system-assigned name shown to other users
    pub display_name: String,
    pub connected_at: DateTime<Utc>,
    pub status: UserStatus,
    pub current_room: RoomId,
    /// Registration order
    #[serde(skip)]
    pub seq: u64,
}

/// Maps connections to users and display names back to connections
///
/// Both maps are always updated together.
#[derive(Debug)]
pub struct UserRegistry {
    users: HashMap<ClientId, User>,
    by_display_name: HashMap<String, ClientId>,
    /// Next discriminator; never reused
    counter: u64,
    default_room: RoomId,
}

impl UserRegistry {
    pub fn new(default_room: RoomId) -> Self {
        Self {
            users: HashMap::new(),
            by_display_name: HashMap::new(),
            counter: 1,
            default_room,
        }
    }

    /// Register a connection under a freshly allocated display name
    ///
    /// Re-registering a live connection is rejected and leaves the existing
    /// record untouched.
    pub fn register(&mut self, id: ClientId, requested: &str) -> Result<User, RegistryError> {
        if self.users.contains_key(&id) {
            return Err(RegistryError::AlreadyRegistered(id.to_string()));
        }

        let username = requested.trim();
        if username.is_empty() {
            return Err(RegistryError::InvalidUsername);
        }

        let seq = self.counter;
        self.counter += 1;

        let user = User {
            id,
            username: username.to_string(),
            display_name: format!("user{} ({})", seq, username),
            connected_at: Utc::now(),
            status: UserStatus::Online,
            current_room: self.default_room.clone(),
            seq,
        };

        self.by_display_name.insert(user.display_name.clone(), id);
        self.users.insert(id, user.clone());
        Ok(user)
    }

    /// Remove a connection; `None` when it was never (or is no longer) registered
    pub fn unregister(&mut self, id: ClientId) -> Option<User> {
        let user = self.users.remove(&id)?;
        self.by_display_name.remove(&user.display_name);
        Some(user)
    }

    pub fn lookup_by_connection(&self, id: ClientId) -> Option<&User> {
        self.users.get(&id)
    }

    pub fn lookup_by_display_name(&self, display_name: &str) -> Option<ClientId> {
        self.by_display_name.get(display_name).copied()
    }

    /// Display name for a connection, if registered
    pub fn display_name(&self, id: ClientId) -> Option<&str> {
        self.users.get(&id).map(|u| u.display_name.as_str())
    }

    /// Record the room a user last moved into
    pub fn set_current_room(&mut self, id: ClientId, room: RoomId) {
        if let Some(user) = self.users.get_mut(&id) {
            user.current_room = room;
        }
    }

    /// Display names in registration order
    pub fn list_display_names(&self) -> Vec<String> {
        let mut users: Vec<&User> = self.users.values().collect();
        users.sort_by_key(|u| u.seq);
        users.into_iter().map(|u| u.display_name.clone()).collect()
    }

    /// Connection ids of every registered user
    pub fn connections(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.users.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
