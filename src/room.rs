//! Room struct definition
//!
//! A named group channel with a member set, an admin set, a capacity and a
//! bounded message history.

use std::collections::{BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::message::Message;
use crate::types::RoomId;

/// Chat room
///
/// Members and admins are display names. History is strictly FIFO: once it
/// holds `history_limit` entries, each append drops the oldest.
#[derive(Debug, Clone)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub is_private: bool,
    pub max_members: usize,
    pub description: String,
    members: BTreeSet<String>,
    admins: BTreeSet<String>,
    history: VecDeque<Message>,
    history_limit: usize,
}

/// Creation parameters for a room
#[derive(Debug, Clone)]
pub struct RoomSpec {
    pub id: RoomId,
    pub name: String,
    pub created_by: String,
    pub is_private: bool,
    pub max_members: usize,
    pub description: String,
}

/// Serializable room summary for clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomInfo {
    pub id: RoomId,
    pub name: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub is_private: bool,
    pub max_members: usize,
    pub description: String,
    pub member_count: usize,
    pub members: Vec<String>,
    pub admins: Vec<String>,
}

impl Room {
    /// Create a room; the creator starts as its only admin
    pub fn new(spec: RoomSpec, history_limit: usize) -> Self {
        let mut admins = BTreeSet::new();
        admins.insert(spec.created_by.clone());
        Self {
            id: spec.id,
            name: spec.name,
            created_by: spec.created_by,
            created_at: Utc::now(),
            is_private: spec.is_private,
            max_members: spec.max_members,
            description: spec.description,
            members: BTreeSet::new(),
            admins,
            history: VecDeque::new(),
            history_limit,
        }
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= self.max_members
    }

    pub fn contains(&self, display_name: &str) -> bool {
        self.members.contains(display_name)
    }

    /// Add a member
    ///
    /// Returns false if the room is full. Adding an existing member succeeds
    /// without changing anything.
    pub fn add_member(&mut self, display_name: &str) -> bool {
        if self.contains(display_name) {
            return true;
        }
        if self.is_full() {
            return false;
        }
        self.members.insert(display_name.to_string());
        true
    }

    /// Returns true if the member was present
    pub fn remove_member(&mut self, display_name: &str) -> bool {
        self.members.remove(display_name)
    }

    pub fn is_admin(&self, display_name: &str) -> bool {
        self.admins.contains(display_name)
    }

    /// Creator or admin
    pub fn can_manage(&self, display_name: &str) -> bool {
        self.created_by == display_name || self.is_admin(display_name)
    }

    pub fn add_admin(&mut self, display_name: &str) {
        self.admins.insert(display_name.to_string());
    }

    /// Append, then drop the oldest entries beyond the limit
    pub fn push_history(&mut self, message: Message) {
        self.history.push_back(message);
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
    }

    /// Most recent `limit` messages, oldest first
    pub fn recent_history(&self, limit: usize) -> Vec<Message> {
        let skip = self.history.len().saturating_sub(limit);
        self.history.iter().skip(skip).cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn members(&self) -> Vec<String> {
        self.members.iter().cloned().collect()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn info(&self) -> RoomInfo {
        RoomInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            created_by: self.created_by.clone(),
            created_at: self.created_at,
            is_private: self.is_private,
            max_members: self.max_members,
            description: self.description.clone(),
            member_count: self.members.len(),
            members: self.members(),
            admins: self.admins.iter().cloned().collect(),
        }
    }
}
