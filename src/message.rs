//! Chat message entities
//!
//! `Message` is an immutable room log entry. `PrivateMessage` belongs to a
//! two-person conversation; only its `read` flag ever changes.

use serde::Serialize;

use crate::types::{RoomId, Stamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
}

/// Room broadcast message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    /// `<sender>_<unix millis>_<seq>`
    pub id: String,
    pub sender: String,
    /// Plaintext, or ciphertext when `encrypted`
    pub content: String,
    pub room: RoomId,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub encrypted: bool,
    pub timestamp: Stamp,
}

impl Message {
    pub fn new(
        sender: String,
        content: String,
        room: RoomId,
        kind: MessageKind,
        encrypted: bool,
        timestamp: Stamp,
    ) -> Self {
        Self {
            id: format!("{}_{}_{}", sender, timestamp.millis(), timestamp.seq),
            sender,
            content,
            room,
            kind,
            encrypted,
            timestamp,
        }
    }
}

/// Direct message between two users
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrivateMessage {
    /// `pm_<unix millis>_<seq>`
    pub id: String,
    pub sender: String,
    pub receiver: String,
    pub content: String,
    pub encrypted: bool,
    pub timestamp: Stamp,
    pub read: bool,
}

impl PrivateMessage {
    pub fn new(sender: String, receiver: String, content: String, encrypted: bool) -> Self {
        let timestamp = Stamp::now();
        Self {
            id: format!("pm_{}_{}", timestamp.millis(), timestamp.seq),
            sender,
            receiver,
            content,
            encrypted,
            timestamp,
            read: false,
        }
    }
}
