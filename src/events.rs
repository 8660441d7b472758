//! Structured chat event log
//!
//! The core describes what happened (who/what/when) through an injected
//! [`EventSink`] handle and never reads anything back. [`TracingSink`] turns
//! events into `tracing` records; [`MemorySink`] keeps them for inspection.

use std::sync::Mutex;

use crate::types::{ClientId, RoomId, Stamp};

/// Lifecycle step of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionAction {
    Connect,
    Register,
    Disconnect,
}

/// Room-level action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomAction {
    Create,
    Delete,
    Join,
    Leave,
    MakeAdmin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Connection {
        client: ClientId,
        display_name: Option<String>,
        action: ConnectionAction,
    },
    Message {
        sender: String,
        room: RoomId,
        encrypted: bool,
    },
    Room {
        room: RoomId,
        actor: String,
        action: RoomAction,
    },
    PrivateMessage {
        sender: String,
        receiver: String,
    },
    /// Best-effort encryption or decryption that did not apply
    EncryptionFailure {
        context: String,
        reason: String,
    },
}

/// Receiver of structured chat events
pub trait EventSink: Send + Sync {
    fn record(&self, event: &ChatEvent);
}

/// Emits every event as a `tracing` record under `quiktalk::events`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: &ChatEvent) {
        match event {
            ChatEvent::Connection {
                client,
                display_name,
                action,
            } => {
                tracing::info!(
                    target: "quiktalk::events",
                    %client,
                    display_name = display_name.as_deref().unwrap_or("-"),
                    ?action,
                    "connection"
                );
            }
            ChatEvent::Message {
                sender,
                room,
                encrypted,
            } => {
                tracing::info!(target: "quiktalk::events", %sender, %room, encrypted, "message");
            }
            ChatEvent::Room { room, actor, action } => {
                tracing::info!(target: "quiktalk::events", %room, %actor, ?action, "room");
            }
            ChatEvent::PrivateMessage { sender, receiver } => {
                tracing::info!(target: "quiktalk::events", %sender, %receiver, "private_message");
            }
            ChatEvent::EncryptionFailure { context, reason } => {
                tracing::error!(target: "quiktalk::events", %context, %reason, "encryption_failure");
            }
        }
    }
}

/// Keeps every recorded event in memory, stamped on arrival
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<(Stamp, ChatEvent)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all events recorded so far, oldest first
    pub fn events(&self) -> Vec<ChatEvent> {
        match self.events.lock() {
            Ok(guard) => guard.iter().map(|(_, e)| e.clone()).collect(),
            Err(poisoned) => poisoned.into_inner().iter().map(|(_, e)| e.clone()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for MemorySink {
    fn record(&self, event: &ChatEvent) {
        let entry = (Stamp::now(), event.clone());
        match self.events.lock() {
            Ok(mut guard) => guard.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }
}
