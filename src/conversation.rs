//! Private conversations
//!
//! One bounded thread per pair of users. The thread id is built from the
//! two display names in sorted order, so both participants resolve it.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tracing::warn;

use crate::crypto::EncryptionGateway;
use crate::events::{ChatEvent, EventSink};
use crate::message::PrivateMessage;

/// Order-independent id for the thread between two users
pub fn conversation_id(a: &str, b: &str) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    format!("dm_{}_{}", first, second)
}

#[derive(Debug, Default)]
struct Conversation {
    messages: VecDeque<PrivateMessage>,
}

pub struct ConversationStore {
    conversations: HashMap<String, Conversation>,
    history_limit: usize,
    events: Arc<dyn EventSink>,
}

impl ConversationStore {
    pub fn new(history_limit: usize, events: Arc<dyn EventSink>) -> Self {
        Self {
            conversations: HashMap::new(),
            history_limit,
            events,
        }
    }

    /// Store a new unread message from `sender` to `receiver`
    ///
    /// Encryption is best effort: on failure the message is kept in plaintext
    /// with `encrypted == false`.
    pub fn send(
        &mut self,
        sender: &str,
        receiver: &str,
        content: &str,
        encrypt: bool,
        gateway: &EncryptionGateway,
    ) -> PrivateMessage {
        let (content, encrypted) = if encrypt {
            match gateway.encrypt(content) {
                Ok(ciphertext) => (ciphertext, true),
                Err(e) => {
                    warn!("Private message encryption failed: {}", e);
                    self.events.record(&ChatEvent::EncryptionFailure {
                        context: format!("private {} -> {}", sender, receiver),
                        reason: e.to_string(),
                    });
                    (content.to_string(), false)
                }
            }
        } else {
            (content.to_string(), false)
        };

        let message = PrivateMessage::new(
            sender.to_string(),
            receiver.to_string(),
            content,
            encrypted,
        );

        let thread = self
            .conversations
            .entry(conversation_id(sender, receiver))
            .or_default();
        thread.messages.push_back(message.clone());
        while thread.messages.len() > self.history_limit {
            thread.messages.pop_front();
        }

        self.events.record(&ChatEvent::PrivateMessage {
            sender: sender.to_string(),
            receiver: receiver.to_string(),
        });
        message
    }

    /// The most recent `limit` messages, oldest first
    pub fn get_conversation(&self, a: &str, b: &str, limit: usize) -> Vec<PrivateMessage> {
        let Some(thread) = self.conversations.get(&conversation_id(a, b)) else {
            return Vec::new();
        };
        let skip = thread.messages.len().saturating_sub(limit);
        thread.messages.iter().skip(skip).cloned().collect()
    }

    /// Plaintext copy of an encrypted message
    ///
    /// When decryption fails the message comes back unchanged, still flagged
    /// as encrypted.
    pub fn decrypt_for_display(
        &self,
        message: PrivateMessage,
        gateway: &EncryptionGateway,
    ) -> PrivateMessage {
        if !message.encrypted {
            return message;
        }
        match gateway.decrypt(&message.content) {
            Ok(plaintext) => PrivateMessage {
                content: plaintext,
                encrypted: false,
                ..message
            },
            Err(e) => {
                self.events.record(&ChatEvent::EncryptionFailure {
                    context: format!("private message {}", message.id),
                    reason: e.to_string(),
                });
                message
            }
        }
    }

    /// Mark everything `sender` sent to `receiver` as read
    ///
    /// Returns how many messages flipped from unread to read.
    pub fn mark_read(&mut self, sender: &str, receiver: &str) -> usize {
        let Some(thread) = self.conversations.get_mut(&conversation_id(sender, receiver)) else {
            return 0;
        };
        let mut flipped = 0;
        for message in thread.messages.iter_mut() {
            if message.receiver == receiver && message.sender == sender && !message.read {
                message.read = true;
                flipped += 1;
            }
        }
        flipped
    }

    /// Unread messages addressed to `user` across all conversations
    pub fn unread_count_for(&self, user: &str) -> usize {
        self.conversations
            .values()
            .flat_map(|thread| thread.messages.iter())
            .filter(|m| m.receiver == user && !m.read)
            .count()
    }

    pub fn conversation_count(&self) -> usize {
        self.conversations.len()
    }
}
