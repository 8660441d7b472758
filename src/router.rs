//! Room message pipeline
//!
//! validate -> encrypt (best effort) -> format -> admit -> dispatch.
//! Only validation can reject a message; encryption trouble downgrades it
//! to plaintext and is reported to the event sink.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::crypto::EncryptionGateway;
use crate::error::MessageError;
use crate::events::{ChatEvent, EventSink};
use crate::message::{Message, MessageKind};
use crate::room_store::RoomStore;
use crate::scheduler::{Admission, AdmissionPolicy, PolicyKind};
use crate::types::{RoomId, Stamp};

/// A message handed out for delivery
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub message: Message,
    /// How long to wait before the next dispatch
    pub pause: Duration,
}

/// Inbound room message as submitted by a user
#[derive(Debug, Clone)]
pub struct Submission {
    pub sender: String,
    pub room: RoomId,
    pub content: String,
    pub encrypt: bool,
    pub priority: i32,
}

pub struct MessageRouter {
    max_length: usize,
    active: Box<dyn AdmissionPolicy>,
    /// Policies replaced while they still held admissions, oldest first
    retired: VecDeque<Box<dyn AdmissionPolicy>>,
    round_robin_delay: Duration,
    events: Arc<dyn EventSink>,
}

impl MessageRouter {
    pub fn new(
        max_length: usize,
        policy: PolicyKind,
        round_robin_delay: Duration,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            max_length,
            active: policy.build(round_robin_delay),
            retired: VecDeque::new(),
            round_robin_delay,
            events,
        }
    }

    /// Reject blank or oversized content
    pub fn validate(&self, content: &str) -> Result<(), MessageError> {
        if content.trim().is_empty() {
            return Err(MessageError::Empty);
        }
        if content.chars().count() > self.max_length {
            return Err(MessageError::TooLong {
                max: self.max_length,
            });
        }
        Ok(())
    }

    /// Validate, format and queue a room message under the active policy
    ///
    /// Returns the formatted message as it will be delivered.
    pub fn submit(
        &mut self,
        submission: Submission,
        gateway: &EncryptionGateway,
    ) -> Result<Message, MessageError> {
        self.validate(&submission.content)?;

        let (content, encrypted) = if submission.encrypt {
            match gateway.encrypt_for_room(&submission.room, &submission.content) {
                Ok(ciphertext) => (ciphertext, true),
                Err(e) => {
                    warn!("Encryption failed for {}: {}", submission.room, e);
                    self.events.record(&ChatEvent::EncryptionFailure {
                        context: format!("room {}", submission.room),
                        reason: e.to_string(),
                    });
                    (submission.content.clone(), false)
                }
            }
        } else {
            (submission.content.clone(), false)
        };

        let message = Message::new(
            submission.sender,
            content,
            submission.room,
            MessageKind::Text,
            encrypted,
            Stamp::now(),
        );

        self.active.admit(Admission::new(
            submission.content,
            submission.priority,
            message.clone(),
        ));
        debug!(
            "Admitted {} under {} ({} pending)",
            message.id,
            self.active.kind(),
            self.pending()
        );
        Ok(message)
    }

    /// Take the next admission, record it in its room and hand it out
    ///
    /// Admissions held by a replaced policy go first.
    pub fn dispatch_next(&mut self, rooms: &mut RoomStore) -> Option<Dispatch> {
        let (admission, pause) = loop {
            match self.retired.front_mut() {
                Some(policy) => match policy.next() {
                    Some(admission) => break (admission, policy.dispatch_delay()),
                    None => {
                        self.retired.pop_front();
                    }
                },
                None => {
                    let admission = self.active.next()?;
                    break (admission, self.active.dispatch_delay());
                }
            }
        };

        let message = admission.message;
        rooms.append_history(&message.room, message.clone());
        self.events.record(&ChatEvent::Message {
            sender: message.sender.clone(),
            room: message.room.clone(),
            encrypted: message.encrypted,
        });
        Some(Dispatch { message, pause })
    }

    /// Switch policy for subsequent admissions
    pub fn set_policy(&mut self, kind: PolicyKind) {
        if kind == self.active.kind() {
            return;
        }
        let previous = std::mem::replace(&mut self.active, kind.build(self.round_robin_delay));
        if !previous.is_empty() {
            self.retired.push_back(previous);
        }
    }

    pub fn policy(&self) -> PolicyKind {
        self.active.kind()
    }

    pub fn pending(&self) -> usize {
        self.active.len() + self.retired.iter().map(|p| p.len()).sum::<usize>()
    }
}
