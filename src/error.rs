//! Error types for the chat server
//!
//! Domain errors are split per store so each operation returns exactly the
//! failures it can produce. `AppError` aggregates them together with the
//! fatal transport errors. Uses thiserror for ergonomic error definitions.

use thiserror::Error;

use crate::types::RoomId;

/// Room operation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    #[error("Room '{0}' already exists")]
    AlreadyExists(RoomId),

    #[error("Room '{0}' does not exist")]
    NotFound(RoomId),

    /// Requester lacks admin rights on the room
    #[error("Only room admins can do that")]
    Forbidden,

    /// The default room cannot be deleted or left
    #[error("The default room is protected")]
    Protected,

    #[error("Room '{0}' is full")]
    RoomFull(RoomId),

    #[error("Room ID is required")]
    InvalidRoomId,
}

/// Inbound message validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("Message cannot be empty")]
    Empty,

    #[error("Message exceeds maximum length of {max} characters")]
    TooLong { max: usize },
}

/// Encryption gateway errors
///
/// Always recoverable: callers degrade to plaintext or keep the ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncryptionError {
    /// Integrity tag did not verify
    #[error("Invalid token - message may be corrupted or tampered with")]
    Tampered,

    #[error("Failed to decrypt message: {0}")]
    Decode(String),

    #[error("Failed to encrypt message: {0}")]
    Encrypt(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),
}

/// User registry errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Connection {0} is already registered")]
    AlreadyRegistered(String),

    #[error("Username cannot be empty")]
    InvalidUsername,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {key}")]
    Invalid { key: &'static str, value: String },
}

/// Application-level errors
///
/// Covers both fatal errors (connection termination) and
/// business errors (send error message to client).
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error (fatal)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send error (fatal - internal channel broken)
    #[error("Channel send error")]
    ChannelSend,

    #[error(transparent)]
    Room(#[from] RoomError),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Event from a connection that never set a username
    #[error("Username required")]
    NotRegistered,

    /// No live user carries the given display name
    #[error("User {0} not found")]
    UserNotFound(String),

    #[error("Unknown scheduling policy: {0}")]
    UnknownPolicy(String),
}

/// Message send errors
///
/// Occurs when attempting to send messages through closed channels.
#[derive(Debug, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,

    /// The receiver is not keeping up; the message was dropped
    #[error("Channel full")]
    Full,
}
